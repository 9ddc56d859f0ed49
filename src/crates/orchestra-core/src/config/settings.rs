//! `orchestra.yaml` configuration
//!
//! The config file is auto-discovered by walking up from the pipeline's
//! directory; `ORCHESTRA_CXDB_URL` overrides the context-store URL.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{OrchestraError, Result};

pub const CONFIG_FILE_NAME: &str = "orchestra.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CxdbConfig {
    pub url: String,
}

impl Default for CxdbConfig {
    fn default() -> Self {
        Self { url: "http://localhost:9010".to_string() }
    }
}

/// Model aliases and settings for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Alias → concrete model name (e.g. `cheap` → `claude-3-5-haiku`)
    pub models: BTreeMap<String, String>,
    pub settings: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub default: String,
    #[serde(flatten)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Prompt layering and model selection for one named agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub role: String,
    pub persona: String,
    pub personality: String,
    pub task: String,
    pub tools: Vec<String>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub path: String,
    pub branch_prefix: String,
    pub remote: String,
    pub push: String,
    pub clone_depth: u32,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            branch_prefix: "orchestra/".to_string(),
            remote: String::new(),
            push: String::new(),
            clone_depth: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceToolConfig {
    pub command: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub repos: BTreeMap<String, RepoConfig>,
    /// repo → tool name → tool definition
    pub tools: BTreeMap<String, BTreeMap<String, WorkspaceToolConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    pub cxdb: CxdbConfig,
    pub providers: ProvidersConfig,
    pub agents: BTreeMap<String, AgentConfig>,
    pub workspace: WorkspaceConfig,
    pub backend: String,
    pub recursion_limit: u32,

    /// Directory the config file was found in; relative repo paths resolve
    /// against it
    #[serde(skip)]
    pub config_dir: Option<PathBuf>,
}

impl Default for OrchestraConfig {
    fn default() -> Self {
        Self {
            cxdb: CxdbConfig::default(),
            providers: ProvidersConfig::default(),
            agents: BTreeMap::new(),
            workspace: WorkspaceConfig::default(),
            backend: "simulation".to_string(),
            recursion_limit: 1000,
            config_dir: None,
        }
    }
}

fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_dir() {
        start.to_path_buf()
    } else {
        start.parent()?.to_path_buf()
    };
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration, walking up from `start` (defaults to the current
/// directory), then apply environment overrides
pub fn load_config(start: Option<&Path>) -> Result<OrchestraConfig> {
    let start_dir = match start {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };

    let mut config = match find_config_file(&start_dir) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading configuration");
            let content = std::fs::read_to_string(&path)?;
            let mut config: OrchestraConfig = serde_yaml::from_str(&content)
                .map_err(|e| OrchestraError::Config(format!("failed to parse {}: {e}", path.display())))?;
            config.config_dir = path.parent().map(Path::to_path_buf);
            config
        }
        None => OrchestraConfig::default(),
    };

    if let Ok(url) = std::env::var("ORCHESTRA_CXDB_URL") {
        config.cxdb.url = url;
    }

    Ok(config)
}
