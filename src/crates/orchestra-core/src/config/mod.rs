//! Configuration loading and provider resolution

pub mod providers;
pub mod settings;

pub use settings::{
    load_config, AgentConfig, CxdbConfig, OrchestraConfig, ProviderConfig, RepoConfig,
    WorkspaceConfig, WorkspaceToolConfig,
};
