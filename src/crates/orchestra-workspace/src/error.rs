//! Workspace error types

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// A git subprocess exited non-zero
#[derive(Error, Debug)]
#[error("git command failed ({status}): git {}\n{stderr}", args.join(" "))]
pub struct GitError {
    pub args: Vec<String>,
    pub status: i32,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("Repo path does not exist: {0}")]
    MissingRepo(PathBuf),

    #[error("Not a git repository: {0}")]
    NotARepo(PathBuf),

    #[error("{0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
