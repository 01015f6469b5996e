use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the rules engine when loading rule sets or evaluating rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rules path does not exist: {0}")]
    MissingPath(String),
    #[error("failed to read rules from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rules from {path}: {message}")]
    Parse { path: String, message: String },
    #[error("failed to compile expression {expr:?}: {message}")]
    Compile { expr: String, message: String },
    #[error("{0}")]
    Evaluation(String),
    #[error("select did not resolve to an array")]
    SelectNotArray,
    #[error("cannot write {scope} output at {path:?}: {message}")]
    Output {
        scope: &'static str,
        path: String,
        message: String,
    },
    #[error("failed to resolve message root: {0}")]
    Root(String),
}

impl RuleError {
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuleError::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RuleError::Parse {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        RuleError::Evaluation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
