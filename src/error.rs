use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("agent `{0}` not found")]
    AgentNotFound(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rejected by `{callback}`: {reason}")]
    Rejected { callback: String, reason: String },

    #[error("state key `{key}` missing while rendering instructions for `{step}`")]
    MissingStateKey { key: String, step: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    pub fn rejected(callback: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Rejected {
            callback: callback.into(),
            reason: reason.into(),
        }
    }
}
