use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChimeError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChimeError {
    /// Short error code string, stable across releases for log filtering.
    pub fn code(&self) -> &'static str {
        match self {
            ChimeError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChimeError>;
