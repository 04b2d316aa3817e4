use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
