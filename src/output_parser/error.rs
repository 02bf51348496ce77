use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputParseError {
    #[error("no code block or s-expression found in the response")]
    NoCode,

    #[error("no JSON document found in the response")]
    NoJson,

    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
}
