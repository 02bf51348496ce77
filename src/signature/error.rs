use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature at offset {position}: {message}")]
    InvalidSignature { message: String, position: usize },

    #[error("type mismatch at {path}: expected {expected}, received {received}")]
    TypeMismatch {
        path: String,
        expected: String,
        received: String,
    },

    #[error("missing required field {path}")]
    MissingRequired { path: String },

    #[error("template placeholder {{{{{name}}}}} is not bound by any signature parameter")]
    PlaceholderUnbound { name: String },
}
