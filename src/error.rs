use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Operator kind outside the generator table.
    #[error("Operator {op} not supported")]
    UnsupportedOperator { op: String },

    /// The frontier holds no node whose outputs are all available.
    #[error("Error in parsing nodes, did not find a next node to compute ({remaining} nodes left)")]
    NoComputableNode { remaining: usize },

    #[error("Invalid {op} node '{node}': {reason}")]
    InvalidNode { op: String, node: String, reason: String },

    #[error("Invalid initializer '{name}': {reason}")]
    InvalidInitializer { name: String, reason: String },

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_node(op: impl Into<String>, node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNode { op: op.into(), node: node.into(), reason: reason.into() }
    }
}
