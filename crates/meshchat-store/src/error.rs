use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The MAC address already belongs to a different node.
    #[error(
        "MAC address {mac_address} already belongs to node {}, refusing to assign it to {}",
        .existing_node_id.as_deref().unwrap_or("<unidentified>"),
        .requested_node_id.as_deref().unwrap_or("<unidentified>")
    )]
    Conflict {
        mac_address: String,
        existing_node_id: Option<String>,
        requested_node_id: Option<String>,
    },

    /// An upsert carried neither a node id nor a MAC address.
    #[error("Node update carries neither a node id nor a MAC address")]
    MissingIdentity,

    /// The referenced node is not in the directory.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error.
    #[error("Snapshot error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Whether this error comes from durable storage rather than from the
    /// data itself.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(_) | Self::NoDataDir | Self::Io(_) | Self::Json(_) | Self::Migration(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
