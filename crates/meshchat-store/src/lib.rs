//! # meshchat-store
//!
//! Durable state for the mesh chat client: the node directory and the
//! conversation logs, both kept in one SQLite file.
//!
//! Each store owns its own [`Database`] connection. Mutations are written in
//! a transaction first and reach the in-memory view only once committed.

pub mod conversations;
pub mod database;
pub mod migrations;
pub mod models;
pub mod nodes;
pub mod snapshot;

mod error;

pub use conversations::ConversationStore;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use nodes::NodeDirectory;
pub use snapshot::{ConversationLog, ImportStats};
