use thiserror::Error;

use meshchat_radio::RadioError;
use meshchat_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("Not connected to a radio, message not sent")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,
}

pub type Result<T> = std::result::Result<T, ClientError>;
