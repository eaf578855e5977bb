use crate::config::ConfigError;
use streams_protocol::{ProtocolError, Status};
use thiserror::Error;

/// Errors that stop a session from being opened. Once a session is running
/// its outcome is reported as a [`Status`] instead.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Setup handshake failed: {0}")]
    Handshake(Status),

    #[error("Connection error: {0}")]
    Connect(#[from] ProtocolError),

    #[error("Failed to start {task} thread: {source}")]
    Spawn {
        task: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl ClientError {
    /// The server's status if the handshake was rejected
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::Handshake(status) => Some(status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
