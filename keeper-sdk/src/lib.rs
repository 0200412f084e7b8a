//! Client for the keeper vault RPC API.

mod http_client;
pub mod wire;

pub use http_client::HttpClient;
pub use wire::{
    ApiError, AuthResponse, SaveSecretResponse, Secret, ValueEncoding, VersionEntry, VersionState,
};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}) {error}: {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SdkError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Api { status, .. } => Some(*status),
            SdkError::Http(err) => err.status().map(|status| status.as_u16()),
            SdkError::InvalidResponse(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
