pub mod cache;
pub mod messaging;
pub mod source;

use thiserror::Error;

pub use cache::CachedCatalog;
pub use source::{HttpWordSource, WordSource};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[cfg(feature = "network")]
    #[error("HTTP error: {0}")]
    Http(Box<reqwest::Error>),

    #[error("HTTP error {status} from {url}")]
    Status { status: u16, url: String },

    #[error("catalog response is not a word list: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("built without network support")]
    Offline,

    #[error("{0}")]
    Custom(String),
}

#[cfg(feature = "network")]
impl From<reqwest::Error> for CatalogError {
    fn from(error: reqwest::Error) -> Self {
        CatalogError::Http(Box::new(error))
    }
}
