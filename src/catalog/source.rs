use std::future::Future;
use std::sync::Arc;
#[cfg(feature = "network")]
use std::time::Duration;

use crate::catalog::CatalogError;
use crate::store::schema::Word;

pub const DEFAULT_CATALOG_URL: &str = "https://jlpt-vocab-api.vercel.app/api/words";

/// Remote word catalog.
pub trait WordSource: Send + Sync {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Word>, CatalogError>> + Send;
    fn fetch_random(&self) -> impl Future<Output = Result<Word, CatalogError>> + Send;
}

impl<S: WordSource> WordSource for Arc<S> {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Word>, CatalogError>> + Send {
        (**self).fetch_all()
    }

    fn fetch_random(&self) -> impl Future<Output = Result<Word, CatalogError>> + Send {
        (**self).fetch_random()
    }
}

/// Catalog served over HTTP at `{base_url}/all` and `{base_url}/random`.
pub struct HttpWordSource {
    base_url: String,
    #[cfg(feature = "network")]
    client: reqwest::Client,
}

impl HttpWordSource {
    #[cfg(feature = "network")]
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CatalogError::Custom(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    #[cfg(not(feature = "network"))]
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    #[cfg(feature = "network")]
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, CatalogError> {
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[cfg(feature = "network")]
impl WordSource for HttpWordSource {
    async fn fetch_all(&self) -> Result<Vec<Word>, CatalogError> {
        self.get_json(self.url("all")).await
    }

    async fn fetch_random(&self) -> Result<Word, CatalogError> {
        self.get_json(self.url("random")).await
    }
}

#[cfg(not(feature = "network"))]
impl WordSource for HttpWordSource {
    async fn fetch_all(&self) -> Result<Vec<Word>, CatalogError> {
        Err(CatalogError::Offline)
    }

    async fn fetch_random(&self) -> Result<Word, CatalogError> {
        Err(CatalogError::Offline)
    }
}
