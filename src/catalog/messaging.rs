use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::catalog::{CachedCatalog, WordSource};
use crate::store::schema::Word;

const REQUEST_QUEUE: usize = 16;

pub enum Request {
    /// Always hit the catalog and refresh the cache.
    FetchWords { reply: oneshot::Sender<FetchWordsResponse> },
    /// Cache first, fetching only when stale.
    LoadWords { reply: oneshot::Sender<FetchWordsResponse> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchWordsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Word>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchWordsResponse {
    pub fn ok(words: Vec<Word>) -> Self {
        Self {
            success: true,
            data: Some(words),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Sending side of the background surface's request channel.
#[derive(Clone)]
pub struct BackgroundHandle {
    requests: mpsc::Sender<Request>,
}

impl BackgroundHandle {
    pub async fn fetch_words(&self) -> FetchWordsResponse {
        self.call(|reply| Request::FetchWords { reply }).await
    }

    pub async fn load_words(&self) -> FetchWordsResponse {
        self.call(|reply| Request::LoadWords { reply }).await
    }

    async fn call(
        &self,
        request: impl FnOnce(oneshot::Sender<FetchWordsResponse>) -> Request,
    ) -> FetchWordsResponse {
        let (reply, response) = oneshot::channel();
        if self.requests.send(request(reply)).await.is_err() {
            return FetchWordsResponse::failed("background surface is not running");
        }
        response
            .await
            .unwrap_or_else(|_| FetchWordsResponse::failed("background surface dropped the request"))
    }
}

/// Start the background surface: it owns the catalog cache and answers
/// requests until every handle is dropped.
pub fn spawn_background<S>(catalog: CachedCatalog<S>) -> BackgroundHandle
where
    S: WordSource + 'static,
{
    let (requests, mut incoming) = mpsc::channel(REQUEST_QUEUE);
    tokio::spawn(async move {
        while let Some(request) = incoming.recv().await {
            let (result, reply) = match request {
                Request::FetchWords { reply } => (catalog.refresh(Utc::now()).await, reply),
                Request::LoadWords { reply } => (catalog.load(Utc::now()).await, reply),
            };
            let response = match result {
                Ok(words) => FetchWordsResponse::ok(words),
                Err(e) => {
                    warn!("error fetching words: {e}");
                    FetchWordsResponse::failed(e.to_string())
                }
            };
            if reply.send(response).is_err() {
                debug!("requester went away before the reply");
            }
        }
    });
    BackgroundHandle { requests }
}
