//! Query backend abstraction and the HTTP implementation.

use serde::Serialize;
use signal_map_config::BackendConfig;
use signal_map_query_models::{QueryResponse, QueryState};

/// Errors returned by a [`QueryBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request could not be sent or its body not read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body is not a valid query response.
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Something that answers map queries.
#[async_trait::async_trait]
pub trait QueryBackend: Send + Sync {
    /// Runs one query.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails for any reason.
    async fn query(&self, query: &QueryState) -> Result<QueryResponse, BackendError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataSource<'a> {
    source_type: &'static str,
    format: &'static str,
    source: String,
    file_name: &'a str,
}

/// Body of a `/data/fetch` request: the query plus the dataset it runs on.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest<'a> {
    #[serde(flatten)]
    query: &'a QueryState,
    data_source: DataSource<'a>,
    data_type: &'static str,
}

/// Posts queries to the dataset backend over HTTP.
pub struct HttpQueryBackend {
    config: BackendConfig,
    client: reqwest::Client,
}

impl HttpQueryBackend {
    /// Creates a backend with the configured base URL and timeout.
    ///
    /// # Errors
    ///
    /// * If the HTTP client cannot be built
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { config, client })
    }

    fn request<'a>(&'a self, query: &'a QueryState) -> FetchRequest<'a> {
        FetchRequest {
            query,
            data_source: DataSource {
                source_type: "local",
                format: "rawvis",
                source: self.config.dataset_source(),
                file_name: &self.config.dataset_id,
            },
            data_type: "map",
        }
    }
}

#[async_trait::async_trait]
impl QueryBackend for HttpQueryBackend {
    async fn query(&self, query: &QueryState) -> Result<QueryResponse, BackendError> {
        let url = self.config.fetch_url();
        log::debug!("POST {url} zoom={} rect={:?}", query.zoom, query.rect);

        let resp = self
            .client
            .post(&url)
            .json(&self.request(query))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
