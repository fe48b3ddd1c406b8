use futures::TryStreamExt;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use crate::IngestError;

/// HTTP long-lived upstream stream for one topic.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl Upstream {
    /// `base_url` + `path`, e.g. `http://backend:6000` + `/filings`.
    ///
    /// A non-empty `api_key` is sent as the basic-auth username with an
    /// empty password.
    pub fn new(client: reqwest::Client, base_url: &str, path: &str, api_key: &str) -> Self {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let api_key = (!api_key.is_empty()).then(|| api_key.to_string());
        Self { client, url, api_key }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the stream. Anything but `200 OK` is an error.
    ///
    /// The body is returned as a buffered reader over the chunked
    /// response; records are newline-delimited.
    pub async fn connect(&self) -> Result<impl AsyncBufRead + Unpin + Send + use<>, IngestError> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.basic_auth(key, Some(""));
        }

        let response = request.send().await.map_err(|source| IngestError::Connect {
            url: self.url.clone(),
            source,
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(IngestError::Status { url: self.url.clone(), status });
        }
        tracing::info!(url = %self.url, "connected to upstream");

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(StreamReader::new(body))
    }
}
