#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("connect to upstream {url}: {source}")]
    Connect { url: String, source: reqwest::Error },

    #[error("upstream {url} responded with status {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("upstream stream read: {0}")]
    Stream(#[from] std::io::Error),

    #[error("upstream stream closed")]
    StreamClosed,

    #[error("{0}")]
    Broker(#[from] broker::BrokerError),
}
