#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("cache store: {0}")]
    Store(#[from] cache_api::StoreError),

    #[error("topic '{topic}': {source}")]
    Ingest { topic: String, source: ingest::IngestError },

    #[error("http server: {0}")]
    Bind(std::io::Error),

    #[error("task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(std::io::Error),
}
