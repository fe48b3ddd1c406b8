pub mod error;
mod compaction;
mod source;
mod upstream;

pub use compaction::spawn_compaction;
pub use error::IngestError;
pub use source::{ingest_lines, run_ingest, IngestStats};
pub use upstream::Upstream;
