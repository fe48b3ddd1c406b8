//! Shared types for the streaming cache: upstream records, the
//! `CacheStore` capability trait, store errors and the replay-offset
//! parser.

mod error;
mod offset;
mod store;
mod types;
mod util;

pub use error::{ErrorKind, OffsetError, StoreError};
pub use offset::parse_offset;
pub use store::{eviction_range, CacheStore};
pub use types::{Compaction, Record};
pub use util::{expires_at_ns, now_ns, with_default_scheme};
