//! Local state for Repo Rover
//!
//! Sessions live only in process memory. Papers, concept maps and their
//! bookkeeping persist as JSON files under the cache directory.

pub mod error;
pub mod files;
pub mod paper_cache;
pub mod sessions;

pub use error::{Result, StoreError};
pub use files::{is_nonempty_file, write_atomic};
pub use paper_cache::{CacheEntry, CacheStats, CachedPaperSummary, PaperCache};
pub use sessions::{SessionHandle, SessionStore};
