//! Cache implementations
//!
//! - `MokaCache`: in-memory cache honouring the TTL of every entry

mod moka_cache;

pub use moka_cache::{MokaCache, MokaCacheConfig};
