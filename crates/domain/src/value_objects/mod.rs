//! Value objects - Immutable types defined by their attributes

mod audio_format;
mod cache_key;
mod provider_identity;

pub use audio_format::AudioFormat;
pub use cache_key::{ANY_PROVIDER, CacheKey};
pub use provider_identity::{ProviderCategory, ProviderIdentity};
