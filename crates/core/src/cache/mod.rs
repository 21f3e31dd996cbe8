//! In-process caches.
//!
//! - [`PageCache`]: stale-while-revalidate memoization of page content
//! - [`DerivativeCache`]: content-addressed on-disk image derivatives
//!
//! Both deduplicate concurrent misses through [`SingleFlight`](crate::flight::SingleFlight).

pub mod derivative;
pub mod format;
pub mod hash;
pub mod page;

pub use derivative::{DerivativeCache, DerivativeCacheConfig, DerivativeKey, SourceFetcher, Transformer};
pub use format::OutputFormat;
pub use hash::hash_source_url;
pub use page::{PageCache, PageCacheConfig};
