//! Content-addressed derivative key generation.

use sha2::{Digest, Sha256};

/// Hash a source image URL into the directory component of its derivatives.
///
/// The URL is hashed exactly as given, so callers wanting two spellings of
/// one URL to share derivatives must normalize before resolving.
pub fn hash_source_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
