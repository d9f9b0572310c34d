//! SID to account name cache.
//!
//! SID bindings are treated as permanent for the lifetime of the process, so
//! entries are never evicted and never replaced once stored.

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::MembershipResult;
use crate::traits::DirectoryClient;

/// Append-only map from SID to resolved account name.
///
/// Constructed once by the composition root and shared by reference.
#[derive(Debug, Default)]
pub struct SidCache {
    entries: DashMap<String, String>,
}

impl SidCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached account name for a SID, without touching the directory.
    #[must_use]
    pub fn get(&self, sid: &str) -> Option<String> {
        self.entries.get(&cache_key(sid)).map(|v| v.value().clone())
    }

    /// Number of cached SIDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a SID to an account name, consulting the directory on a miss.
    ///
    /// A SID the directory does not know resolves to itself, and that answer
    /// is cached as well. Concurrent misses for the same SID may each reach
    /// the directory; whichever value is stored first is the one every
    /// caller gets back.
    #[instrument(skip(self, directory))]
    pub async fn resolve(
        &self,
        sid: &str,
        directory: &dyn DirectoryClient,
    ) -> MembershipResult<String> {
        let key = cache_key(sid);
        if let Some(name) = self.entries.get(&key) {
            return Ok(name.value().clone());
        }

        let resolved = directory
            .reverse_resolve_sid(sid.trim())
            .await?
            .unwrap_or_else(|| sid.trim().to_string());

        debug!(sid = %key, account = %resolved, "Caching SID resolution");

        let stored = self.entries.entry(key).or_insert(resolved);
        Ok(stored.value().clone())
    }
}

fn cache_key(sid: &str) -> String {
    sid.trim().to_ascii_uppercase()
}
