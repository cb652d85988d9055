//! Per-module context cache.
//!
//! Module tokens are resolved once per loaded module and then read by every method
//! rewrite in that module, potentially from several JIT worker threads at once.
//! [`ModuleCache`] exposes that as a single atomic `get_or_insert_with`: concurrent
//! lookups for the same module either perform the one populate or observe the
//! completed entry; a failed populate inserts nothing, so a later lookup retries
//! cleanly and no partially-built entry is ever published.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{metadata::context::ModuleTokens, Result};

/// Concurrent map from module identity to its resolved token record.
///
/// # Examples
///
/// ```rust
/// use ilweave::cache::ModuleCache;
/// use ilweave::metadata::context::ModuleTokens;
/// use ilweave::metadata::token::Token;
///
/// let cache = ModuleCache::new();
/// let tokens = cache.get_or_insert_with(1, || {
///     Ok(ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001)))
/// })?;
/// assert!(tokens.is_valid());
/// # Ok::<(), ilweave::Error>(())
/// ```
#[derive(Default)]
pub struct ModuleCache {
    modules: DashMap<u64, Arc<ModuleTokens>>,
}

impl ModuleCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        ModuleCache {
            modules: DashMap::new(),
        }
    }

    /// Number of modules with a completed entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no module has been populated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Look up a module's tokens, populating the entry on first use.
    ///
    /// The populate closure runs at most once per module; concurrent callers for
    /// the same module serialize on the entry and then share the stored record.
    ///
    /// # Errors
    /// Propagates the populate error without inserting anything, leaving other
    /// in-flight rewrites and later retries unaffected.
    pub fn get_or_insert_with<F>(&self, module_id: u64, populate: F) -> Result<Arc<ModuleTokens>>
    where
        F: FnOnce() -> Result<ModuleTokens>,
    {
        match self.modules.entry(module_id) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let tokens = Arc::new(populate()?);
                entry.insert(Arc::clone(&tokens));
                Ok(tokens)
            }
        }
    }

    /// Look up a module's tokens without populating.
    #[must_use]
    pub fn get(&self, module_id: u64) -> Option<Arc<ModuleTokens>> {
        self.modules
            .get(&module_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a module's entry when the runtime unloads it.
    pub fn remove(&self, module_id: u64) {
        self.modules.remove(&module_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    fn tokens() -> ModuleTokens {
        ModuleTokens::new(Token::new(0x0100_0001), Token::new(0x0A00_0001))
    }

    #[test]
    fn populate_runs_once() {
        let cache = ModuleCache::new();
        let mut runs = 0;

        for _ in 0..3 {
            let entry = cache
                .get_or_insert_with(7, || {
                    runs += 1;
                    Ok(tokens())
                })
                .unwrap();
            assert!(entry.is_valid());
        }

        assert_eq!(runs, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_populate_inserts_nothing() {
        let cache = ModuleCache::new();

        let result = cache.get_or_insert_with(7, || {
            Err(crate::Error::ResolutionFailed("probe assembly not loaded".to_string()))
        });
        assert!(result.is_err());
        assert!(cache.get(7).is_none());

        // a later attempt may succeed
        assert!(cache.get_or_insert_with(7, || Ok(tokens())).is_ok());
    }

    #[test]
    fn entries_are_independent_per_module() {
        let cache = ModuleCache::new();
        cache.get_or_insert_with(1, || Ok(tokens())).unwrap();
        cache.get_or_insert_with(2, || Ok(tokens())).unwrap();

        assert_eq!(cache.len(), 2);
        cache.remove(1);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn concurrent_lookups_share_one_populate() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = Arc::new(ModuleCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    let entry = cache
                        .get_or_insert_with(42, || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(tokens())
                        })
                        .unwrap();
                    assert!(entry.is_valid());
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
