//! LIFO resource spool with nestable sub-scopes.
//!
//! A [`Spool`] records reversible side effects (temporary directories and
//! files, spinners, nested scopes) together with the action that undoes them.
//! Releasing always happens from the tail, so a file created inside a
//! temporary directory is removed before the directory itself.
//!
//! # Example
//!
//! ```
//! use capsula_core::Spool;
//!
//! # async fn example() -> capsula_core::Result<()> {
//! let spool = Spool::new();
//! spool.register(String::from("outer"), |name| {
//!     println!("release {name}");
//!     Ok(())
//! });
//!
//! let build = spool.subscope();
//! build.register(String::from("inner"), |name| {
//!     println!("release {name}");
//!     Ok(())
//! });
//!
//! // Releases "inner", then the (now empty) sub-scope, then "outer".
//! spool.release_all().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{CoreError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

type ReleaseFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A resource bound to its release action, type-erased after binding.
trait Release: Send {
    fn release(self: Box<Self>) -> ReleaseFuture;
}

struct Bound<T, F> {
    resource: T,
    release: F,
}

impl<T, F, Fut> Release for Bound<T, F>
where
    T: Send + 'static,
    F: FnOnce(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn release(self: Box<Self>) -> ReleaseFuture {
        let Bound { resource, release } = *self;
        Box::pin(release(resource))
    }
}

struct Entry {
    kind: &'static str,
    /// Set for sub-scope entries, so a drained child can find itself.
    scope: Option<u64>,
    handle: Box<dyn Release>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<Vec<Entry>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let entries = self
            .entries
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !entries.is_empty() {
            let kinds: Vec<&str> = entries.iter().map(|e| e.kind).collect();
            tracing::warn!(
                count = entries.len(),
                kinds = ?kinds,
                "Spool dropped with unreleased resources"
            );
        }
    }
}

/// Ordered stack of release actions.
///
/// Cloning a `Spool` yields another handle to the same stack. This is what
/// makes sub-scopes work: the parent keeps one handle (to drain the child
/// when the parent unwinds) and the caller keeps the other (to register
/// into the child and drain it early).
#[derive(Clone, Default)]
pub struct Spool {
    inner: Arc<Inner>,
    parent: Option<ParentLink>,
}

#[derive(Clone)]
struct ParentLink {
    spool: Weak<Inner>,
    scope: u64,
}

impl std::fmt::Debug for Spool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spool").field("len", &self.len()).finish()
    }
}

impl Spool {
    /// Create an empty spool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource with a synchronous release action.
    pub fn register<T, F>(&self, resource: T, release: F)
    where
        T: Send + 'static,
        F: FnOnce(T) -> Result<()> + Send + 'static,
    {
        self.register_async(resource, move |resource| {
            std::future::ready(release(resource))
        });
    }

    /// Register a resource with an asynchronous release action.
    pub fn register_async<T, F, Fut>(&self, resource: T, release: F)
    where
        T: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(None, resource, release);
    }

    /// Create a child spool registered in this one.
    ///
    /// Releasing the child's entry in the parent drains the child completely,
    /// so the cascade is depth-first. Draining the child first with
    /// [`release_all`](Self::release_all) also removes its entry from the
    /// parent, so the parent only ever holds live sub-scopes.
    pub fn subscope(&self) -> Spool {
        let scope = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        let child = Spool {
            inner: Arc::default(),
            parent: Some(ParentLink {
                spool: Arc::downgrade(&self.inner),
                scope,
            }),
        };
        self.push(Some(scope), child.clone(), |child: Spool| async move {
            child.release_all().await
        });
        child
    }

    /// Release the most recently registered resource.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptySpool`] if nothing is registered, or the
    /// error of the release action itself.
    pub async fn release_one(&self) -> Result<()> {
        let entry = self.pop().ok_or(CoreError::EmptySpool)?;
        tracing::trace!(kind = entry.kind, "Releasing resource");
        entry.handle.release().await
    }

    /// Release every registered resource in reverse registration order.
    ///
    /// A failing release does not stop the unwind: every remaining handle is
    /// still released exactly once and the first error is returned at the end.
    /// Calling this on an empty spool is a no-op. A drained sub-scope is
    /// removed from its parent.
    pub async fn release_all(&self) -> Result<()> {
        let mut first_error = None;
        while let Some(entry) = self.pop() {
            tracing::trace!(kind = entry.kind, "Releasing resource");
            if let Err(e) = entry.handle.release().await {
                tracing::warn!(kind = entry.kind, error = %e, "Failed to release resource");
                first_error.get_or_insert(e);
            }
        }
        if self.is_empty() {
            self.detach();
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of registered, not yet released, resources.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push<T, F, Fut>(&self, scope: Option<u64>, resource: T, release: F)
    where
        T: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kind = std::any::type_name::<T>();
        tracing::trace!(kind, "Spooling resource");
        self.lock().push(Entry {
            kind,
            scope,
            handle: Box::new(Bound { resource, release }),
        });
    }

    /// Remove this sub-scope's entry from its parent, if still there.
    fn detach(&self) {
        let Some(link) = &self.parent else { return };
        let Some(parent) = link.spool.upgrade() else { return };
        let removed = {
            let mut entries = parent.lock();
            entries
                .iter()
                .position(|e| e.scope == Some(link.scope))
                .map(|i| entries.remove(i))
        };
        if removed.is_some() {
            tracing::trace!(scope = link.scope, "Drained sub-scope detached");
        }
    }

    fn pop(&self) -> Option<Entry> {
        self.lock().pop()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(spool: &Spool, log: &Log, name: &str) {
        let log = log.clone();
        spool.register(name.to_string(), move |name| {
            log.lock().unwrap().push(name);
            Ok(())
        });
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_release_all_reverses_registration_order() {
        let log = Log::default();
        let spool = Spool::new();
        for name in ["a", "b", "c", "d"] {
            record(&spool, &log, name);
        }
        assert_eq!(spool.len(), 4);

        spool.release_all().await.unwrap();

        assert_eq!(entries(&log), vec!["d", "c", "b", "a"]);
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_release_one_on_empty_spool_fails() {
        let spool = Spool::new();
        let err = spool.release_one().await.unwrap_err();
        assert!(matches!(err, CoreError::EmptySpool));
    }

    #[tokio::test]
    async fn test_release_all_on_empty_spool_is_noop() {
        let spool = Spool::new();
        spool.release_all().await.unwrap();
        spool.release_all().await.unwrap();
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_release_one_pops_only_the_tail() {
        let log = Log::default();
        let spool = Spool::new();
        record(&spool, &log, "first");
        record(&spool, &log, "second");

        spool.release_one().await.unwrap();

        assert_eq!(entries(&log), vec!["second"]);
        assert_eq!(spool.len(), 1);
    }

    #[tokio::test]
    async fn test_subscope_cascades_depth_first() {
        let log = Log::default();
        let spool = Spool::new();
        record(&spool, &log, "a");
        let sub = spool.subscope();
        record(&sub, &log, "b");
        record(&sub, &log, "c");
        record(&spool, &log, "d");

        spool.release_all().await.unwrap();

        assert_eq!(entries(&log), vec!["d", "c", "b", "a"]);
        assert!(sub.is_empty());
    }

    #[tokio::test]
    async fn test_nested_subscopes() {
        let log = Log::default();
        let spool = Spool::new();
        let outer = spool.subscope();
        record(&outer, &log, "outer-1");
        let inner = outer.subscope();
        record(&inner, &log, "inner-1");
        record(&inner, &log, "inner-2");
        record(&outer, &log, "outer-2");

        spool.release_all().await.unwrap();

        assert_eq!(
            entries(&log),
            vec!["outer-2", "inner-2", "inner-1", "outer-1"]
        );
    }

    #[tokio::test]
    async fn test_subscope_drained_early_is_not_released_twice() {
        let log = Log::default();
        let spool = Spool::new();
        let sub = spool.subscope();
        record(&sub, &log, "tmpdir");
        record(&sub, &log, "file");

        sub.release_all().await.unwrap();
        assert_eq!(entries(&log), vec!["file", "tmpdir"]);
        assert!(spool.is_empty());

        spool.release_all().await.unwrap();
        assert_eq!(entries(&log), vec!["file", "tmpdir"]);
    }

    #[tokio::test]
    async fn test_drained_subscopes_do_not_accumulate() {
        let log = Log::default();
        let spool = Spool::new();
        record(&spool, &log, "root");
        for i in 0..3 {
            let sub = spool.subscope();
            record(&sub, &log, &format!("build-{i}"));
            sub.release_all().await.unwrap();
        }
        assert_eq!(spool.len(), 1);

        // Only the drained child is removed, not a sibling registered after it.
        let drained = spool.subscope();
        let live = spool.subscope();
        record(&live, &log, "live");
        drained.release_all().await.unwrap();
        assert_eq!(spool.len(), 2);

        spool.release_all().await.unwrap();
        assert_eq!(
            entries(&log),
            vec!["build-0", "build-1", "build-2", "live", "root"]
        );
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn test_partially_released_subscope_stays_in_parent() {
        let log = Log::default();
        let spool = Spool::new();
        let sub = spool.subscope();
        record(&sub, &log, "a");
        record(&sub, &log, "b");

        sub.release_one().await.unwrap();
        assert_eq!(spool.len(), 1);

        spool.release_all().await.unwrap();
        assert_eq!(entries(&log), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_async_release_is_awaited() {
        let log = Log::default();
        let spool = Spool::new();
        record(&spool, &log, "sync");
        let async_log = log.clone();
        spool.register_async(Duration::from_millis(5), move |delay| async move {
            tokio::time::sleep(delay).await;
            async_log.lock().unwrap().push("async".to_string());
            Ok(())
        });

        spool.release_one().await.unwrap();
        assert_eq!(entries(&log), vec!["async"]);

        spool.release_all().await.unwrap();
        assert_eq!(entries(&log), vec!["async", "sync"]);
    }

    #[tokio::test]
    async fn test_failed_release_does_not_stop_unwind() {
        let log = Log::default();
        let spool = Spool::new();
        record(&spool, &log, "a");
        spool.register((), |_| Err(CoreError::Config("first failure".into())));
        record(&spool, &log, "b");
        spool.register((), |_| Err(CoreError::Config("second failure".into())));

        let err = spool.release_all().await.unwrap_err();

        assert!(err.to_string().contains("second failure"));
        assert_eq!(entries(&log), vec!["b", "a"]);
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_releases_typed_resources() {
        let spool = Spool::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        spool.register(dir, |dir| dir.close().map_err(CoreError::from));

        assert!(path.exists());
        spool.release_all().await.unwrap();
        assert!(!path.exists());
    }
}
