//! Single-flight `GetWithFiller`: deduplicates concurrent misses for the
//! same key so that, cluster-wide best-effort and per-process strictly,
//! exactly one filler invocation is in flight per key at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::cache::now_ns;
use crate::error::FillerError;
use crate::peer::Peer;

type InFlight = Shared<BoxFuture<'static, Result<String, FillerError>>>;

/// Wraps a `Peer` with a single-flight filler for cold-key misses.
pub struct Filler {
    peer: Arc<Peer>,
    inflight: Mutex<HashMap<String, InFlight>>,
    /// Count of filler closures actually started (joining an in-flight
    /// call doesn't count). Exposed for the `filler_invocations_total`
    /// metric.
    invocations: AtomicU64,
}

impl Filler {
    pub fn new(peer: Arc<Peer>) -> Self {
        Self {
            peer,
            inflight: Mutex::new(HashMap::new()),
            invocations: AtomicU64::new(0),
        }
    }

    /// Total filler closures started so far. Monotonically increasing.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// `Get(key)`; on a miss, invoke `filler` (deduplicated per key across
    /// concurrent callers), and on success `Set(key, value, now + ttl)`.
    /// A `None` filler fails immediately, before any lookup, with
    /// `FillerError::NilFiller`.
    pub async fn get_with_filler<F, Fut>(
        &self,
        key: &str,
        filler: Option<F>,
        ttl_seconds: i64,
    ) -> Result<String, FillerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, FillerError>> + Send + 'static,
    {
        let Some(filler) = filler else {
            return Err(FillerError::NilFiller);
        };

        let (value, present) = self.peer.get(key);
        if present {
            return Ok(value);
        }

        let shared = self.join_or_start(key, filler).await;
        let result = shared.await;

        // The slot is released once the flight completes, regardless of
        // outcome, so a later miss re-invokes the filler.
        self.inflight.lock().await.remove(key);

        match result {
            Ok(value) => {
                let expired = now_ns() + ttl_seconds.saturating_mul(1_000_000_000);
                self.peer.set(key.to_string(), value.clone(), expired).await;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    async fn join_or_start<F, Fut>(&self, key: &str, filler: F) -> InFlight
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, FillerError>> + Send + 'static,
    {
        let mut guard = self.inflight.lock().await;
        if let Some(existing) = guard.get(key) {
            return existing.clone();
        }
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let boxed: BoxFuture<'static, Result<String, FillerError>> = Box::pin(filler());
        let shared = boxed.shared();
        guard.insert(key.to_string(), shared.clone());
        shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn peer() -> Arc<Peer> {
        Arc::new(Peer::new(1, 100).expect("peer"))
    }

    #[tokio::test]
    async fn hit_returns_cached_value_without_calling_filler() {
        let p = peer();
        p.set("x", "cached", 0).await;
        let filler = Filler::new(p);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = filler
            .get_with_filler(
                "x",
                Some(move || {
                    calls2.fetch_add(1, Ordering::SeqCst);
                    async { Ok("never".to_string()) }
                }),
                600,
            )
            .await;
        assert_eq!(result.unwrap(), "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_invokes_filler_and_populates_cache() {
        let p = peer();
        let filler = Filler::new(p.clone());
        let result = filler
            .get_with_filler("x", Some(|| async { Ok("computed".to_string()) }), 600)
            .await;
        assert_eq!(result.unwrap(), "computed");
        assert_eq!(p.get("x"), ("computed".to_string(), true));
    }

    #[tokio::test]
    async fn nil_filler_fails_before_lookup() {
        let p = peer();
        let filler = Filler::new(p);
        let result: Result<String, FillerError> = filler
            .get_with_filler::<fn() -> std::future::Ready<Result<String, FillerError>>, _>(
                "x", None, 600,
            )
            .await;
        assert!(matches!(result, Err(FillerError::NilFiller)));
    }

    #[tokio::test]
    async fn filler_error_is_not_cached() {
        let p = peer();
        let filler = Filler::new(p.clone());
        let result = filler
            .get_with_filler(
                "x",
                Some(|| async { Err(FillerError::Failed("boom".into())) }),
                600,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(p.get("x"), (String::new(), false));
    }

    #[tokio::test]
    async fn concurrent_misses_invoke_filler_exactly_once() {
        let p = peer();
        let filler = Arc::new(Filler::new(p.clone()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let filler = filler.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                filler
                    .get_with_filler(
                        "x",
                        Some(move || {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok("shared-value".to_string())
                            }
                        }),
                        600,
                    )
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared-value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.get("x"), ("shared-value".to_string(), true));
    }

    #[tokio::test]
    async fn concurrent_misses_count_as_a_single_invocation() {
        let p = peer();
        let filler = Arc::new(Filler::new(p));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let filler = filler.clone();
            handles.push(tokio::spawn(async move {
                filler
                    .get_with_filler(
                        "x",
                        Some(|| async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok("v".to_string())
                        }),
                        600,
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(filler.invocations(), 1);
    }

    #[tokio::test]
    async fn hit_does_not_count_as_an_invocation() {
        let p = peer();
        p.set("x", "cached", 0).await;
        let filler = Filler::new(p);
        filler
            .get_with_filler("x", Some(|| async { Ok("never".to_string()) }), 600)
            .await
            .unwrap();
        assert_eq!(filler.invocations(), 0);
    }
}
