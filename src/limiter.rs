//! Bounded in-flight request counting for a single backend.
//!
//! [`Limiter`] is a counting semaphore owned by one backend client.
//! Acquisition is cancellable; deadlines are applied by the caller with
//! `tokio::time::timeout` around the acquire future, matching how the
//! backend client brackets its whole request.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{FanoutError, Result};

/// A counting semaphore with capacity `N >= 0`.
///
/// Capacity 0 means unlimited: acquire and release become no-ops. The
/// in-use count never exceeds capacity, and [`release`](Self::release)
/// must only be called after a successful [`acquire`](Self::acquire);
/// an unpaired release is reported as an invariant violation.
#[derive(Debug, Clone)]
pub struct Limiter {
    semaphore: Option<Arc<Semaphore>>,
    capacity: usize,
}

impl Limiter {
    /// Create a limiter with the given capacity. 0 disables limiting.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            capacity,
        }
    }

    /// A limiter that never blocks.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held. Always 0 for an unlimited limiter.
    pub fn in_use(&self) -> usize {
        match &self.semaphore {
            Some(sem) => self.capacity - sem.available_permits(),
            None => 0,
        }
    }

    /// Take a permit, waiting until one frees up or `ctx` is cancelled.
    ///
    /// Returns [`FanoutError::Cancelled`] without consuming a permit
    /// when the context fires first.
    pub async fn acquire(&self, ctx: &CancellationToken) -> Result<()> {
        let Some(sem) = &self.semaphore else {
            return Ok(());
        };

        if ctx.is_cancelled() {
            counter!("fanout_limiter_rejections_total").increment(1);
            return Err(FanoutError::Cancelled);
        }

        tokio::select! {
            _ = ctx.cancelled() => {
                counter!("fanout_limiter_rejections_total").increment(1);
                Err(FanoutError::Cancelled)
            }
            permit = sem.acquire() => match permit {
                Ok(permit) => {
                    // Held until the paired release().
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(FanoutError::InvariantViolation(
                    "limiter semaphore closed".into(),
                )),
            }
        }
    }

    /// Return a permit taken by [`acquire`](Self::acquire).
    ///
    /// Fails when the limiter already holds its full capacity, which is
    /// symptomatic of an unpaired acquire/release.
    pub fn release(&self) -> Result<()> {
        let Some(sem) = &self.semaphore else {
            return Ok(());
        };

        if sem.available_permits() >= self.capacity {
            return Err(FanoutError::InvariantViolation(
                "limiter released more times than acquired".into(),
            ));
        }

        sem.add_permits(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_unlimited_acquire_release_are_noops() {
        let limiter = Limiter::unlimited();
        let ctx = CancellationToken::new();

        // Works even with a cancelled context.
        ctx.cancel();
        assert!(limiter.acquire(&ctx).await.is_ok());
        assert!(limiter.release().is_ok());
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_acquire_then_release() {
        let limiter = Limiter::new(1);
        let ctx = CancellationToken::new();

        limiter.acquire(&ctx).await.unwrap();
        assert_eq!(limiter.in_use(), 1);

        limiter.release().unwrap();
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_in_use_tracks_paired_operations() {
        let limiter = Limiter::new(3);
        let ctx = CancellationToken::new();

        limiter.acquire(&ctx).await.unwrap();
        limiter.acquire(&ctx).await.unwrap();
        assert_eq!(limiter.in_use(), 2);

        limiter.release().unwrap();
        assert_eq!(limiter.in_use(), 1);

        limiter.acquire(&ctx).await.unwrap();
        assert_eq!(limiter.in_use(), 2);

        limiter.release().unwrap();
        limiter.release().unwrap();
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_invariant_violation() {
        let limiter = Limiter::new(1);

        let err = limiter.release().unwrap_err();
        assert!(matches!(err, FanoutError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_acquire_full_limiter_times_out() {
        let limiter = Limiter::new(1);
        let ctx = CancellationToken::new();

        limiter.acquire(&ctx).await.unwrap();

        // Second acquire with an already-expired deadline fails fast.
        let blocked = timeout(Duration::ZERO, limiter.acquire(&ctx)).await;
        assert!(blocked.is_err());

        // The permit from the first acquire is still held.
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test]
    async fn test_acquire_cancelled_while_waiting() {
        let limiter = Limiter::new(1);
        let ctx = CancellationToken::new();

        limiter.acquire(&ctx).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { limiter.acquire(&ctx).await })
        };

        tokio::task::yield_now().await;
        ctx.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, FanoutError::Cancelled));
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test]
    async fn test_acquire_pre_cancelled_context() {
        let limiter = Limiter::new(1);
        let ctx = CancellationToken::new();
        ctx.cancel();

        let err = limiter.acquire(&ctx).await.unwrap_err();
        assert!(matches!(err, FanoutError::Cancelled));
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_blocked_acquire_proceeds_after_release() {
        let limiter = Limiter::new(1);
        let ctx = CancellationToken::new();

        limiter.acquire(&ctx).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { limiter.acquire(&ctx).await })
        };

        tokio::task::yield_now().await;
        limiter.release().unwrap();

        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.in_use(), 1);
        limiter.release().unwrap();
    }
}
