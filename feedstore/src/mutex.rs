//! Async mutex with an explicit release handle
//!
//! Unlike a scoped guard, the returned `Releaser` is `'static` and can move
//! across task boundaries, which the store needs when a critical section
//! spans watcher dispatch on another task. Waiters are served in FIFO order.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// FIFO async mutex handing out single-use release handles.
pub struct Mutex {
    semaphore: Arc<Semaphore>,
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Suspend until the mutex is free and take it.
    pub async fn acquire(&self) -> Releaser {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("mutex semaphore never closes");
        Releaser { _permit: permit }
    }

    /// Take the mutex only if it is free right now.
    pub fn try_acquire(&self) -> Option<Releaser> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| Releaser { _permit: permit })
    }

    /// True while some caller holds the mutex.
    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-use release handle. Consuming it (or dropping it) frees the mutex;
/// the type system makes a double release unrepresentable.
#[must_use = "dropping the releaser frees the mutex immediately"]
pub struct Releaser {
    _permit: OwnedSemaphorePermit,
}

impl Releaser {
    /// Release the mutex.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_exclusive() {
        let mutex = Arc::new(Mutex::new());
        let releaser = mutex.acquire().await;

        assert!(mutex.is_locked());
        assert!(mutex.try_acquire().is_none());

        releaser.release();
        assert!(!mutex.is_locked());
        assert!(mutex.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_release_from_another_task() {
        let mutex = Arc::new(Mutex::new());
        let releaser = mutex.acquire().await;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            releaser.release();
        });

        // Blocks until the spawned task releases.
        let second = mutex.acquire().await;
        second.release();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_ordering() {
        let mutex = Arc::new(Mutex::new());
        let order = Arc::new(AtomicUsize::new(0));

        let first = mutex.acquire().await;
        let mut handles = Vec::new();
        for i in 0..4 {
            let mutex = mutex.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let releaser = mutex.acquire().await;
                let turn = order.fetch_add(1, Ordering::SeqCst);
                releaser.release();
                (i, turn)
            }));
            // Give each waiter time to queue before the next.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        first.release();
        for handle in handles {
            let (i, turn) = handle.await.unwrap();
            assert_eq!(i, turn, "waiter {i} served out of order");
        }
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let mutex = Mutex::new();
        {
            let _releaser = mutex.acquire().await;
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
    }
}
