//! Lazy, cached construction of per-service API clients.
//!
//! Each (provider, sub-service) pair owns one [`ClientSlot`]. The slot's mutex
//! is held across the whole check-and-create sequence, so concurrent first
//! callers are serialized: exactly one factory invocation happens and every
//! caller receives the same client instance.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

/// A lazily initialized, resettable slot holding one shared client.
pub struct ClientSlot<T: ?Sized> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> ClientSlot<T> {
    pub fn empty() -> Self {
        ClientSlot {
            slot: Mutex::new(None),
        }
    }

    /// Return the cached client, building it through `factory` on first use.
    ///
    /// The internal lock is held while the factory runs; a failed construction
    /// leaves the slot empty so the next caller retries.
    pub async fn get_or_init<F, Fut>(
        &self,
        factory: F,
    ) -> Result<Arc<T>, Box<dyn Error + Send + Sync>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, Box<dyn Error + Send + Sync>>>,
    {
        let mut guard = self.slot.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let built = factory().await?;
        *guard = Some(Arc::clone(&built));
        Ok(built)
    }

    /// Drop the cached client so the next call rebuilds it.
    pub async fn reset(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn is_initialized(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl<T: ?Sized> Default for ClientSlot<T> {
    fn default() -> Self {
        ClientSlot::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_first_use_builds_exactly_once() {
        let slot: Arc<ClientSlot<u64>> = Arc::new(ClientSlot::empty());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let slot = Arc::clone(&slot);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                slot.get_or_init(|| async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    // Widen the race window so losers really do contend.
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok(Arc::new(42u64))
                })
                .await
                .unwrap()
            }));
        }

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        let first = &clients[0];
        for client in &clients {
            assert!(Arc::ptr_eq(first, client));
        }
    }

    #[tokio::test]
    async fn failed_construction_leaves_slot_empty() {
        let slot: ClientSlot<u64> = ClientSlot::empty();
        let result = slot
            .get_or_init(|| async { Err("no credentials".into()) })
            .await;
        assert!(result.is_err());
        assert!(!slot.is_initialized().await);

        let ok = slot.get_or_init(|| async { Ok(Arc::new(7u64)) }).await;
        assert_eq!(*ok.unwrap(), 7);
    }

    #[tokio::test]
    async fn reset_forces_rebuild() {
        let slot: ClientSlot<u64> = ClientSlot::empty();
        let builds = AtomicUsize::new(0);

        let a = slot
            .get_or_init(|| async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(1u64))
            })
            .await
            .unwrap();
        slot.reset().await;
        let b = slot
            .get_or_init(|| async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(2u64))
            })
            .await
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
    }
}
