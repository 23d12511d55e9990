//! Registry of live transcoder subprocesses, keyed by task.
//!
//! Each running strategy registers a cancel handle before spawning its
//! subprocess and deregisters on terminal transition. `cancel_all` fires
//! every handle so the owning runner force-kills its child.

use crate::tasks::TaskKey;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Tracks one cancel handle per live subprocess.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<TaskKey, oneshot::Sender<()>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task about to spawn a subprocess.
    ///
    /// Returns the receiving half the runner selects on; resolving it means
    /// the task must kill its child. Registering the same key again replaces
    /// the previous handle.
    pub fn register(&self, key: &TaskKey) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.inner.lock() {
            map.insert(key.clone(), tx);
        }
        rx
    }

    /// Removes a task's handle after its terminal transition.
    pub fn deregister(&self, key: &TaskKey) -> bool {
        self.inner
            .lock()
            .map(|mut map| map.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Fires every registered cancel handle and clears the registry.
    ///
    /// Idempotent and safe to call when nothing is running. Returns how many
    /// handles were fired.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<oneshot::Sender<()>> = match self.inner.lock() {
            Ok(mut map) => map.drain().map(|(_, tx)| tx).collect(),
            Err(_) => return 0,
        };
        let count = handles.len();
        for handle in handles {
            let _ = handle.send(());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: usize) -> TaskKey {
        TaskKey::new(format!("/v/clip{}.mp4", n), "web-standard")
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = ProcessRegistry::new();
        let _rx = registry.register(&key(0));
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister(&key(0)));
        assert!(registry.is_empty());
        assert!(!registry.deregister(&key(0)));
    }

    #[tokio::test]
    async fn test_cancel_all_fires_every_handle() {
        let registry = ProcessRegistry::new();
        let rx0 = registry.register(&key(0));
        let rx1 = registry.register(&key(1));

        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());

        assert!(rx0.await.is_ok());
        assert!(rx1.await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_all_is_idempotent_and_safe_when_empty() {
        let registry = ProcessRegistry::new();
        assert_eq!(registry.cancel_all(), 0);

        let _rx = registry.register(&key(0));
        assert_eq!(registry.cancel_all(), 1);
        assert_eq!(registry.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_reregistering_replaces_previous_handle() {
        let registry = ProcessRegistry::new();
        let old_rx = registry.register(&key(0));
        let _new_rx = registry.register(&key(0));
        assert_eq!(registry.len(), 1);

        // The replaced sender is dropped, so the old receiver errors.
        assert!(old_rx.await.is_err());
    }
}
