use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};

/// Correlation table for request/reply pairs crossing the extension socket.
///
/// Each registration is a single-use completion keyed by request id; an
/// entry is removed before it is completed, so a reply and a timeout can
/// never both fire for the same registration.
pub struct PendingMap<T> {
    inner: Arc<Mutex<VecDeque<(String, oneshot::Sender<T>)>>>,
}

impl<T> Clone for PendingMap<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> PendingMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub async fn register(&self, id: &str) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.push_back((id.to_string(), tx));
        rx
    }

    /// Remove a registration without completing it (timeout path).
    pub async fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|(k, _)| k != id);
        inner.len() != before
    }

    /// Complete the registration matching `id`, if still present.
    pub async fn resolve(&self, id: &str, value: T) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.iter().position(|(k, _)| k == id) {
            let (_, tx) = inner.remove(pos).expect("position just found");
            return tx.send(value).is_ok();
        }
        false
    }

    /// Complete the oldest registration and drop every other one.
    ///
    /// Reproduces the observed extension-reply behavior: any inbound reply
    /// fulfills the first waiter regardless of its request id, and clears
    /// the rest, so only one in-flight request is meaningfully supported.
    pub async fn resolve_first_and_clear(&self, value: T) -> bool {
        let mut inner = self.inner.lock().await;
        let resolved = match inner.pop_front() {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        };
        inner.clear();
        resolved
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

impl<T: Send + 'static> Default for PendingMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
