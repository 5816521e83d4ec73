use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory page bytes shared by every slot of a reading session.
///
/// Entries written through [`ImageBuffers::acquire`] are reference counted:
/// each in-flight load and each ready slot holds one reference per key, and
/// [`ImageBuffers::release`] only drops the bytes once nobody holds the key.
/// There is no capacity limit; what stays resident is decided by the window.
#[derive(Clone, Default)]
pub struct ImageBuffers {
    inner: Arc<RwLock<BuffersInner>>,
}

#[derive(Default)]
struct BuffersInner {
    pages: HashMap<String, Bytes>,
    refs: HashMap<String, usize>,
}

impl ImageBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites without touching the reference count.
    pub async fn put(&self, key: impl Into<String>, bytes: Bytes) {
        let mut inner = self.inner.write().await;
        inner.pages.insert(key.into(), bytes);
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let inner = self.inner.read().await;
        inner.pages.get(key).cloned()
    }

    /// Removes the given keys regardless of who still references them.
    /// Missing keys are ignored.
    pub async fn delete<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write().await;
        for key in keys {
            inner.pages.remove(key.as_ref());
            inner.refs.remove(key.as_ref());
        }
    }

    /// Stores the bytes and takes one reference on the key.
    pub async fn acquire(&self, key: impl Into<String>, bytes: Bytes) {
        let key = key.into();
        let mut inner = self.inner.write().await;
        *inner.refs.entry(key.clone()).or_insert(0) += 1;
        inner.pages.insert(key, bytes);
    }

    /// Drops one reference per key and evicts every key left unreferenced.
    /// Returns the number of entries removed from the store.
    pub async fn release<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write().await;
        let mut evicted = 0;

        for key in keys {
            let key = key.as_ref();
            let remaining = match inner.refs.get_mut(key) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };

            if remaining == 0 {
                inner.refs.remove(key);
                if inner.pages.remove(key).is_some() {
                    evicted += 1;
                }
            }
        }

        evicted
    }

    pub async fn contains(&self, key: &str) -> bool {
        let inner = self.inner.read().await;
        inner.pages.contains_key(key)
    }

    pub async fn ref_count(&self, key: &str) -> usize {
        let inner = self.inner.read().await;
        inner.refs.get(key).copied().unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.pages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
