//! Per-session typed key/value storage.
//!
//! Services keep session-scoped data here keyed by a numeric element id.
//! The store is internally synchronized but intended to be touched only
//! from the request's worker thread; it offers no cross-request ordering.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// The element id type.
pub type ElementId = u64;

/// A value storable in a session store.
///
/// `dispose` is invoked exactly once when the session is torn down; it is
/// never invoked by `remove`.
pub trait SessionElement: Any + Send + Sync {
    /// Release resources owned by this element.
    fn dispose(&self) {}
}

struct StoredElement {
    element: Arc<dyn SessionElement>,
    // second coercion of the same allocation, kept for typed find()
    as_any: Arc<dyn Any + Send + Sync>,
}

/// A storage for each service to keep session-specific data.
pub struct SessionStore {
    entries: Mutex<FxHashMap<ElementId, StoredElement>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Register a new element. Returns false if another element already
    /// exists under the id.
    pub fn put<T: SessionElement>(&self, element_id: ElementId, element: Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&element_id) {
            return false;
        }
        let as_any: Arc<dyn Any + Send + Sync> = element.clone();
        entries.insert(
            element_id,
            StoredElement {
                element,
                as_any,
            },
        );
        true
    }

    /// Obtain the stored element when its type matches `T`.
    pub fn find<T: SessionElement>(&self, element_id: ElementId) -> Option<Arc<T>> {
        let entries = self.entries.lock();
        let stored = entries.get(&element_id)?;
        Arc::clone(&stored.as_any).downcast::<T>().ok()
    }

    /// Obtain the stored element, or construct, store, and return a new one.
    ///
    /// Returns none when an element of a different type already occupies
    /// the id.
    pub fn find_or_emplace<T: SessionElement>(
        &self,
        element_id: ElementId,
        factory: impl FnOnce() -> T,
    ) -> Option<Arc<T>> {
        let mut entries = self.entries.lock();
        if let Some(stored) = entries.get(&element_id) {
            return Arc::clone(&stored.as_any).downcast::<T>().ok();
        }
        let element = Arc::new(factory());
        let as_any: Arc<dyn Any + Send + Sync> = element.clone();
        entries.insert(
            element_id,
            StoredElement {
                element: element.clone(),
                as_any,
            },
        );
        Some(element)
    }

    /// Remove the stored element on type match.
    ///
    /// Returns true when removed or already absent, false on a type
    /// mismatch. Never invokes `dispose` on the removed element.
    pub fn remove<T: SessionElement>(&self, element_id: ElementId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&element_id) {
            None => true,
            Some(stored) => {
                if stored.as_any.is::<T>() {
                    entries.remove(&element_id);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Number of stored elements.
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Dispose every stored element exactly once and empty the store.
    ///
    /// A failing element is logged and the iteration continues.
    pub fn dispose(&self) {
        let drained: Vec<(ElementId, StoredElement)> = {
            let mut entries = self.entries.lock();
            entries.drain().collect()
        };
        for (element_id, stored) in drained {
            let result = catch_unwind(AssertUnwindSafe(|| stored.element.dispose()));
            if result.is_err() {
                tracing::error!(element_id, "session element dispose failed");
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("size", &self.size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
