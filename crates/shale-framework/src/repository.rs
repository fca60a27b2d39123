//! Kind-keyed component repository.
//!
//! Holds an insertion-ordered sequence of shared component handles plus a
//! by-id index. Insertion order defines priority: earlier components are
//! set up and started first and shut down last.

use std::any::Any;
use std::sync::Arc;

use crate::component::{Component, ComponentId};
use crate::error::FrameworkError;

struct Entry<T: ?Sized> {
    id: ComponentId,
    component: Arc<T>,
    // second coercion of the same component, kept for typed find()
    as_any: Arc<dyn Any + Send + Sync>,
}

/// Insertion-ordered repository of one component kind.
pub struct Repository<T: Component + ?Sized> {
    entries: Vec<Entry<T>>,
}

impl<T: Component + ?Sized> Repository<T> {
    pub fn new() -> Self {
        Repository {
            entries: Vec::new(),
        }
    }

    /// Append a component.
    ///
    /// `component` and `as_any` must be coercions of the same allocation;
    /// the typed `add` helpers on [`crate::server::Server`] guarantee that.
    pub fn add(&mut self, component: Arc<T>, as_any: Arc<dyn Any + Send + Sync>) {
        self.entries.push(Entry {
            id: component.id(),
            component,
            as_any,
        });
    }

    /// Iterate components in insertion (or reverse) order.
    ///
    /// Stops at the first failure of `f` and returns it; a caller that
    /// must visit every component regardless keeps the failure in the
    /// closure and returns `Ok`.
    pub fn each(
        &self,
        mut f: impl FnMut(&Arc<T>) -> Result<(), FrameworkError>,
        reverse: bool,
    ) -> Result<(), FrameworkError> {
        if reverse {
            for entry in self.entries.iter().rev() {
                f(&entry.component)?;
            }
        } else {
            for entry in &self.entries {
                f(&entry.component)?;
            }
        }
        Ok(())
    }

    /// Ids and components in insertion order.
    pub fn snapshot_with_ids(&self) -> Vec<(ComponentId, Arc<T>)> {
        self.entries
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.component)))
            .collect()
    }

    /// Find the first held instance of the concrete type `C`.
    pub fn find<C: Component>(&self) -> Option<Arc<C>> {
        self.entries
            .iter()
            .find_map(|entry| Arc::clone(&entry.as_any).downcast::<C>().ok())
    }

    /// Look up a component by its numeric id.
    pub fn find_by_id(&self, id: ComponentId) -> Option<Arc<T>> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.component))
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Component + ?Sized> Default for Repository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component + ?Sized> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.entries.iter().map(|e| e.component.label()).collect();
        f.debug_struct("Repository").field("entries", &labels).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Resource;
    use crate::environment::Environment;
    use crate::error::FrameworkError;

    struct ResourceA;
    struct ResourceB;

    macro_rules! trivial_resource {
        ($ty:ty, $id:expr, $label:expr) => {
            impl Component for $ty {
                fn id(&self) -> ComponentId {
                    $id
                }
                fn label(&self) -> &'static str {
                    $label
                }
                fn setup(&self, _env: &Environment) -> Result<(), FrameworkError> {
                    Ok(())
                }
                fn start(&self, _env: &Environment) -> Result<(), FrameworkError> {
                    Ok(())
                }
                fn shutdown(&self, _env: &Environment) -> Result<(), FrameworkError> {
                    Ok(())
                }
            }
            impl Resource for $ty {}
        };
    }

    trivial_resource!(ResourceA, 300, "resource_a");
    trivial_resource!(ResourceB, 301, "resource_b");

    fn add_resource<C: Resource>(repo: &mut Repository<dyn Resource>, component: C) {
        let component = Arc::new(component);
        let obj: Arc<dyn Resource> = component.clone();
        let any: Arc<dyn Any + Send + Sync> = component;
        repo.add(obj, any);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut repo: Repository<dyn Resource> = Repository::new();
        add_resource(&mut repo, ResourceA);
        add_resource(&mut repo, ResourceB);
        let mut order = Vec::new();
        repo.each(
            |c| {
                order.push(c.label());
                Ok(())
            },
            false,
        )
        .unwrap();
        assert_eq!(order, vec!["resource_a", "resource_b"]);
        order.clear();
        repo.each(
            |c| {
                order.push(c.label());
                Ok(())
            },
            true,
        )
        .unwrap();
        assert_eq!(order, vec!["resource_b", "resource_a"]);
    }

    #[test]
    fn test_each_short_circuits_on_failure() {
        let mut repo: Repository<dyn Resource> = Repository::new();
        add_resource(&mut repo, ResourceA);
        add_resource(&mut repo, ResourceB);
        let mut visited = Vec::new();
        let result = repo.each(
            |c| {
                visited.push(c.label());
                Err(FrameworkError::Component("stop".to_string()))
            },
            false,
        );
        assert!(result.is_err());
        // the second component is never visited
        assert_eq!(visited, vec!["resource_a"]);
    }

    #[test]
    fn test_find_by_type() {
        let mut repo: Repository<dyn Resource> = Repository::new();
        add_resource(&mut repo, ResourceA);
        add_resource(&mut repo, ResourceB);
        assert!(repo.find::<ResourceA>().is_some());
        assert!(repo.find::<ResourceB>().is_some());
        assert_eq!(repo.find::<ResourceA>().unwrap().label(), "resource_a");
    }

    #[test]
    fn test_find_by_id() {
        let mut repo: Repository<dyn Resource> = Repository::new();
        add_resource(&mut repo, ResourceA);
        assert_eq!(repo.find_by_id(300).unwrap().label(), "resource_a");
        assert!(repo.find_by_id(999).is_none());
    }

    #[test]
    fn test_empty_repository() {
        let repo: Repository<dyn Resource> = Repository::new();
        assert_eq!(repo.size(), 0);
        assert!(repo.find::<ResourceA>().is_none());
        assert!(repo.find_by_id(0).is_none());
    }
}
