//! Type-tagged value container.
//!
//! Every datum crossing a port boundary is dynamically typed: filters
//! are authored separately and the graph is wired from declarative
//! descriptions, so mismatches must be caught at the port. A [`DataBox`]
//! pairs a type-erased value with the Rust type name it was stored
//! under; readers must request the exact type back.
//!
//! Two flavors:
//!
//! - *owned* — the box's handle is the only one; dropping the last
//!   registry reference destroys the value.
//! - *borrowed* — a non-owning handle to a value whose lifetime is
//!   maintained elsewhere (the published dataset); release drops only
//!   the handle.

use std::any::Any;
use std::sync::Arc;

use crate::error::{FlowError, Result};

/// Type-erased, type-tagged value handle.
///
/// Cloning is cheap (reference count bump); the destructor rides in the
/// erased pointer, so releasing the last handle destroys owned values
/// without the registry knowing their concrete type.
#[derive(Clone)]
pub struct DataBox {
    value: Arc<dyn Any + Send + Sync>,
    tag: &'static str,
    owned: bool,
}

impl DataBox {
    /// Box a value, taking ownership.
    pub fn owned<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            tag: std::any::type_name::<T>(),
            owned: true,
        }
    }

    /// Box a non-owning handle to a value owned elsewhere.
    pub fn borrowed<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            tag: std::any::type_name::<T>(),
            owned: false,
        }
    }

    /// Exact type check.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// The stored type's name, for diagnostics.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Whether the registry is responsible for destroying the value.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Borrow the stored value. Fails unless the requested type matches
    /// the stored tag exactly.
    pub fn downcast_ref<T: Any>(&self) -> Result<&T> {
        self.value
            .downcast_ref::<T>()
            .ok_or(FlowError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                stored: self.tag,
            })
    }

    /// Clone out a shared handle to the stored value.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.value
            .clone()
            .downcast::<T>()
            .map_err(|_| FlowError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                stored: self.tag,
            })
    }
}

impl std::fmt::Debug for DataBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBox")
            .field("tag", &self.tag)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_roundtrip() {
        let boxed = DataBox::owned(42_i64);
        assert!(boxed.is::<i64>());
        assert!(!boxed.is::<f64>());
        assert_eq!(*boxed.downcast_ref::<i64>().unwrap(), 42);
    }

    #[test]
    fn test_exact_match_required() {
        let boxed = DataBox::owned(1.0_f64);
        let err = boxed.downcast_ref::<f32>().unwrap_err();
        assert!(matches!(err, FlowError::TypeMismatch { .. }));
    }

    #[test]
    fn test_borrowed_does_not_own() {
        let host_value = Arc::new(String::from("published"));
        let boxed = DataBox::borrowed(host_value.clone());
        assert!(!boxed.is_owned());
        drop(boxed);
        // host still holds the value
        assert_eq!(host_value.as_str(), "published");
    }

    #[test]
    fn test_clone_shares() {
        let boxed = DataBox::owned(vec![1, 2, 3]);
        let other = boxed.clone();
        assert_eq!(
            boxed.downcast_ref::<Vec<i32>>().unwrap(),
            other.downcast_ref::<Vec<i32>>().unwrap()
        );
    }
}
