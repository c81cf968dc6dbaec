//! Typed random resource handles.
//!
//! A [`ResourceHandle`] is an opaque 64-bit identifier. The type parameter only
//! exists so that handles of different resource kinds cannot be compared by
//! accident; it carries no runtime information.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use rand::Rng;

/// Opaque identifier for a resource of kind `T`.
///
/// Fresh handles are drawn uniformly from `[1, u64::MAX]`. Zero is reserved for
/// the null handle. No collision check is performed when a handle is created.
pub struct ResourceHandle<T: ?Sized> {
    id: u64,
    _marker: PhantomData<fn() -> *const T>,
}

impl<T: ?Sized> ResourceHandle<T> {
    /// Create a fresh, non-null handle.
    pub fn create() -> Self {
        Self::from_raw(rand::thread_rng().gen_range(1..=u64::MAX))
    }

    /// The null handle.
    pub const fn null() -> Self {
        Self::from_raw(0)
    }

    /// Wrap a raw identifier.
    pub const fn from_raw(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Get the raw identifier.
    pub const fn raw(&self) -> u64 {
        self.id
    }

    /// Check if this is the null handle.
    pub const fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Truthiness of the handle: `true` iff it is not null.
    pub const fn is_valid(&self) -> bool {
        !self.is_null()
    }
}

impl<T: ?Sized> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for ResourceHandle<T> {}

impl<T: ?Sized> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for ResourceHandle<T> {}

impl<T: ?Sized> Hash for ResourceHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> Default for ResourceHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle({:#018x})", self.id)
    }
}

impl<T: ?Sized> fmt::Display for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.id)
    }
}

impl<T: ?Sized> From<ResourceHandle<T>> for bool {
    fn from(handle: ResourceHandle<T>) -> bool {
        handle.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Texture;
    struct Buffer;

    #[test]
    fn test_create_is_not_null() {
        let handle = ResourceHandle::<Texture>::create();
        assert!(handle.is_valid());
        assert!(bool::from(handle));
        assert_ne!(handle.raw(), 0);
    }

    #[test]
    fn test_null_handle() {
        let null = ResourceHandle::<Texture>::null();
        assert!(null.is_null());
        assert!(!bool::from(null));
        assert_eq!(null, ResourceHandle::default());
        assert_ne!(null, ResourceHandle::create());
    }

    #[test]
    fn test_two_handles_differ() {
        let a = ResourceHandle::<Buffer>::create();
        let b = ResourceHandle::<Buffer>::create();
        assert_ne!(a, b);
    }

    #[test]
    fn test_equality_is_identity() {
        let a = ResourceHandle::<Buffer>::from_raw(42);
        let b = ResourceHandle::<Buffer>::from_raw(42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_usable_as_map_key() {
        let mut map = HashMap::new();
        let handle = ResourceHandle::<dyn std::any::Any>::create();
        map.insert(handle, "value");
        assert_eq!(map.get(&handle), Some(&"value"));
        assert_eq!(map.get(&ResourceHandle::null()), None);
    }
}
