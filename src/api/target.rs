//! Watched-target liveness.
//!
//! Value-change waits sample a target each tick. A [`TargetRef`] hands out the
//! target while it is alive and `None` once it is gone, which ends the wait.

use std::sync::{Arc, Weak};

/// Access to a watched target that may stop being alive.
pub trait TargetRef<T: ?Sized>: Send + Sync {
    /// The target, or `None` once it is no longer alive.
    fn get(&self) -> Option<Arc<T>>;
}

/// A plain reference-counted target is alive while any strong owner remains.
impl<T: ?Sized + Send + Sync> TargetRef<T> for Weak<T> {
    fn get(&self) -> Option<Arc<T>> {
        self.upgrade()
    }
}

/// An object owned by a host object system that can be destroyed while
/// references to it still exist.
pub trait HostObject: Send + Sync {
    /// Whether the host still considers the object alive.
    fn is_alive(&self) -> bool;
}

/// Target backed by a host-managed object.
///
/// Holds the object strongly but reports it gone as soon as the host
/// destroys it.
pub struct HostTarget<T: HostObject> {
    object: Arc<T>,
}

impl<T: HostObject> HostTarget<T> {
    /// Watch `object`.
    pub fn new(object: Arc<T>) -> Self {
        Self { object }
    }
}

impl<T: HostObject> TargetRef<T> for HostTarget<T> {
    fn get(&self) -> Option<Arc<T>> {
        self.object.is_alive().then(|| self.object.clone())
    }
}
