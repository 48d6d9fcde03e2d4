//! Cancellation.
//!
//! A [`CancelToken`] is any [`CancelSignal`]: something that can say whether
//! cancellation was requested and run a callback when it is. [`CancelSource`]
//! is the built-in signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::sync::mutex::Mutex;

/// A cancellation capability.
pub trait CancelSignal: Send + Sync {
    /// Whether cancellation was requested.
    fn is_cancellation_requested(&self) -> bool;

    /// Run `callback` when cancellation is requested.
    ///
    /// Runs it inline if cancellation was already requested. Dropping or
    /// disposing the returned registration unregisters it.
    fn register(&self, callback: Box<dyn FnOnce() + Send>) -> CancelRegistration;
}

/// Handle for a registered cancel callback.
///
/// Unregisters on drop. Use [`forget`](Self::forget) to keep the callback
/// registered for the signal's lifetime.
#[derive(Default)]
#[must_use = "dropping a registration unregisters its callback"]
pub struct CancelRegistration {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelRegistration {
    /// A registration that does nothing.
    pub fn empty() -> Self {
        Self { dispose: None }
    }

    /// A registration running `dispose` to unregister.
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Unregister now.
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    /// Keep the callback registered.
    pub fn forget(mut self) {
        self.dispose = None;
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for CancelRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelRegistration")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

/// A cheap, cloneable view of a cancel signal. The default token never cancels.
#[derive(Clone, Default)]
pub struct CancelToken {
    signal: Option<Arc<dyn CancelSignal>>,
}

impl CancelToken {
    /// A token that is never canceled.
    pub fn none() -> Self {
        Self { signal: None }
    }

    /// Wrap any signal.
    pub fn from_signal(signal: Arc<dyn CancelSignal>) -> Self {
        Self {
            signal: Some(signal),
        }
    }

    /// Whether this token can ever be canceled.
    pub fn can_be_canceled(&self) -> bool {
        self.signal.is_some()
    }

    /// Whether cancellation was requested.
    pub fn is_cancellation_requested(&self) -> bool {
        self.signal
            .as_ref()
            .map_or(false, |signal| signal.is_cancellation_requested())
    }

    /// Run `callback` on cancellation. An uncancelable token never runs it.
    pub fn register<F>(&self, callback: F) -> CancelRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.signal {
            Some(signal) => signal.register(Box::new(callback)),
            None => CancelRegistration::empty(),
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("can_be_canceled", &self.can_be_canceled())
            .field("requested", &self.is_cancellation_requested())
            .finish()
    }
}

type Callback = Box<dyn FnOnce() + Send>;

struct CancelState {
    /// Self reference handed to registrations.
    this: Weak<CancelState>,
    requested: AtomicBool,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl CancelSignal for CancelState {
    fn is_cancellation_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn register(&self, callback: Callback) -> CancelRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut callbacks = self.callbacks.lock();
            // Checked under the lock; `cancel` flips the flag before draining.
            if !self.is_cancellation_requested() {
                callbacks.push((id, callback));
                let state = self.this.clone();
                return CancelRegistration::new(move || {
                    if let Some(state) = state.upgrade() {
                        state.callbacks.lock().retain(|(other, _)| *other != id);
                    }
                });
            }
        }
        callback();
        CancelRegistration::empty()
    }
}

/// The built-in cancel signal.
#[derive(Clone)]
pub struct CancelSource {
    state: Arc<CancelState>,
}

impl CancelSource {
    /// Create an uncanceled source.
    pub fn new() -> Self {
        Self {
            state: Arc::new_cyclic(|this| CancelState {
                this: this.clone(),
                requested: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// A token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken::from_signal(self.state.clone())
    }

    /// Request cancellation and run registered callbacks on this thread.
    ///
    /// Only the first call runs callbacks.
    pub fn cancel(&self) {
        if self.state.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.state.callbacks.lock());
        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Whether cancellation was requested.
    pub fn is_cancellation_requested(&self) -> bool {
        self.state.is_cancellation_requested()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}
