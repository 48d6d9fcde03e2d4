//! Continuation dispatch core.
//!
//! The state machine every suspendable operation embeds: a versioned result
//! cell plus at most one registered continuation per version.
//!
//! Setting the outcome and registering the continuation may race across
//! threads. Both sides finish their own step first, then race on a single
//! compare-and-swap of the claim word. The side that finds the other already
//! claimed is the one that invokes the continuation, so it fires exactly once
//! whatever the interleaving.
//!
//! The claim word carries the version in its upper bits. A producer or
//! registrant that lost a race with a reset fails its CAS instead of claiming
//! the next version's continuation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::Waker;

use crate::api::error::{Fault, TaskError};
use crate::api::task::TaskStatus;
use crate::api::unobserved::FaultReporter;
use crate::core::cell::{Outcome, ResultCell};
use crate::sync::mutex::Mutex;
use crate::{ft_emit, ft_emit_detail};

const UNCLAIMED: u32 = 0;
const PRODUCER: u32 = 1;
const REGISTRANT: u32 = 2;

#[inline]
const fn claim_word(version: u16, state: u32) -> u32 {
    ((version as u32) << 8) | state
}

/// A one-shot callback run when an operation completes.
pub enum Continuation {
    /// Wake an async task.
    Wake(Waker),
    /// Run a closure.
    Call(Box<dyn FnOnce() + Send>),
}

impl Continuation {
    /// Continuation from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Continuation::Call(Box::new(f))
    }

    /// Continuation that wakes `waker`.
    pub fn from_waker(waker: Waker) -> Self {
        Continuation::Wake(waker)
    }

    /// Run it.
    pub fn invoke(self) {
        match self {
            Continuation::Wake(waker) => waker.wake(),
            Continuation::Call(f) => f(),
        }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Continuation::Wake(_) => f.write_str("Continuation::Wake"),
            Continuation::Call(_) => f.write_str("Continuation::Call"),
        }
    }
}

/// Result cell plus single-fire continuation dispatch.
pub struct CompletionCore<T> {
    /// Outcome and version.
    cell: Mutex<ResultCell<T>>,

    /// Version in the upper bits, claim state in the low byte.
    claim: AtomicU32,

    /// Registered continuation for the current version.
    continuation: Mutex<Option<Continuation>>,

    /// Sink for outcomes that were never read.
    reporter: Arc<FaultReporter>,
}

impl<T> CompletionCore<T> {
    /// Create a pending core reporting to the global reporter.
    pub fn new() -> Self {
        Self::with_reporter(FaultReporter::global())
    }

    /// Create a pending core reporting to `reporter`.
    pub fn with_reporter(reporter: Arc<FaultReporter>) -> Self {
        Self {
            cell: Mutex::new(ResultCell::new()),
            claim: AtomicU32::new(claim_word(0, UNCLAIMED)),
            continuation: Mutex::new(None),
            reporter,
        }
    }

    /// Current version; the token for the operation in flight.
    pub fn version(&self) -> u16 {
        self.cell.lock().version()
    }

    /// The reporter this core publishes to.
    pub fn reporter(&self) -> &Arc<FaultReporter> {
        &self.reporter
    }

    /// Non-consuming status read.
    pub fn status(&self, token: u16) -> Result<TaskStatus, TaskError> {
        self.cell.lock().status(token)
    }

    /// Status without token validation.
    pub fn unsafe_status(&self) -> TaskStatus {
        self.cell.lock().unsafe_status()
    }

    /// Whether the current version reached a terminal outcome.
    pub fn is_completed(&self) -> bool {
        self.unsafe_status().is_completed()
    }

    /// Read the outcome for `token`.
    pub fn get_result(&self, token: u16) -> Result<T, TaskError> {
        let result = self.cell.lock().take_result(token);
        if let Err(err) = &result {
            if err.is_stale() {
                ft_emit_detail!(FT002, "{}", err);
            }
        }
        result
    }

    /// Set the outcome of the current version.
    pub fn try_set_outcome(&self, outcome: Outcome<T>) -> bool {
        let version = {
            let mut cell = self.cell.lock();
            if !cell.try_set(outcome) {
                return false;
            }
            cell.version()
        };
        self.signal(version);
        true
    }

    /// Set the outcome only if the core is still at `token`.
    ///
    /// A producer holding an outdated token cannot complete a recycled core.
    pub fn try_set_outcome_at(&self, token: u16, outcome: Outcome<T>) -> bool {
        {
            let mut cell = self.cell.lock();
            if cell.version() != token || !cell.try_set(outcome) {
                return false;
            }
        }
        self.signal(token);
        true
    }

    /// Complete with a value.
    pub fn try_set_result(&self, value: T) -> bool {
        self.try_set_outcome(Outcome::Succeeded(value))
    }

    /// Complete with a fault.
    pub fn try_set_error(&self, fault: Fault) -> bool {
        self.try_set_outcome(Outcome::Faulted(fault))
    }

    /// Complete by cancellation.
    pub fn try_set_canceled(&self) -> bool {
        self.try_set_outcome(Outcome::Canceled)
    }

    /// Cancel only if the core is still at `token`.
    pub fn try_set_canceled_at(&self, token: u16) -> bool {
        self.try_set_outcome_at(token, Outcome::Canceled)
    }

    /// Producer side of the claim, after the outcome for `version` is set.
    fn signal(&self, version: u16) {
        match self.claim.compare_exchange(
            claim_word(version, UNCLAIMED),
            claim_word(version, PRODUCER),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // The registrant will find PRODUCER and fire.
            Ok(_) => {}
            Err(current) if current == claim_word(version, REGISTRANT) => {
                let continuation = self.continuation.lock().take();
                if let Some(continuation) = continuation {
                    continuation.invoke();
                }
            }
            // Reset already moved the core on.
            Err(_) => {}
        }
    }

    /// Register the single continuation for `token`.
    ///
    /// Fires synchronously, on the calling thread, when the outcome is already
    /// set. A second registration for the same version fails with
    /// [`TaskError::ContinuationAlreadyRegistered`].
    pub fn on_completed(&self, continuation: Continuation, token: u16) -> Result<(), TaskError> {
        self.cell.lock().validate(token)?;

        {
            let mut slot = self.continuation.lock();
            let current = self.claim.load(Ordering::Acquire);
            if slot.is_some() || current == claim_word(token, REGISTRANT) {
                drop(slot);
                ft_emit!(FT001);
                return Err(TaskError::ContinuationAlreadyRegistered);
            }
            *slot = Some(continuation);
        }

        match self.claim.compare_exchange(
            claim_word(token, UNCLAIMED),
            claim_word(token, REGISTRANT),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // The producer will find REGISTRANT and fire.
            Ok(_) => Ok(()),
            Err(current) if current == claim_word(token, PRODUCER) => {
                match self.claim.compare_exchange(
                    current,
                    claim_word(token, REGISTRANT),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let continuation = self.continuation.lock().take();
                        if let Some(continuation) = continuation {
                            continuation.invoke();
                        }
                        Ok(())
                    }
                    Err(_) => {
                        self.continuation.lock().take();
                        ft_emit_detail!(FT901, "continuation claim changed during registration");
                        Err(TaskError::ContinuationAlreadyRegistered)
                    }
                }
            }
            Err(_) => {
                // Reset between validation and claim.
                self.continuation.lock().take();
                Err(TaskError::StaleToken {
                    presented: token,
                    current: self.version(),
                })
            }
        }
    }

    /// Move to the next version, dropping any unfired continuation.
    ///
    /// An outcome that was never read is published to the reporter.
    pub fn reset(&self) {
        let (unobserved, version) = {
            let mut cell = self.cell.lock();
            let unobserved = cell.reset();
            (unobserved, cell.version())
        };
        let stale = self.continuation.lock().take();
        self.claim
            .store(claim_word(version, UNCLAIMED), Ordering::Release);
        drop(stale);

        if let Some(err) = unobserved {
            self.reporter.publish(err);
        }
    }
}

impl<T> Default for CompletionCore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CompletionCore<T> {
    fn drop(&mut self) {
        if let Some(err) = self.cell.get_mut().take_unobserved() {
            self.reporter.publish(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Continuation) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = fired.clone();
        let make = move || {
            let fired = handle.clone();
            Continuation::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        (fired, make)
    }

    #[test]
    fn test_register_then_complete() {
        let core = CompletionCore::with_reporter(Arc::new(FaultReporter::new()));
        let (fired, make) = counter();

        core.on_completed(make(), 0).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert!(core.try_set_result(5));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!core.try_set_result(6));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(core.get_result(0).unwrap(), 5);
    }

    #[test]
    fn test_complete_then_register_fires_synchronously() {
        let core = CompletionCore::<()>::with_reporter(Arc::new(FaultReporter::new()));
        let (fired, make) = counter();

        core.try_set_error(Fault::msg("early"));
        core.on_completed(make(), 0).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(core.get_result(0), Err(TaskError::Faulted(_))));
    }

    #[test]
    fn test_second_registration_rejected() {
        let core = CompletionCore::<()>::with_reporter(Arc::new(FaultReporter::new()));
        let (fired, make) = counter();

        core.on_completed(make(), 0).unwrap();
        assert!(matches!(
            core.on_completed(make(), 0),
            Err(TaskError::ContinuationAlreadyRegistered)
        ));
        core.try_set_result(());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Still rejected after the first one fired.
        assert!(core.on_completed(make(), 0).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_registration_and_late_producer() {
        let core = CompletionCore::<u8>::with_reporter(Arc::new(FaultReporter::new()));
        let (fired, make) = counter();

        core.try_set_result(1);
        assert_eq!(core.get_result(0).unwrap(), 1);
        core.reset();

        assert!(matches!(
            core.on_completed(make(), 0),
            Err(TaskError::StaleToken { presented: 0, current: 1 })
        ));
        assert!(!core.try_set_canceled_at(0));
        assert_eq!(core.status(1).unwrap(), TaskStatus::Pending);

        core.on_completed(make(), 1).unwrap();
        assert!(core.try_set_canceled_at(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_publishes_unread_fault() {
        let reporter = Arc::new(FaultReporter::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        reporter.set_handler(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let core = CompletionCore::<()>::with_reporter(reporter);
        core.try_set_error(Fault::msg("dropped on the floor"));
        core.reset();
        core.reset();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        core.try_set_error(Fault::msg("also lost"));
        drop(core);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
