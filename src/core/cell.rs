//! Versioned result cell.
//!
//! Holds at most one terminal outcome per version. Every reuse bumps the
//! version, so a token handed out before the bump no longer matches and reads
//! fail with [`TaskError::StaleToken`] instead of returning another cycle's
//! data.
//!
//! The version is a `u16` and wraps after 65 536 reuses of one cell. A holder
//! that sleeps through exactly that many reuses would see its token match
//! again. Pooled operations are recycled once per completed await, so this
//! window is far beyond any realistic stale-holder lifetime.

use crate::api::error::{Fault, TaskError};
use crate::api::task::TaskStatus;

/// A terminal outcome.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Completed with a value.
    Succeeded(T),
    /// Completed with a failure.
    Faulted(Fault),
    /// Completed by cancellation.
    Canceled,
}

impl<T> Outcome<T> {
    /// Status this outcome represents.
    pub fn status(&self) -> TaskStatus {
        match self {
            Outcome::Succeeded(_) => TaskStatus::Succeeded,
            Outcome::Faulted(_) => TaskStatus::Faulted,
            Outcome::Canceled => TaskStatus::Canceled,
        }
    }

    /// Convert into the value a caller receives.
    pub fn into_result(self) -> Result<T, TaskError> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Faulted(fault) => Err(TaskError::Faulted(fault)),
            Outcome::Canceled => Err(TaskError::Canceled),
        }
    }

    /// The error a nobody-read outcome should be reported as, if any.
    fn into_unobserved(self) -> Option<TaskError> {
        match self {
            Outcome::Succeeded(_) => None,
            Outcome::Faulted(fault) => Some(TaskError::Faulted(fault)),
            Outcome::Canceled => Some(TaskError::Canceled),
        }
    }
}

/// A single-assignment result slot tagged with a version.
pub struct ResultCell<T> {
    /// Current version; tokens are compared against it.
    version: u16,

    /// Status for the current version. Survives consumption.
    status: TaskStatus,

    /// The outcome until it is read.
    outcome: Option<Outcome<T>>,

    /// Whether the current outcome was read.
    consumed: bool,
}

impl<T> ResultCell<T> {
    /// Create a pending cell at version 0.
    pub const fn new() -> Self {
        Self {
            version: 0,
            status: TaskStatus::Pending,
            outcome: None,
            consumed: false,
        }
    }

    /// Current version.
    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Status without token validation.
    #[inline]
    pub fn unsafe_status(&self) -> TaskStatus {
        self.status
    }

    /// Non-consuming status read for `token`.
    pub fn status(&self, token: u16) -> Result<TaskStatus, TaskError> {
        self.validate(token)?;
        Ok(self.status)
    }

    /// Fail with `StaleToken` unless `token` is the current version.
    #[inline]
    pub fn validate(&self, token: u16) -> Result<(), TaskError> {
        if token == self.version {
            Ok(())
        } else {
            Err(TaskError::StaleToken {
                presented: token,
                current: self.version,
            })
        }
    }

    /// Set a terminal outcome if still pending. Later calls return false.
    pub fn try_set(&mut self, outcome: Outcome<T>) -> bool {
        if self.status.is_completed() {
            return false;
        }
        self.status = outcome.status();
        self.outcome = Some(outcome);
        true
    }

    /// Set a value if still pending.
    pub fn try_set_result(&mut self, value: T) -> bool {
        self.try_set(Outcome::Succeeded(value))
    }

    /// Set a fault if still pending.
    pub fn try_set_error(&mut self, fault: Fault) -> bool {
        self.try_set(Outcome::Faulted(fault))
    }

    /// Set cancellation if still pending.
    pub fn try_set_canceled(&mut self) -> bool {
        self.try_set(Outcome::Canceled)
    }

    /// Read the outcome for `token`. Succeeds at most once per version.
    pub fn take_result(&mut self, token: u16) -> Result<T, TaskError> {
        self.validate(token)?;
        if !self.status.is_completed() {
            return Err(TaskError::NotCompleted);
        }
        match self.outcome.take() {
            Some(outcome) => {
                self.consumed = true;
                outcome.into_result()
            }
            None => Err(TaskError::AlreadyConsumed { token }),
        }
    }

    /// Invalidate the current outcome and move to the next version.
    ///
    /// Returns the outcome's error if it was never read.
    pub fn reset(&mut self) -> Option<TaskError> {
        let unobserved = self.take_unobserved();
        self.version = self.version.wrapping_add(1);
        self.status = TaskStatus::Pending;
        self.outcome = None;
        self.consumed = false;
        unobserved
    }

    /// Take an unread error outcome, marking it observed.
    pub fn take_unobserved(&mut self) -> Option<TaskError> {
        if self.consumed {
            return None;
        }
        let unobserved = self.outcome.take().and_then(Outcome::into_unobserved);
        if unobserved.is_some() {
            self.consumed = true;
        }
        unobserved
    }
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
