//! Loop timings: the named, ordered phases of the host frame.
//!
//! Each host phase group (Initialization, EarlyUpdate, ...) has a plain
//! timing that runs first in the group and a `Last*` timing that runs last.

use bitflags::bitflags;

/// A scheduling phase in the host frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum LoopTiming {
    Initialization = 0,
    LastInitialization = 1,
    EarlyUpdate = 2,
    LastEarlyUpdate = 3,
    FixedUpdate = 4,
    LastFixedUpdate = 5,
    PreUpdate = 6,
    LastPreUpdate = 7,
    #[default]
    Update = 8,
    LastUpdate = 9,
    PreLateUpdate = 10,
    LastPreLateUpdate = 11,
    PostLateUpdate = 12,
    LastPostLateUpdate = 13,
    TimeUpdate = 14,
    LastTimeUpdate = 15,
}

/// Number of timings.
pub const TIMING_COUNT: usize = 16;

impl LoopTiming {
    /// Every timing, indexed by discriminant.
    pub const ALL: [LoopTiming; TIMING_COUNT] = [
        LoopTiming::Initialization,
        LoopTiming::LastInitialization,
        LoopTiming::EarlyUpdate,
        LoopTiming::LastEarlyUpdate,
        LoopTiming::FixedUpdate,
        LoopTiming::LastFixedUpdate,
        LoopTiming::PreUpdate,
        LoopTiming::LastPreUpdate,
        LoopTiming::Update,
        LoopTiming::LastUpdate,
        LoopTiming::PreLateUpdate,
        LoopTiming::LastPreLateUpdate,
        LoopTiming::PostLateUpdate,
        LoopTiming::LastPostLateUpdate,
        LoopTiming::TimeUpdate,
        LoopTiming::LastTimeUpdate,
    ];

    /// The order in which the host runs timings within one frame.
    ///
    /// Time bookkeeping comes first; a `Last*` timing closes its group.
    pub const FRAME_ORDER: [LoopTiming; TIMING_COUNT] = [
        LoopTiming::TimeUpdate,
        LoopTiming::LastTimeUpdate,
        LoopTiming::Initialization,
        LoopTiming::LastInitialization,
        LoopTiming::EarlyUpdate,
        LoopTiming::LastEarlyUpdate,
        LoopTiming::FixedUpdate,
        LoopTiming::LastFixedUpdate,
        LoopTiming::PreUpdate,
        LoopTiming::LastPreUpdate,
        LoopTiming::Update,
        LoopTiming::LastUpdate,
        LoopTiming::PreLateUpdate,
        LoopTiming::LastPreLateUpdate,
        LoopTiming::PostLateUpdate,
        LoopTiming::LastPostLateUpdate,
    ];

    /// Index into per-timing tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this is the `Last*` timing of its group.
    #[inline]
    pub const fn is_last(self) -> bool {
        (self as u8) & 1 == 1
    }

    /// The plain timing of this timing's group.
    pub const fn group(self) -> LoopTiming {
        Self::ALL[(self as usize) & !1]
    }

    /// The inject flag for this timing.
    pub const fn flag(self) -> InjectTimings {
        InjectTimings::from_bits_retain(1 << (self as u16))
    }

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            LoopTiming::Initialization => "Initialization",
            LoopTiming::LastInitialization => "LastInitialization",
            LoopTiming::EarlyUpdate => "EarlyUpdate",
            LoopTiming::LastEarlyUpdate => "LastEarlyUpdate",
            LoopTiming::FixedUpdate => "FixedUpdate",
            LoopTiming::LastFixedUpdate => "LastFixedUpdate",
            LoopTiming::PreUpdate => "PreUpdate",
            LoopTiming::LastPreUpdate => "LastPreUpdate",
            LoopTiming::Update => "Update",
            LoopTiming::LastUpdate => "LastUpdate",
            LoopTiming::PreLateUpdate => "PreLateUpdate",
            LoopTiming::LastPreLateUpdate => "LastPreLateUpdate",
            LoopTiming::PostLateUpdate => "PostLateUpdate",
            LoopTiming::LastPostLateUpdate => "LastPostLateUpdate",
            LoopTiming::TimeUpdate => "TimeUpdate",
            LoopTiming::LastTimeUpdate => "LastTimeUpdate",
        }
    }
}

impl std::fmt::Display for LoopTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Which timings get a runner and a continuation queue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InjectTimings: u16 {
        const INITIALIZATION = 1 << 0;
        const LAST_INITIALIZATION = 1 << 1;
        const EARLY_UPDATE = 1 << 2;
        const LAST_EARLY_UPDATE = 1 << 3;
        const FIXED_UPDATE = 1 << 4;
        const LAST_FIXED_UPDATE = 1 << 5;
        const PRE_UPDATE = 1 << 6;
        const LAST_PRE_UPDATE = 1 << 7;
        const UPDATE = 1 << 8;
        const LAST_UPDATE = 1 << 9;
        const PRE_LATE_UPDATE = 1 << 10;
        const LAST_PRE_LATE_UPDATE = 1 << 11;
        const POST_LATE_UPDATE = 1 << 12;
        const LAST_POST_LATE_UPDATE = 1 << 13;
        const TIME_UPDATE = 1 << 14;
        const LAST_TIME_UPDATE = 1 << 15;

        /// The plain timing of every group plus the end of frame.
        const STANDARD = Self::INITIALIZATION.bits()
            | Self::EARLY_UPDATE.bits()
            | Self::FIXED_UPDATE.bits()
            | Self::PRE_UPDATE.bits()
            | Self::UPDATE.bits()
            | Self::PRE_LATE_UPDATE.bits()
            | Self::POST_LATE_UPDATE.bits()
            | Self::LAST_POST_LATE_UPDATE.bits()
            | Self::TIME_UPDATE.bits();

        /// Update, fixed update and end of frame.
        const MINIMUM = Self::UPDATE.bits()
            | Self::FIXED_UPDATE.bits()
            | Self::LAST_POST_LATE_UPDATE.bits();

        /// Every timing.
        const ALL = u16::MAX;
    }
}

impl InjectTimings {
    /// Whether `timing` is selected.
    pub fn includes(self, timing: LoopTiming) -> bool {
        self.contains(timing.flag())
    }

    /// Selected timings in frame order.
    pub fn in_frame_order(self) -> impl Iterator<Item = LoopTiming> {
        LoopTiming::FRAME_ORDER
            .into_iter()
            .filter(move |timing| self.includes(*timing))
    }
}

impl Default for InjectTimings {
    fn default() -> Self {
        InjectTimings::all()
    }
}

impl From<LoopTiming> for InjectTimings {
    fn from(timing: LoopTiming) -> Self {
        timing.flag()
    }
}
