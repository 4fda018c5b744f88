use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: u64 = 1_000_000;

/// A point in wall-clock time, in microseconds since the Unix epoch.
///
/// [`Timestamp::NULL`] is reserved: inside the shared word it means "locked right now, or
/// already purged", so it is never a valid "last unlocked at" value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const NULL: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(MICROS_PER_SEC))
    }

    /// Times before the epoch collapse to [`Timestamp::NULL`].
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(u64::try_from(d.as_micros()).unwrap_or(u64::MAX)),
            Err(_) => Self::NULL,
        }
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub const fn as_secs(self) -> u64 {
        self.0 / MICROS_PER_SEC
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Truncates to whole seconds, which is all a narrow wire word can carry.
    pub const fn floor_to_secs(self) -> Self {
        Self::from_secs(self.as_secs())
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }
}
