//! Encoding of the lock flag and last-usage timestamp into one shared word.
//!
//! Layout of the word (both widths):
//! - bit 0: lock flag, `1` = locked
//! - bits 1..: wire timestamp, always zero while locked
//!
//! An unlocked word whose timestamp bits are zero marks purged memory.

use crate::Timestamp;

const LOCK_BIT: u64 = 1;
const TIMESTAMP_SHIFT: u32 = 1;

/// Width of the shared word, which decides the precision of the wire timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireWidth {
    /// 32-bit word: whole seconds in 31 bits.
    Narrow,
    /// 64-bit word: microseconds in 63 bits.
    Wide,
}

impl WireWidth {
    /// The width matching the target's native machine word.
    pub const NATIVE: WireWidth = if cfg!(target_pointer_width = "64") {
        WireWidth::Wide
    } else {
        WireWidth::Narrow
    };

    pub const fn bits(self) -> u32 {
        match self {
            WireWidth::Narrow => 32,
            WireWidth::Wide => 64,
        }
    }

    const fn max_wire_timestamp(self) -> u64 {
        (1u64 << (self.bits() - TIMESTAMP_SHIFT)) - 1
    }

    /// Serializes `t` into the timestamp field.
    ///
    /// Narrow words lose sub-second precision and saturate. A non-null timestamp never
    /// serializes to zero, so it cannot be mistaken for the purged sentinel.
    pub fn timestamp_to_wire(self, t: Timestamp) -> u64 {
        if t.is_null() {
            return 0;
        }
        let raw = match self {
            WireWidth::Narrow => t.as_secs(),
            WireWidth::Wide => t.as_micros(),
        };
        raw.clamp(1, self.max_wire_timestamp())
    }

    pub fn wire_to_timestamp(self, wire: u64) -> Timestamp {
        match self {
            WireWidth::Narrow => Timestamp::from_secs(wire),
            WireWidth::Wide => Timestamp::from_micros(wire),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// Decoded value of the shared word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharedState {
    /// Some instance holds the logical lock.
    Locked,
    /// Nobody holds the lock; the contents are intact and were last used at `last_used`.
    Unlocked { last_used: Timestamp },
    /// Nobody holds the lock and the contents have been discarded.
    Purged,
}

impl SharedState {
    pub const fn unlocked(last_used: Timestamp) -> Self {
        SharedState::Unlocked { last_used }
    }

    pub const fn lock_state(self) -> LockState {
        match self {
            SharedState::Locked => LockState::Locked,
            SharedState::Unlocked { .. } | SharedState::Purged => LockState::Unlocked,
        }
    }

    /// The "last unlocked at" timestamp, or [`Timestamp::NULL`] when locked or purged.
    pub const fn timestamp(self) -> Timestamp {
        match self {
            SharedState::Unlocked { last_used } => last_used,
            SharedState::Locked | SharedState::Purged => Timestamp::NULL,
        }
    }

    /// The state a peer expects to find when it last saw the word unlocked at `last_used`.
    ///
    /// A null `last_used` maps to [`SharedState::Purged`].
    pub const fn from_last_known_usage(last_used: Timestamp) -> Self {
        if last_used.is_null() {
            SharedState::Purged
        } else {
            SharedState::Unlocked { last_used }
        }
    }

    /// Locked memory and unlocked-but-not-purged memory are both still resident.
    pub const fn is_resident(self) -> bool {
        !matches!(self, SharedState::Purged)
    }

    pub fn encode(self, width: WireWidth) -> u64 {
        match self {
            SharedState::Locked => LOCK_BIT,
            SharedState::Purged => 0,
            SharedState::Unlocked { last_used } => {
                debug_assert!(
                    !last_used.is_null(),
                    "unlocked state needs a timestamp; use SharedState::Purged"
                );
                width.timestamp_to_wire(last_used) << TIMESTAMP_SHIFT
            }
        }
    }

    pub fn decode(word: u64, width: WireWidth) -> Self {
        if word & LOCK_BIT != 0 {
            return SharedState::Locked;
        }
        match word >> TIMESTAMP_SHIFT {
            0 => SharedState::Purged,
            wire => SharedState::Unlocked {
                last_used: width.wire_to_timestamp(wire),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_word_is_just_the_lock_bit() {
        for width in [WireWidth::Narrow, WireWidth::Wide] {
            assert_eq!(SharedState::Locked.encode(width), 1);
            assert_eq!(SharedState::decode(1, width), SharedState::Locked);
        }
    }

    #[test]
    fn zero_word_is_purged() {
        assert_eq!(SharedState::Purged.encode(WireWidth::Wide), 0);
        assert_eq!(SharedState::decode(0, WireWidth::Narrow), SharedState::Purged);
        assert!(!SharedState::Purged.is_resident());
    }

    #[test]
    fn wide_words_keep_microseconds() {
        let t = Timestamp::from_micros(1_700_000_000_123_456);
        let word = SharedState::unlocked(t).encode(WireWidth::Wide);
        assert_eq!(word & 1, 0);
        assert_eq!(
            SharedState::decode(word, WireWidth::Wide),
            SharedState::unlocked(t)
        );
    }

    #[test]
    fn narrow_words_floor_to_seconds() {
        let t = Timestamp::from_micros(1_700_000_000_654_321);
        let word = SharedState::unlocked(t).encode(WireWidth::Narrow);
        assert!(word <= u64::from(u32::MAX));
        assert_eq!(
            SharedState::decode(word, WireWidth::Narrow),
            SharedState::unlocked(Timestamp::from_secs(1_700_000_000))
        );
    }

    #[test]
    fn narrow_words_saturate_far_future() {
        let t = Timestamp::from_secs(u64::from(u32::MAX) * 4);
        let word = SharedState::unlocked(t).encode(WireWidth::Narrow);
        assert_eq!(word, u64::from(u32::MAX) & !1);
        assert_eq!(
            SharedState::decode(word, WireWidth::Narrow).timestamp(),
            Timestamp::from_secs((1 << 31) - 1)
        );
    }

    #[test]
    fn sub_second_narrow_timestamp_does_not_alias_purged() {
        let t = Timestamp::from_micros(10);
        let word = SharedState::unlocked(t).encode(WireWidth::Narrow);
        assert!(SharedState::decode(word, WireWidth::Narrow).is_resident());
    }
}
