//! Timestamp conversions between the capture layer's `{sec, usec}` pair and
//! milliseconds-since-epoch, the unit every breakdown field is expressed in.

/// A packet or event timestamp as handed down from the capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub sec: u64,
    pub usec: u64,
}

impl Timestamp {
    pub fn new(sec: u64, usec: u64) -> Self {
        Self { sec, usec }
    }

    /// Milliseconds since the Unix epoch, the unit breakdown JSON fields use.
    pub fn as_millis(&self) -> u64 {
        self.sec.saturating_mul(1000) + self.usec / 1000
    }

    /// Signed millisecond delta `self - other`, used for latency fields that
    /// must tolerate a parser racing ahead of its own clock source in tests.
    pub fn millis_since(&self, other: Timestamp) -> i64 {
        self.as_millis() as i64 - other.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_rounds_down_to_whole_millisecond() {
        let ts = Timestamp::new(1, 999_999);
        assert_eq!(ts.as_millis(), 1999);
    }

    #[test]
    fn delta_is_nonnegative_for_forward_progressing_clock() {
        let a = Timestamp::new(10, 0);
        let b = Timestamp::new(11, 500_000);
        assert_eq!(b.millis_since(a), 1500);
    }
}
