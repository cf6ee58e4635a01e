use defmt::Format;

/// Monotonic millisecond tick source.
///
/// The counter wraps roughly every 49.7 days, so compare readings through
/// [`Instant::elapsed_since`] and never with `<`.
pub trait TimeSource {
    fn now_millis(&self) -> u32;

    fn now(&self) -> Instant {
        Instant(self.now_millis())
    }
}

impl<F: Fn() -> u32> TimeSource for F {
    fn now_millis(&self) -> u32 {
        self()
    }
}

/// A reading of a [`TimeSource`].
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instant(u32);

impl Instant {
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Milliseconds from `earlier` to `self`, correct across one wrap.
    pub const fn elapsed_since(self, earlier: Instant) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    pub const fn has_elapsed(self, since: Instant, millis: u32) -> bool {
        self.elapsed_since(since) >= millis
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn elapsed_survives_counter_wrap() {
        let before = Instant::from_millis(u32::MAX - 4);
        let after = Instant::from_millis(5);

        assert_eq!(after.elapsed_since(before), 10);
        assert!(after.has_elapsed(before, 10));
        assert!(!after.has_elapsed(before, 11));
    }

    #[test]
    fn closures_are_time_sources() {
        let clock = || 1234u32;

        assert_eq!(clock.now(), Instant::from_millis(1234));
    }
}
