//! Time-of-day window policy for auxiliary light activation.

/// Decide whether `hour` falls inside the configured window.
///
/// Windows may wrap past midnight (e.g. 18 -> 6 covers evening and early
/// morning). A zero-width window (`start == end`) never matches; it is an
/// explicit off state rather than an all-day window.
pub fn in_window(hour: u8, start: u8, end: u8) -> bool {
    if start == end {
        return false;
    }

    if start < end {
        hour >= start && hour < end
    } else {
        // Wraps past midnight
        hour >= start || hour < end
    }
}
