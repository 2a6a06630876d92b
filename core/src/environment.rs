//! Environment traits injected into the engine.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Hold expiry, order deadlines and ticket timestamps all read time through
/// this trait so tests can move time forward deterministically.
///
/// # Examples
///
/// ```
/// use marquee_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
