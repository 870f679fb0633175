//! Time source injected into every component that stamps or compares times.

use chrono::{DateTime, Utc};

/// Clock trait for obtaining the current time.
///
/// Purchases, sweeps and check-ins never call `Utc::now()` directly; they ask
/// the injected clock so tests can pin or advance time.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
