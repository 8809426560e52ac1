//! Monotonic time source for keepalive and retry deadlines.

/// A monotonic millisecond clock.
///
/// The session never sleeps; it only compares timestamps taken from this
/// clock, so any counter that never goes backwards works (a SysTick counter,
/// an RTC, `embassy_time::Instant`, ...).
///
/// # Examples
///
/// ```rust
/// use core::cell::Cell;
/// use libiot_mqtt::system::clock::Clock;
///
/// struct TickCounter(Cell<u64>);
///
/// impl Clock for TickCounter {
///     fn now_ms(&self) -> u64 {
///         self.0.get()
///     }
/// }
///
/// let clock = TickCounter(Cell::new(0));
/// clock.0.set(1500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed epoch.
    fn now_ms(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// [`Clock`] backed by `std::time::Instant`.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// A clock whose zero is now.
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
