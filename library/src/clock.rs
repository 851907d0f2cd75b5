use core::ops::{Add, AddAssign, Sub};

use ufmt::{uDisplay, uWrite, Formatter};

const MICROS_PER_SEC: u64 = 1_000_000;

/// Elapsed time since boot in microseconds.
///
/// Arithmetic saturates instead of wrapping. Use [`ClockValue::checked_sub`]
/// when an underflow needs to be seen, e.g. when timing a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockValue(u64);

impl ClockValue {
    pub const ZERO: ClockValue = ClockValue(0);

    pub const fn from_micros(us: u64) -> Self { Self(us) }
    pub const fn from_millis(ms: u64) -> Self { Self(ms * 1_000) }
    pub const fn from_secs(s: u64) -> Self { Self(s * MICROS_PER_SEC) }

    pub const fn as_micros(&self) -> u64 { self.0 }
    pub const fn as_millis(&self) -> u64 { self.0 / 1_000 }
    pub fn as_secs_f32(&self) -> f32 { self.0 as f32 / MICROS_PER_SEC as f32 }

    pub fn checked_add(self, rhs: ClockValue) -> Option<ClockValue> {
        self.0.checked_add(rhs.0).map(ClockValue)
    }

    pub fn checked_sub(self, rhs: ClockValue) -> Option<ClockValue> {
        self.0.checked_sub(rhs.0).map(ClockValue)
    }

    /// Divide a duration, used for averaging. Dividing by zero yields zero.
    pub fn div_runs(self, runs: u32) -> ClockValue {
        match runs {
            0 => ClockValue::ZERO,
            n => ClockValue(self.0 / n as u64),
        }
    }
}

impl Add for ClockValue {
    type Output = ClockValue;
    fn add(self, rhs: Self) -> Self::Output {
        ClockValue(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for ClockValue {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ClockValue {
    type Output = ClockValue;
    fn sub(self, rhs: Self) -> Self::Output {
        ClockValue(self.0.saturating_sub(rhs.0))
    }
}

// seconds.micros, six digit fraction
impl uDisplay for ClockValue {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
        where W: uWrite + ?Sized
    {
        let secs = self.0 / MICROS_PER_SEC;
        let frac = (self.0 % MICROS_PER_SEC) as u32;
        ufmt::uwrite!(f, "{}.", secs)?;
        let mut digit = 100_000;
        while digit > 1 && frac < digit {
            f.write_str("0")?;
            digit /= 10;
        }
        ufmt::uwrite!(f, "{}", frac)
    }
}

/// Free running time source. The firmware backs this with a hardware timer.
pub trait TimerSource {
    fn now(&self) -> ClockValue;
}

impl<T: TimerSource + ?Sized> TimerSource for &T {
    fn now(&self) -> ClockValue { (**self).now() }
}
