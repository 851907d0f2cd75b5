//! Counter node side: quadrature decoding into interrupt safe counters.

use portable_atomic::{AtomicI32, Ordering};

use crate::{Axis, AxisData};

/// Raw position counters, written from the encoder edge interrupts and read
/// from the link interrupt. Every access is a single atomic operation, so a
/// 32 bit count is never observed half updated.
pub struct EncoderCounters {
    counts: AxisData<AtomicI32>,
}

impl EncoderCounters {
    pub const fn new() -> Self {
        Self { counts: AxisData { radius: AtomicI32::new(0), angle: AtomicI32::new(0) } }
    }

    pub fn add(&self, axis: Axis, delta: i32) {
        self.counts.match_id(axis).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self, axis: Axis) -> i32 {
        self.counts.match_id(axis).load(Ordering::Relaxed)
    }

    pub fn reset(&self, axis: Axis) {
        self.counts.match_id(axis).store(0, Ordering::Relaxed);
    }
}

impl Default for EncoderCounters {
    fn default() -> Self { Self::new() }
}

/// Quadrature state for one encoder. Samples carry channel A in bit 0 and
/// channel B in bit 1.
pub struct Quadrature {
    old: u8,
    missed: u16,
}

impl Quadrature {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start from the lines as they read now, so power up isn't an edge.
    pub const fn starting_at(sample: u8) -> Self {
        Self { old: sample & 0b11, missed: 0 }
    }

    /// Decode one pin change. Returns the count delta.
    ///
    /// Moving from `old` to `new` counts forward when `new + 2 * old` is 2 or
    /// 7, backward for the other single bit changes. A change of both bits at
    /// once means an edge was missed; it is counted in [`Quadrature::missed`]
    /// and does not move the position.
    pub fn update(&mut self, sample: u8) -> i32 {
        let new = sample & 0b11;
        let old = self.old;
        self.old = new;
        if new == old {
            return 0;
        }
        if new ^ old == 0b11 {
            self.missed = self.missed.saturating_add(1);
            return 0;
        }
        match new + 2 * old {
            2 | 7 => 1,
            _ => -1,
        }
    }

    pub fn missed(&self) -> u16 {
        self.missed
    }
}

impl Default for Quadrature {
    fn default() -> Self { Self::new() }
}
