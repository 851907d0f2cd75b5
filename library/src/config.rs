//! Compile time tuning for the plotter.

use crate::ClockValue;

// Encoder link wire bytes.
pub const CMD_READ_CHANNEL_1: u8 = 0x01;
pub const CMD_READ_CHANNEL_2: u8 = 0x02;
pub const CMD_RESET_CHANNEL_1: u8 = 0x03;
pub const CMD_RESET_CHANNEL_2: u8 = 0x04;
pub const READ_FILLER: u8 = 0xFF;
pub const RESET_FILLER: u8 = 0xFE;

/// Delay between byte exchanges on the encoder link, in microseconds.
pub const LINK_SETTLE_US: u32 = 20;
/// Attempt cap used when the firmware runs with bounded link retries.
pub const MAX_LINK_ATTEMPTS: u16 = 50;

// PID fixed point scaling. Gains are integers, the term is gain * x / SCALE.
pub const P_SCALE: i64 = 10_000;
pub const I_SCALE: i64 = 1_000_000;
pub const D_SCALE: i64 = 100;
/// Bound on the accumulated integral error, in encoder counts.
pub const INTEGRAL_LIMIT: i32 = 1_000;
pub const DUTY_CYCLE_MAX: u8 = 255;
/// |error| at or below this counts as on target.
pub const ARRIVAL_TOLERANCE: i32 = 400;
/// On-target regulating cycles before the segment counts as done.
pub const ARRIVAL_COUNT: u8 = 10;

pub const PID_INTERVAL: ClockValue = ClockValue::from_millis(20);
pub const STATUS_INTERVAL: ClockValue = ClockValue::from_secs(1);
