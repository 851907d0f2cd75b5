//! Requester side of the encoder link.
//!
//! The controller fetches 32 bit position counters from the counter node one
//! byte at a time. A transfer is six exchanges:
//!
//! | exchange | sent            | received                       |
//! |----------|-----------------|--------------------------------|
//! | 0        | read command    | (ignored)                      |
//! | 1..=4    | `0xFF` filler   | position, least significant first |
//! | 5        | `0xFF` filler   | checksum from the counter node |
//!
//! The checksum is the wrapping 8 bit sum of the command and the four data
//! bytes. The cached position only changes when both sides agree.
//!
//! Every exchange blocks until the transport reports completion and there is
//! no timeout. The link is wired point to point with exactly one requester
//! and one responder; it is not safe on a shared bus.

use core::cell::RefCell;

use crate::config::{CMD_READ_CHANNEL_1, CMD_READ_CHANNEL_2, CMD_RESET_CHANNEL_1, CMD_RESET_CHANNEL_2, READ_FILLER, RESET_FILLER};
use crate::{Axis, AxisData, LinkError};

/// Byte synchronous exchange with the counter node.
pub trait Transport {
    /// Drive the link-active (slave select) signal.
    fn select(&mut self, active: bool);
    /// Clock one byte out and return the byte clocked in. Blocks until done.
    fn transfer(&mut self, byte: u8) -> u8;
    /// Settling delay between exchanges.
    fn settle(&mut self) {}
}

/// A command byte understood by the counter node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Read(Axis),
    Reset(Axis),
}

impl Command {
    pub fn parse(byte: u8) -> Option<Self> {
        match byte {
            CMD_READ_CHANNEL_1 => Some(Command::Read(Axis::Radius)),
            CMD_READ_CHANNEL_2 => Some(Command::Read(Axis::Angle)),
            CMD_RESET_CHANNEL_1 => Some(Command::Reset(Axis::Radius)),
            CMD_RESET_CHANNEL_2 => Some(Command::Reset(Axis::Angle)),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Command::Read(axis) => axis.read_command(),
            Command::Reset(axis) => axis.reset_command(),
        }
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// How long to keep retrying a failed transfer or an unconfirmed reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry until it works. Hangs if the counter node is gone.
    #[default]
    Unbounded,
    /// Give up after this many attempts.
    Bounded(u16),
}

impl RetryPolicy {
    fn allows_another(&self, attempts: u16) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Bounded(limit) => attempts < *limit,
        }
    }
}

/// Local copy of one remote counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelCache {
    pub position: i32,
    /// Transfers that failed their checksum since the last reset.
    pub errors: u16,
    /// The most recent transfer failed its checksum.
    pub error_flag: bool,
}

pub struct EncoderLink<T: Transport> {
    transport: T,
    channels: AxisData<ChannelCache>,
}

impl<T: Transport> EncoderLink<T> {
    pub fn new(mut transport: T) -> Self {
        transport.select(false);
        Self { transport, channels: AxisData::default() }
    }

    pub fn position(&self, axis: Axis) -> i32 { self.channels.match_id(axis).position }
    pub fn error_count(&self, axis: Axis) -> u16 { self.channels.match_id(axis).errors }
    pub fn last_transfer_failed(&self, axis: Axis) -> bool { self.channels.match_id(axis).error_flag }
    pub fn channel(&self, axis: Axis) -> &ChannelCache { self.channels.match_id(axis) }
    pub fn channels(&self) -> &AxisData<ChannelCache> { &self.channels }
    pub fn transport(&self) -> &T { &self.transport }
    pub fn transport_mut(&mut self) -> &mut T { &mut self.transport }
    pub fn free(self) -> T { self.transport }

    fn exchange(&mut self, byte: u8) -> u8 {
        let received = self.transport.transfer(byte);
        self.transport.settle();
        received
    }

    /// Run one position transfer. Returns whether the checksums matched.
    pub fn fetch(&mut self, axis: Axis) -> bool {
        let command = axis.read_command();
        self.transport.select(true);
        self.exchange(command);
        let mut data = [0u8; 4];
        for byte in data.iter_mut() {
            *byte = self.exchange(READ_FILLER);
        }
        let remote_sum = self.exchange(READ_FILLER);
        self.transport.select(false);

        let local_sum = command.wrapping_add(checksum(&data));
        let channel = self.channels.match_id_mut(axis);
        if local_sum == remote_sum {
            channel.position = i32::from_le_bytes(data);
            channel.error_flag = false;
            true
        }
        else {
            channel.error_flag = true;
            channel.errors = channel.errors.saturating_add(1);
            false
        }
    }

    /// Fetch until a transfer passes its checksum.
    pub fn fetch_until_valid(&mut self, axis: Axis, policy: RetryPolicy) -> Result<i32, LinkError> {
        let mut attempts: u16 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            if self.fetch(axis) {
                return Ok(self.position(axis));
            }
            if !policy.allows_another(attempts) {
                return Err(LinkError::ChecksumRetriesExhausted { axis, attempts });
            }
        }
    }

    /// Zero the remote counter. The counter node confirms by echoing the
    /// reset command; the whole exchange repeats until it does.
    pub fn clear(&mut self, axis: Axis, policy: RetryPolicy) -> Result<(), LinkError> {
        let command = axis.reset_command();
        let mut attempts: u16 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            self.transport.select(true);
            self.exchange(command);
            let confirm = self.exchange(RESET_FILLER);
            self.transport.select(false);
            if confirm == command {
                *self.channels.match_id_mut(axis) = ChannelCache::default();
                return Ok(());
            }
            if !policy.allows_another(attempts) {
                return Err(LinkError::ResetNotConfirmed { axis, attempts });
            }
        }
    }
}

/// Where a controller gets its position feedback from.
pub trait PositionSource {
    fn fetch_position(&mut self, axis: Axis, policy: RetryPolicy) -> Result<i32, LinkError>;
}

impl<T: Transport> PositionSource for EncoderLink<T> {
    fn fetch_position(&mut self, axis: Axis, policy: RetryPolicy) -> Result<i32, LinkError> {
        self.fetch_until_valid(axis, policy)
    }
}

// one link shared by both axis controllers
impl<S: PositionSource> PositionSource for &RefCell<S> {
    fn fetch_position(&mut self, axis: Axis, policy: RetryPolicy) -> Result<i32, LinkError> {
        self.borrow_mut().fetch_position(axis, policy)
    }
}
