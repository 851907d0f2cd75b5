use arrayvec::ArrayVec;

use crate::link::{checksum, Command};
use crate::EncoderCounters;

/// Byte shifted out when the counter node has nothing queued.
pub const IDLE_REPLY: u8 = 0x00;

/// Counter node side of the encoder link.
///
/// Mirrors an SPI slave data register: the byte returned by
/// [`Responder::exchange`] is the one loaded after the previous exchange, and
/// the incoming byte decides what gets loaded next. A command byte always
/// starts a fresh reply, so a transaction broken by noise resynchronises on
/// the next command.
pub struct Responder<'a> {
    counters: &'a EncoderCounters,
    outgoing: u8,
    reply: ArrayVec<u8, 5>,
}

impl<'a> Responder<'a> {
    pub fn new(counters: &'a EncoderCounters) -> Self {
        Self { counters, outgoing: IDLE_REPLY, reply: ArrayVec::new() }
    }

    pub fn exchange(&mut self, incoming: u8) -> u8 {
        let shifted_out = self.outgoing;
        match Command::parse(incoming) {
            Some(Command::Read(axis)) => {
                let data = self.counters.get(axis).to_le_bytes();
                let [b0, b1, b2, b3] = data;
                self.reply = ArrayVec::from([b0, b1, b2, b3, incoming.wrapping_add(checksum(&data))]);
            },
            Some(Command::Reset(axis)) => {
                self.counters.reset(axis);
                self.reply.clear();
                self.reply.push(incoming);
            },
            None => {},
        }
        self.outgoing = self.reply.pop_at(0).unwrap_or(IDLE_REPLY);
        shifted_out
    }

    /// Byte loaded for the next exchange.
    pub fn outgoing(&self) -> u8 {
        self.outgoing
    }

    /// The requester released the link; drop whatever was left of a reply.
    pub fn deselect(&mut self) {
        self.reply.clear();
        self.outgoing = IDLE_REPLY;
    }
}
