//! Transports for exercising the link without hardware.

use arrayvec::ArrayVec;

use crate::{EncoderCounters, Responder, Transport};

/// Replays canned replies and records what was sent.
pub struct ScriptedTransport {
    replies: ArrayVec<u8, 64>,
    next: usize,
    pub sent: ArrayVec<u8, 64>,
    pub selects: ArrayVec<bool, 16>,
    pub settles: u32,
}

impl ScriptedTransport {
    pub fn new(replies: &[u8]) -> Self {
        let mut script = ArrayVec::new();
        script.try_extend_from_slice(replies).unwrap();
        Self { replies: script, next: 0, sent: ArrayVec::new(), selects: ArrayVec::new(), settles: 0 }
    }
}

impl Transport for ScriptedTransport {
    fn select(&mut self, active: bool) {
        let _ = self.selects.try_push(active);
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        let _ = self.sent.try_push(byte);
        let reply = self.replies.get(self.next).copied().unwrap_or(0);
        self.next += 1;
        reply
    }

    fn settle(&mut self) {
        self.settles += 1;
    }
}

/// Wires the requester straight into a [`Responder`].
pub struct Loopback<'a> {
    responder: Responder<'a>,
    exchanges: usize,
    corrupt: Option<(usize, u8)>,
}

impl<'a> Loopback<'a> {
    pub fn new(counters: &'a EncoderCounters) -> Self {
        Self { responder: Responder::new(counters), exchanges: 0, corrupt: None }
    }

    /// Flip `mask` bits in the reply of the `index`th exchange.
    pub fn corrupt_exchange(&mut self, index: usize, mask: u8) {
        self.corrupt = Some((index, mask));
    }
}

impl Transport for Loopback<'_> {
    fn select(&mut self, active: bool) {
        if !active {
            self.responder.deselect();
        }
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        let mut reply = self.responder.exchange(byte);
        if let Some((index, mask)) = self.corrupt {
            if index == self.exchanges {
                reply ^= mask;
            }
        }
        self.exchanges += 1;
        reply
    }
}
