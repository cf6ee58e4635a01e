use heapless::Deque;

use crate::error::MidiError;
use crate::packet::EventPacket;

/// Bounded byte FIFO that only ever holds whole event packets.
///
/// A push never overwrites: with fewer than four bytes free it fails with
/// `BufferFull` and the caller backs off.
pub struct PacketFifo<const BYTES: usize> {
    bytes: Deque<u8, BYTES>,
}

impl<const BYTES: usize> Default for PacketFifo<BYTES> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BYTES: usize> PacketFifo<BYTES> {
    pub const fn new() -> Self {
        Self {
            bytes: Deque::new(),
        }
    }

    pub fn push(&mut self, packet: EventPacket) -> Result<(), MidiError> {
        if self.free_bytes() < EventPacket::LEN {
            return Err(MidiError::BufferFull);
        }
        packet
            .to_bytes()
            .into_iter()
            .try_for_each(|byte| self.bytes.push_back(byte))
            .map_err(|_| MidiError::BufferFull)
    }

    pub fn pop(&mut self) -> Option<EventPacket> {
        let packet = self.peek()?;
        self.discard(EventPacket::LEN);
        Some(packet)
    }

    pub fn peek(&self) -> Option<EventPacket> {
        let mut raw = [0; EventPacket::LEN];
        let mut iter = self.bytes.iter();
        for byte in raw.iter_mut() {
            *byte = *iter.next()?;
        }
        Some(EventPacket::from_bytes(raw))
    }

    /// Copies as many whole packets as fit into `buf` without removing them.
    /// Returns the number of bytes copied.
    pub fn copy_front(&self, buf: &mut [u8]) -> usize {
        let len = self.bytes.len().min(buf.len() / EventPacket::LEN * EventPacket::LEN);
        for (slot, byte) in buf[..len].iter_mut().zip(self.bytes.iter()) {
            *slot = *byte;
        }
        len
    }

    /// Drops `len` bytes from the front, rounded down to whole packets.
    pub fn discard(&mut self, len: usize) {
        for _ in 0..len / EventPacket::LEN * EventPacket::LEN {
            self.bytes.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Queued packets.
    pub fn len(&self) -> usize {
        self.bytes.len() / EventPacket::LEN
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// No room for another packet.
    pub fn is_full(&self) -> bool {
        self.free_bytes() < EventPacket::LEN
    }

    /// Packets that can still be pushed.
    pub fn free(&self) -> usize {
        self.free_bytes() / EventPacket::LEN
    }

    pub fn free_bytes(&self) -> usize {
        BYTES - self.bytes.len()
    }
}
