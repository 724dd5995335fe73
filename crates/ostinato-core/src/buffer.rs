//! Block buffers for the three port kinds.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

const EVENT_STACK_CAPACITY: usize = 64;

/// One timestamped event (MIDI-shaped: up to three raw bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Frame offset inside the current block.
    pub offset: u32,
    pub data: [u8; 3],
    pub len: u8,
}

impl Event {
    pub fn from_bytes(offset: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            offset,
            data,
            len: len as u8,
        }
    }

    pub fn note_on(offset: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::from_bytes(offset, &[0x90 | (channel & 0x0f), note, velocity])
    }

    pub fn note_off(offset: u32, channel: u8, note: u8) -> Self {
        Self::from_bytes(offset, &[0x80 | (channel & 0x0f), note, 0])
    }

    pub fn control_change(offset: u32, channel: u8, controller: u8, value: u8) -> Self {
        Self::from_bytes(offset, &[0xb0 | (channel & 0x0f), controller, value])
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.len == 3 && self.data[0] & 0xf0 == 0x90 && self.data[2] > 0
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.len >= 2
            && (self.data[0] & 0xf0 == 0x80 || (self.data[0] & 0xf0 == 0x90 && self.data[2] == 0))
    }
}

/// Event stream for one block, kept sorted by frame offset.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    events: SmallVec<[Event; EVENT_STACK_CAPACITY]>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
        // Typical producers append in order; only sort when they didn't.
        if self.events.len() >= 2 {
            let n = self.events.len();
            if self.events[n - 2].offset > self.events[n - 1].offset {
                self.events.sort_by_key(|e| e.offset);
            }
        }
    }

    /// Merge another stream into this one, preserving offset order.
    pub fn merge_from(&mut self, other: &EventBuffer) {
        if other.events.is_empty() {
            return;
        }
        self.events.extend_from_slice(&other.events);
        self.events.sort_by_key(|e| e.offset);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn copy_from(&mut self, other: &EventBuffer) {
        self.events.clear();
        self.events.extend_from_slice(&other.events);
    }
}
