//! Per-run state: the two share layers, the alignment offset, the current
//! composite, and one generation counter per layer slot.
//!
//! Every upload takes a [`Ticket`]. A layer is only committed while its
//! ticket is still the newest for that slot, so a slow decode that finishes
//! after a newer upload can never overwrite it.

use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::imaging::{AlignmentOffset, PixelBuffer};
use crate::pipeline::CompositeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "a" | "A" | "1" => Some(Slot::A),
            "b" | "B" | "2" => Some(Slot::B),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// Download name used for this layer.
    pub fn file_name(self) -> &'static str {
        match self {
            Slot::A => "layer_1.png",
            Slot::B => "layer_2.png",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::A => "A",
            Slot::B => "B",
        })
    }
}

/// A normalized upload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLayer {
    label: String,
    buffer: PixelBuffer,
}

impl ShareLayer {
    pub fn new(label: impl Into<String>, buffer: PixelBuffer) -> Self {
        Self {
            label: label.into(),
            buffer,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }
}

/// Proof of which generation an upload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub slot: Slot,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct Session {
    layers: [Option<Rc<ShareLayer>>; 2],
    generations: [u64; 2],
    offset: AlignmentOffset,
    composite: Option<Rc<CompositeResult>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation for `slot`, superseding anything in flight.
    pub fn begin(&mut self, slot: Slot) -> Ticket {
        let g = &mut self.generations[slot.index()];
        *g += 1;
        Ticket {
            slot,
            generation: *g,
        }
    }

    /// Adopt a generation number issued by the host (the bridge path). Older
    /// than the newest seen means stale and yields `None`; a repeat of the
    /// newest is accepted so a retried upload still lands.
    pub fn observe(&mut self, slot: Slot, generation: u64) -> Option<Ticket> {
        let current = &mut self.generations[slot.index()];
        if generation < *current {
            debug!(%slot, generation, current = *current, "dropping stale upload");
            return None;
        }
        *current = generation;
        Some(Ticket { slot, generation })
    }

    pub fn generation(&self, slot: Slot) -> u64 {
        self.generations[slot.index()]
    }

    pub fn generations(&self) -> [u64; 2] {
        self.generations
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generations[ticket.slot.index()] == ticket.generation
    }

    /// Install `layer` if `ticket` is still current. A new layer invalidates
    /// the composite.
    pub fn commit(&mut self, ticket: Ticket, layer: Rc<ShareLayer>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                slot = %ticket.slot,
                generation = ticket.generation,
                current = self.generation(ticket.slot),
                "discarding superseded layer"
            );
            return false;
        }
        self.layers[ticket.slot.index()] = Some(layer);
        self.composite = None;
        true
    }

    pub fn layer(&self, slot: Slot) -> Option<Rc<ShareLayer>> {
        self.layers[slot.index()].clone()
    }

    pub fn offset(&self) -> AlignmentOffset {
        self.offset
    }

    pub fn set_offset(&mut self, offset: AlignmentOffset) {
        if offset != self.offset {
            self.offset = offset;
            self.composite = None;
        }
    }

    pub fn composite(&self) -> Option<Rc<CompositeResult>> {
        self.composite.clone()
    }

    pub fn set_composite(&mut self, composite: Rc<CompositeResult>) {
        self.composite = Some(composite);
    }

    /// Drop both layers and the composite. Generations advance so uploads
    /// still in flight are discarded when they land.
    pub fn clear(&mut self) {
        for slot in [Slot::A, Slot::B] {
            self.begin(slot);
        }
        self.layers = [None, None];
        self.composite = None;
        self.offset = AlignmentOffset::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::WHITE;

    fn layer(name: &str) -> Rc<ShareLayer> {
        Rc::new(ShareLayer::new(name, PixelBuffer::filled(2, 2, WHITE).unwrap()))
    }

    #[test]
    fn generations_increase_per_slot() {
        let mut s = Session::new();
        assert_eq!(s.begin(Slot::A).generation, 1);
        assert_eq!(s.begin(Slot::A).generation, 2);
        assert_eq!(s.begin(Slot::B).generation, 1);
    }

    #[test]
    fn stale_ticket_cannot_commit() {
        let mut s = Session::new();
        let old = s.begin(Slot::A);
        let new = s.begin(Slot::A);
        assert!(s.commit(new, layer("new.png")));
        assert!(!s.commit(old, layer("old.png")));
        assert_eq!(s.layer(Slot::A).unwrap().label(), "new.png");
    }

    #[test]
    fn upload_to_other_slot_does_not_supersede() {
        let mut s = Session::new();
        let a = s.begin(Slot::A);
        let _b = s.begin(Slot::B);
        assert!(s.commit(a, layer("a.png")));
    }

    #[test]
    fn observe_rejects_older_accepts_repeat() {
        let mut s = Session::new();
        assert!(s.observe(Slot::B, 5).is_some());
        assert!(s.observe(Slot::B, 4).is_none());
        assert!(s.observe(Slot::B, 5).is_some());
        assert_eq!(s.generation(Slot::B), 5);
    }

    #[test]
    fn clear_supersedes_in_flight() {
        let mut s = Session::new();
        let t = s.begin(Slot::A);
        s.set_offset(AlignmentOffset::new(3, 3));
        s.clear();
        assert!(!s.commit(t, layer("late.png")));
        assert!(s.layer(Slot::A).is_none());
        assert_eq!(s.offset(), AlignmentOffset::default());
    }

    #[test]
    fn slot_parse_and_names() {
        assert_eq!(Slot::parse("a"), Some(Slot::A));
        assert_eq!(Slot::parse("2"), Some(Slot::B));
        assert_eq!(Slot::parse("c"), None);
        assert_eq!(Slot::B.file_name(), "layer_2.png");
        assert_eq!(Slot::A.to_string(), "A");
        assert_eq!(Slot::A.other(), Slot::B);
    }
}
