// Graph Walker
//
// Purpose: transitively freeze everything reachable from a root.
// Invariant: children are frozen before their parent, and a private record
// member is never descended, whatever it holds. Every visited handle first
// stores its contents back in place, so walking an already frozen graph faults.
//
// Cycles cannot be expressed: `Ptr`, `Seq` and `Map` own their contents
// exclusively and shared references (`Rc`, `Arc`, `Box<dyn _>`) are
// polymorphic references that are never followed. No visited set is kept.

use crate::engine::FreezeEngine;
use crate::shape::{ElementsNode, MapNode, Node, PointerNode, RecordNode, SequenceNode};
use log::trace;
use serde::Serialize;

/// Counters collected during one deep freeze
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub nodes_visited: usize,
    pub pointers_frozen: usize,
    pub sequences_frozen: usize,
    pub maps_frozen: usize,
    pub private_members_skipped: usize,
    pub max_depth: usize,
}

impl WalkStats {
    /// Pointer, sequence and map handles frozen (maps count once).
    pub fn regions_frozen(&self) -> usize {
        self.pointers_frozen + self.sequences_frozen + self.maps_frozen
    }
}

/// Depth-first freezer over [`Node`]s
pub struct GraphWalker<'e> {
    engine: &'e FreezeEngine,
    depth: usize,
    stats: WalkStats,
}

impl<'e> GraphWalker<'e> {
    pub fn new(engine: &'e FreezeEngine) -> Self {
        Self {
            engine,
            depth: 0,
            stats: WalkStats::default(),
        }
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    pub fn into_stats(self) -> WalkStats {
        self.stats
    }

    /// Freeze `node` and everything reachable from it, children first.
    pub fn walk(&mut self, node: Node<'_>) {
        self.stats.nodes_visited += 1;
        self.depth += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.depth);

        match node {
            Node::Scalar | Node::PolymorphicRef => {}
            Node::Pointer(pointer) => self.walk_pointer(pointer),
            Node::FixedArray(elements) => self.walk_elements(elements),
            Node::Sequence(sequence) => self.walk_sequence(sequence),
            Node::Map(map) => self.walk_map(map),
            Node::Record(record) => self.walk_record(record),
        }

        self.depth -= 1;
    }

    fn walk_pointer(&mut self, pointer: &mut dyn PointerNode) {
        if pointer.is_null() {
            return;
        }
        pointer.store_in_place();
        if pointer.pointee_kind().can_hold_pointers() {
            if let Some(pointee) = pointer.pointee() {
                self.walk(pointee);
            }
        }
        if pointer.freeze_pointee(self.engine) {
            self.stats.pointers_frozen += 1;
        }
    }

    fn walk_elements<E: ElementsNode + ?Sized>(&mut self, elements: &mut E) {
        if !elements.element_kind().can_hold_pointers() {
            return;
        }
        for i in 0..elements.len() {
            self.walk(elements.element(i));
        }
    }

    fn walk_sequence(&mut self, sequence: &mut dyn SequenceNode) {
        if sequence.is_nil() {
            return;
        }
        sequence.store_in_place();
        self.walk_elements(sequence);
        if sequence.freeze_backing(self.engine) {
            self.stats.sequences_frozen += 1;
        }
    }

    fn walk_map(&mut self, map: &mut dyn MapNode) {
        if map.is_nil() {
            return;
        }
        map.store_in_place();
        if map.key_kind().can_hold_pointers() || map.value_kind().can_hold_pointers() {
            map.rebuild_frozen(self);
        }
        if map.freeze_control(self.engine) {
            self.stats.maps_frozen += 1;
        }
    }

    fn walk_record(&mut self, record: &mut dyn RecordNode) {
        let type_name = record.type_name();
        for member in record.members() {
            if !member.is_exported() {
                trace!("Skipping private member {}.{}", type_name, member.name);
                self.stats.private_members_skipped += 1;
                continue;
            }
            if member.kind.can_hold_pointers() {
                self.walk(member.node);
            }
        }
    }
}
