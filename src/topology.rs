//! Tree and ring neighborhood over the engine's link set.
//!
//! Links live in one contiguous vector owned by the engine; the topology
//! refers to them by index and is rebuilt wholesale on every (re)bootstrap,
//! so an index is stable for the lifetime of one mesh.

use crate::types::Rank;

#[derive(Debug, Default, Clone)]
pub(crate) struct Topology {
    /// Indices of the tree neighbors (children plus, if present, the parent)
    /// into the link vector, in link-vector order.
    pub tree: Vec<usize>,
    /// Position of the parent within `tree`; `None` at the tree root.
    pub parent_pos: Option<usize>,
    /// Parent rank as announced by the coordinator.
    pub parent_rank: Option<Rank>,
    /// Ring neighbors as indices into the link vector. Stored for the
    /// recovery protocols layered above the engine; the collectives only
    /// use the tree.
    pub ring_prev: Option<usize>,
    pub ring_next: Option<usize>,
}

impl Topology {
    pub fn clear(&mut self) {
        *self = Topology::default();
    }

    /// Number of tree children; a worker with none relays parent-to-parent
    /// and the reduction collapses trivially.
    pub fn num_children(&self) -> usize {
        self.tree.len() - self.parent_pos.is_some() as usize
    }
}
