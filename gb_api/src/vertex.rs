use crate::VertexId;
use derive_new::new;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct Edge<E> {
    pub target: VertexId,
    pub value: E,
}

/// A vertex with its value, its outgoing edges and its halt flag.
///
/// A vertex is owned by exactly one partition and only that partition's compute step mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex<V, E> {
    id: VertexId,
    value: V,
    edges: Vec<Edge<E>>,
    halted: bool,
}

impl<V, E> Vertex<V, E> {
    pub fn new(id: VertexId, value: V, edges: Vec<Edge<E>>) -> Self {
        Self { id, value, edges, halted: false }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn set_value(&mut self, value: V) {
        self.value = value;
    }

    pub fn edges(&self) -> &[Edge<E>] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn add_edge(&mut self, edge: Edge<E>) {
        self.edges.push(edge);
    }

    /// Removes every edge pointing to `target` and returns how many were removed.
    pub fn remove_edges(&mut self, target: VertexId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|edge| edge.target != target);
        before - self.edges.len()
    }

    /// The vertex stays inactive until a message wakes it up.
    pub fn vote_to_halt(&mut self) {
        self.halted = true;
    }

    pub fn wake_up(&mut self) {
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Splits the vertex into its parts. Used by output formats.
    pub fn into_parts(self) -> (VertexId, V, Vec<Edge<E>>) {
        (self.id, self.value, self.edges)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Edge, Vertex};

    #[test]
    fn remove_edges_by_target() {
        let edges = vec![Edge::new(2, 1), Edge::new(3, 1), Edge::new(2, 7)];
        let mut vertex = Vertex::new(1, 0.5, edges);
        assert_eq!(vertex.remove_edges(2), 2);
        assert_eq!(vertex.edges(), &[Edge::new(3, 1)]);
        assert_eq!(vertex.remove_edges(9), 0);
    }

    #[test]
    fn halt_and_wake() {
        let mut vertex: Vertex<u64, ()> = Vertex::new(4, 0, Vec::new());
        assert!(!vertex.is_halted());
        vertex.vote_to_halt();
        assert!(vertex.is_halted());
        vertex.wake_up();
        assert!(!vertex.is_halted());
    }
}
