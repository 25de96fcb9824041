use crate::error::{deserialize_error, serialize_error, GBError};
use gb_api::{Edge, PartitionId, Vertex, VertexId, WorkerId};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Graph changes requested by compute, applied by the owner of the source vertex after the
/// superstep barrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutations<E> {
    pub edge_removals: Vec<(VertexId, VertexId)>,
    pub edge_additions: Vec<(VertexId, Edge<E>)>,
    pub vertex_removals: Vec<VertexId>,
}

impl<E> Default for Mutations<E> {
    fn default() -> Self {
        Self { edge_removals: Vec::new(), edge_additions: Vec::new(), vertex_removals: Vec::new() }
    }
}

impl<E> Mutations<E> {
    pub fn is_empty(&self) -> bool {
        self.edge_removals.is_empty()
            && self.edge_additions.is_empty()
            && self.vertex_removals.is_empty()
    }

    pub fn extend(&mut self, other: Mutations<E>) {
        self.edge_removals.extend(other.edge_removals);
        self.edge_additions.extend(other.edge_additions);
        self.vertex_removals.extend(other.vertex_removals);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload<V, E, M> {
    /// Messages for vertices owned by the destination worker.
    Messages(Vec<(VertexId, M)>),
    /// Loaded vertices routed to their owner.
    Vertices(Vec<Vertex<V, E>>),
    /// Loaded edges routed to the owner of their source.
    Edges(Vec<(VertexId, Edge<E>)>),
    Mutations(Mutations<E>),
    /// A whole partition moving to its new owner.
    Partition(PartitionId, Vec<u8>),
    /// The sender has sent all `frames` frames of this exchange.
    End { frames: u64 },
}

/// Everything that crosses the network between workers. `sequence` is the command the frame
/// belongs to, so frames of an abandoned exchange can be told apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct WireFrame<V, E, M> {
    pub sequence: u64,
    pub source: WorkerId,
    pub destination: WorkerId,
    pub payload: Payload<V, E, M>,
}

impl<V: Serialize, E: Serialize, M: Serialize> WireFrame<V, E, M> {
    pub fn encode(&self) -> Result<Vec<u8>, GBError> {
        bincode::serialize(self).map_err(|e| serialize_error("wire frame", e))
    }
}

impl<V: DeserializeOwned, E: DeserializeOwned, M: DeserializeOwned> WireFrame<V, E, M> {
    pub fn decode(bytes: &[u8]) -> Result<Self, GBError> {
        bincode::deserialize(bytes).map_err(|e| deserialize_error("wire frame", e))
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::wire::{Mutations, Payload, WireFrame};
    use gb_api::Edge;

    #[test]
    fn message_batch_keeps_order() {
        let frame: WireFrame<(), (), f64> =
            WireFrame::new(4, 0, 1, Payload::Messages(vec![(9, 0.5), (3, 1.5), (9, 2.5)]));
        let decoded: WireFrame<(), (), f64> = WireFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert!(WireFrame::<(), (), f64>::decode(&[1, 2]).is_err());
    }

    #[test]
    fn mutations_merge() {
        let mut mutations: Mutations<u32> = Mutations::default();
        assert!(mutations.is_empty());
        mutations.extend(Mutations {
            edge_removals: vec![(1, 2)],
            edge_additions: vec![(1, Edge::new(3, 5))],
            vertex_removals: vec![7],
        });
        mutations.extend(Mutations { vertex_removals: vec![8], ..Mutations::default() });
        assert_eq!(mutations.vertex_removals, vec![7, 8]);
        assert!(!mutations.is_empty());
    }
}
