use gb_api::{Edge, PartitionId, Vertex, VertexId};
use hashbrown::HashMap;

pub mod owners;
pub mod serde;

pub use owners::PartitionOwners;

// Fibonacci hashing spreads consecutive ids over all partitions.
const HASH_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Maps a vertex to its logical partition. Depends only on the id and the partition count, so a
/// vertex keeps its partition for the lifetime of the job no matter which worker owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct HashPartitioner {
    partition_count: PartitionId,
}

impl HashPartitioner {
    pub fn with_partitions(partition_count: usize) -> Self {
        Self::new(partition_count as PartitionId)
    }

    #[inline]
    pub fn partition(&self, vertex_id: VertexId) -> PartitionId {
        let hash = vertex_id.wrapping_mul(HASH_MULTIPLIER) >> 32;
        (hash % u64::from(self.partition_count)) as PartitionId
    }

    pub fn partition_count(&self) -> PartitionId {
        self.partition_count
    }
}

/// A disjoint shard of the vertex set.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<V, E> {
    id: PartitionId,
    vertices: HashMap<VertexId, Vertex<V, E>>,
}

impl<V: Default, E> Partition<V, E> {
    pub fn new(id: PartitionId) -> Self {
        Self { id, vertices: HashMap::new() }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Inserts `vertex`. A vertex with the same id that only exists because edges were added to
    /// it keeps those edges; its value is replaced.
    pub fn add_vertex(&mut self, vertex: Vertex<V, E>) {
        match self.vertices.get_mut(&vertex.id()) {
            Some(existing) => {
                let (_, value, edges) = vertex.into_parts();
                existing.set_value(value);
                for edge in edges {
                    existing.add_edge(edge);
                }
            }
            None => {
                self.vertices.insert(vertex.id(), vertex);
            }
        }
    }

    /// Adds an edge to `source`, creating the vertex with a default value if it does not exist.
    pub fn add_edge(&mut self, source: VertexId, edge: Edge<E>) {
        self.get_or_create(source).add_edge(edge);
    }

    pub fn get_or_create(&mut self, vertex_id: VertexId) -> &mut Vertex<V, E> {
        self.vertices
            .entry(vertex_id)
            .or_insert_with(|| Vertex::new(vertex_id, V::default(), Vec::new()))
    }

    pub fn remove_vertex(&mut self, vertex_id: VertexId) -> Option<Vertex<V, E>> {
        self.vertices.remove(&vertex_id)
    }

    pub fn get(&self, vertex_id: VertexId) -> Option<&Vertex<V, E>> {
        self.vertices.get(&vertex_id)
    }

    pub fn get_mut(&mut self, vertex_id: VertexId) -> Option<&mut Vertex<V, E>> {
        self.vertices.get_mut(&vertex_id)
    }

    pub fn contains(&self, vertex_id: VertexId) -> bool {
        self.vertices.contains_key(&vertex_id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex<V, E>> {
        self.vertices.values()
    }

    pub fn vertices_mut(&mut self) -> impl Iterator<Item = &mut Vertex<V, E>> {
        self.vertices.values_mut()
    }

    pub fn into_vertices(self) -> impl Iterator<Item = Vertex<V, E>> {
        self.vertices.into_iter().map(|(_, vertex)| vertex)
    }

    pub fn vertex_count(&self) -> u64 {
        self.vertices.len() as u64
    }

    pub fn edge_count(&self) -> u64 {
        self.vertices.values().map(|vertex| vertex.edge_count() as u64).sum()
    }

    pub fn all_halted(&self) -> bool {
        self.vertices.values().all(Vertex::is_halted)
    }
}

/// The partitions one worker currently owns.
#[derive(Debug)]
pub struct PartitionStore<V, E> {
    partitions: HashMap<PartitionId, Partition<V, E>>,
}

impl<V, E> Default for PartitionStore<V, E> {
    fn default() -> Self {
        Self { partitions: HashMap::new() }
    }
}

impl<V: Default, E> PartitionStore<V, E> {
    pub fn get_or_create(&mut self, partition_id: PartitionId) -> &mut Partition<V, E> {
        self.partitions.entry(partition_id).or_insert_with(|| Partition::new(partition_id))
    }

    pub fn insert(&mut self, partition: Partition<V, E>) {
        self.partitions.insert(partition.id(), partition);
    }

    pub fn remove(&mut self, partition_id: PartitionId) -> Option<Partition<V, E>> {
        self.partitions.remove(&partition_id)
    }

    pub fn get(&self, partition_id: PartitionId) -> Option<&Partition<V, E>> {
        self.partitions.get(&partition_id)
    }

    pub fn get_mut(&mut self, partition_id: PartitionId) -> Option<&mut Partition<V, E>> {
        self.partitions.get_mut(&partition_id)
    }

    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<_> = self.partitions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition<V, E>> {
        self.partitions.values()
    }

    pub fn partitions_mut(&mut self) -> impl Iterator<Item = &mut Partition<V, E>> {
        self.partitions.values_mut()
    }

    pub fn take_all(&mut self) -> Vec<Partition<V, E>> {
        self.partitions.drain().map(|(_, partition)| partition).collect()
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }

    pub fn vertex_count(&self) -> u64 {
        self.partitions.values().map(Partition::vertex_count).sum()
    }

    pub fn edge_count(&self) -> u64 {
        self.partitions.values().map(Partition::edge_count).sum()
    }

    pub fn all_halted(&self) -> bool {
        self.partitions.values().all(Partition::all_halted)
    }

    pub fn partition_sizes(&self) -> Vec<(PartitionId, u64)> {
        self.partitions.values().map(|p| (p.id(), p.vertex_count())).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::partition::{HashPartitioner, Partition, PartitionStore};
    use gb_api::{Edge, Vertex};
    use hashbrown::HashMap;

    #[test]
    fn partitioning_is_stable_and_spread() {
        let partitioner = HashPartitioner::new(8);
        let mut counts = HashMap::new();
        for vertex_id in 0..8_000 {
            let partition_id = partitioner.partition(vertex_id);
            assert!(partition_id < 8);
            assert_eq!(partition_id, HashPartitioner::new(8).partition(vertex_id));
            *counts.entry(partition_id).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 8);
        assert!(counts.values().all(|&count| count > 500));
    }

    #[test]
    fn edges_create_missing_sources() {
        let mut partition: Partition<f64, u32> = Partition::new(0);
        partition.add_edge(5, Edge::new(6, 1));
        partition.add_edge(5, Edge::new(7, 2));
        assert_eq!(partition.vertex_count(), 1);
        assert_eq!(partition.edge_count(), 2);
        assert!((partition.get(5).expect("vertex missing").value() - 0.0).abs() < f64::EPSILON);

        // A loaded vertex keeps the edges that arrived first.
        partition.add_vertex(Vertex::new(5, 2.5, vec![Edge::new(8, 3)]));
        let vertex = partition.get(5).expect("vertex missing");
        assert!((vertex.value() - 2.5).abs() < f64::EPSILON);
        assert_eq!(vertex.edge_count(), 3);
    }

    #[test]
    fn store_totals() {
        let mut store: PartitionStore<u64, ()> = PartitionStore::default();
        store.get_or_create(1).add_vertex(Vertex::new(1, 0, vec![Edge::new(2, ())]));
        store.get_or_create(3).add_vertex(Vertex::new(2, 0, Vec::new()));
        assert_eq!(store.partition_ids(), vec![1, 3]);
        assert_eq!(store.vertex_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert!(!store.all_halted());
        store.partitions_mut().flat_map(|p| p.vertices_mut()).for_each(|v| v.vote_to_halt());
        assert!(store.all_halted());
    }
}
