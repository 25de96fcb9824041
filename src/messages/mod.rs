//! Holds the messages of one superstep, keyed by partition and destination vertex.

use crate::error::{deserialize_error, serialize_error, GBError};
use crate::partition::HashPartitioner;
use gb_api::{GraphValue, MessageCombiner, PartitionId, VertexId};
use hashbrown::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

pub mod transport;
pub mod wire;

/// Messages for the vertices of one partition. With a combiner every list holds one message.
pub type PartitionMessages<M> = HashMap<VertexId, Vec<M>>;

/// Per-partition message maps, each behind its own lock so that threads delivering to different
/// partitions never contend.
pub struct MessageStore<M> {
    partitioner: HashPartitioner,
    combiner: Option<Arc<dyn MessageCombiner<M>>>,
    partitions: RwLock<HashMap<PartitionId, Mutex<PartitionMessages<M>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: GraphValue> MessageStore<M> {
    pub fn new(
        partitioner: HashPartitioner,
        combiner: Option<Arc<dyn MessageCombiner<M>>>,
    ) -> Self {
        Self { partitioner, combiner, partitions: RwLock::new(HashMap::new()) }
    }

    /// An empty store with the same partitioner and combiner.
    pub fn empty_like(&self) -> Self {
        Self::new(self.partitioner, self.combiner.clone())
    }

    pub fn has_combiner(&self) -> bool {
        self.combiner.is_some()
    }

    /// Inserts a batch of messages for vertices of `partition_id`. Safe to call concurrently;
    /// with a combiner the result does not depend on the order of the calls.
    pub fn add_messages(
        &self,
        partition_id: PartitionId,
        batch: impl IntoIterator<Item = (VertexId, M)>,
    ) {
        {
            let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(messages) = partitions.get(&partition_id) {
                self.insert_all(&mut lock(messages), batch);
                return;
            }
        }
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let messages =
            partitions.entry(partition_id).or_insert_with(|| Mutex::new(HashMap::new()));
        self.insert_all(&mut lock(messages), batch);
    }

    pub fn add_message(&self, vertex_id: VertexId, message: M) {
        let partition_id = self.partitioner.partition(vertex_id);
        self.add_messages(partition_id, std::iter::once((vertex_id, message)));
    }

    fn insert_all(
        &self,
        messages: &mut PartitionMessages<M>,
        batch: impl IntoIterator<Item = (VertexId, M)>,
    ) {
        match &self.combiner {
            Some(combiner) => {
                for (vertex_id, message) in batch {
                    let slot = messages.entry(vertex_id).or_insert_with(Vec::new);
                    let existing = slot.pop().unwrap_or_else(|| combiner.identity());
                    slot.push(combiner.combine(vertex_id, existing, message));
                }
            }
            None => {
                for (vertex_id, message) in batch {
                    messages.entry(vertex_id).or_insert_with(Vec::new).push(message);
                }
            }
        }
    }

    /// All messages for `vertex_id` in insertion order, or the single combined message.
    pub fn get_messages(&self, vertex_id: VertexId) -> Vec<M> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .get(&self.partitioner.partition(vertex_id))
            .and_then(|messages| lock(messages).get(&vertex_id).cloned())
            .unwrap_or_default()
    }

    pub fn has_messages(&self, vertex_id: VertexId) -> bool {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .get(&self.partitioner.partition(vertex_id))
            .map_or(false, |messages| lock(messages).contains_key(&vertex_id))
    }

    /// Removes and returns everything stored for `partition_id`.
    pub fn take_partition(&self, partition_id: PartitionId) -> PartitionMessages<M> {
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        partitions
            .remove(&partition_id)
            .map(|messages| messages.into_inner().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or_default()
    }

    pub fn destination_vertices(&self, partition_id: PartitionId) -> Vec<VertexId> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .get(&partition_id)
            .map(|messages| lock(messages).keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = partitions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear_vertex(&self, vertex_id: VertexId) {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(messages) = partitions.get(&self.partitioner.partition(vertex_id)) {
            lock(messages).remove(&vertex_id);
        }
    }

    pub fn clear_partition(&self, partition_id: PartitionId) {
        self.partitions.write().unwrap_or_else(PoisonError::into_inner).remove(&partition_id);
    }

    pub fn clear_all(&self) {
        self.partitions.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of stored messages, counting a combined message once.
    pub fn message_count(&self) -> u64 {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        partitions
            .values()
            .map(|messages| lock(messages).values().map(|list| list.len() as u64).sum::<u64>())
            .sum()
    }

    /// Writes the number of destination vertices of `partition_id`, then every vertex id with
    /// its messages.
    pub fn write_partition(
        &self,
        writer: &mut impl Write,
        partition_id: PartitionId,
    ) -> Result<(), GBError> {
        let name = format!("messages of partition {}", partition_id);
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let empty = HashMap::new();
        let guard = partitions.get(&partition_id).map(lock);
        let messages = guard.as_deref().unwrap_or(&empty);
        bincode::serialize_into(&mut *writer, &(messages.len() as u64))
            .map_err(|e| serialize_error(&name, e))?;
        for (vertex_id, list) in messages {
            bincode::serialize_into(&mut *writer, &(vertex_id, list))
                .map_err(|e| serialize_error(&name, e))?;
        }
        Ok(())
    }

    /// Reads what `write_partition` wrote and adds it to the messages of `partition_id`.
    pub fn read_partition(
        &self,
        reader: &mut impl Read,
        partition_id: PartitionId,
    ) -> Result<(), GBError> {
        let name = format!("messages of partition {}", partition_id);
        let size: u64 =
            bincode::deserialize_from(&mut *reader).map_err(|e| deserialize_error(&name, e))?;
        let mut read = HashMap::with_capacity(size as usize);
        for _ in 0..size {
            let (vertex_id, list): (VertexId, Vec<M>) =
                bincode::deserialize_from(&mut *reader).map_err(|e| deserialize_error(&name, e))?;
            read.insert(vertex_id, list);
        }
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let messages =
            partitions.entry(partition_id).or_insert_with(|| Mutex::new(HashMap::new()));
        self.insert_all(
            &mut lock(messages),
            read.into_iter()
                .flat_map(|(vertex_id, list)| list.into_iter().map(move |m| (vertex_id, m))),
        );
        Ok(())
    }
}
