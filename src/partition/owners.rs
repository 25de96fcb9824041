use crate::error::GBError;
use crate::partition::HashPartitioner;
use gb_api::{PartitionId, VertexId, WorkerId};
use hashbrown::HashMap;
use log::info;

/// The master-held assignment of every partition to the worker that owns it.
///
/// Workers get a fresh copy with every command, so it only ever changes across a barrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOwners {
    // Indexed by partition id.
    owners: Vec<WorkerId>,
}

impl PartitionOwners {
    pub fn round_robin(partition_count: usize, workers: &[WorkerId]) -> Result<Self, GBError> {
        if workers.is_empty() {
            return Err(GBError::Config("Cannot assign partitions without workers".to_owned()));
        }
        let owners = (0..partition_count).map(|pid| workers[pid % workers.len()]).collect();
        Ok(Self { owners })
    }

    pub fn partition_count(&self) -> usize {
        self.owners.len()
    }

    pub fn partitioner(&self) -> HashPartitioner {
        HashPartitioner::with_partitions(self.owners.len())
    }

    pub fn owner(&self, partition_id: PartitionId) -> WorkerId {
        self.owners[partition_id as usize]
    }

    pub fn owner_of_vertex(&self, vertex_id: VertexId) -> WorkerId {
        self.owner(self.partitioner().partition(vertex_id))
    }

    pub fn partitions_of(&self, worker_id: WorkerId) -> Vec<PartitionId> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, &owner)| owner == worker_id)
            .map(|(pid, _)| pid as PartitionId)
            .collect()
    }

    /// Workers that own at least one partition, in ascending order.
    pub fn workers(&self) -> Vec<WorkerId> {
        let mut workers = self.owners.clone();
        workers.sort_unstable();
        workers.dedup();
        workers
    }

    /// Hands the partitions of the `failed` workers to the `survivors`, round robin.
    pub fn reassign_from(
        &mut self,
        failed: &[WorkerId],
        survivors: &[WorkerId],
    ) -> Result<usize, GBError> {
        if survivors.is_empty() {
            return Err(GBError::WorkerFailure("No surviving workers to take over".to_owned()));
        }
        let mut moved = 0;
        for owner in self.owners.iter_mut().filter(|owner| failed.contains(owner)) {
            *owner = survivors[moved % survivors.len()];
            moved += 1;
        }
        info!("Reassigned {} partitions of workers {:?} to {:?}", moved, failed, survivors);
        Ok(moved)
    }

    /// Moves whole partitions from the most to the least loaded worker until every worker holds
    /// at most `1 + tolerance` times the average number of vertices, or no move helps any more.
    /// Returns the `(partition, from, to)` moves.
    pub fn rebalance(
        &mut self,
        sizes: &HashMap<PartitionId, u64>,
        tolerance: f64,
    ) -> Vec<(PartitionId, WorkerId, WorkerId)> {
        let workers = self.workers();
        let mut loads: HashMap<WorkerId, u64> = workers.iter().map(|&w| (w, 0)).collect();
        for (pid, &owner) in self.owners.iter().enumerate() {
            *loads.entry(owner).or_insert(0) += sizes.get(&(pid as PartitionId)).unwrap_or(&0);
        }
        let total: u64 = loads.values().sum();
        let limit = (total as f64 / workers.len().max(1) as f64) * (1.0 + tolerance);

        let mut moves = Vec::new();
        loop {
            let (heaviest, heaviest_load) = match loads.iter().max_by_key(|(&w, &l)| (l, w)) {
                Some((&w, &l)) => (w, l),
                None => break,
            };
            let (lightest, lightest_load) = match loads.iter().min_by_key(|(&w, &l)| (l, w)) {
                Some((&w, &l)) => (w, l),
                None => break,
            };
            if heaviest_load as f64 <= limit || heaviest == lightest {
                break;
            }
            // The partition that leaves the two workers closest to each other.
            let gap = heaviest_load - lightest_load;
            let candidate = self
                .partitions_of(heaviest)
                .into_iter()
                .map(|pid| (pid, *sizes.get(&pid).unwrap_or(&0)))
                .filter(|&(_, size)| size > 0 && size < gap)
                .min_by_key(|&(pid, size)| ((gap as i64 - 2 * size as i64).abs(), pid));
            let (pid, size) = match candidate {
                Some(candidate) => candidate,
                None => break,
            };
            self.owners[pid as usize] = lightest;
            *loads.entry(heaviest).or_insert(0) -= size;
            *loads.entry(lightest).or_insert(0) += size;
            moves.push((pid, heaviest, lightest));
        }
        moves
    }
}
