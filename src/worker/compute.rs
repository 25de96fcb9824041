use crate::aggregators::{AggregatorUsage, AggregatorValues};
use crate::error::GBError;
use crate::messages::wire::{Mutations, Payload};
use crate::messages::MessageStore;
use crate::partition::{HashPartitioner, PartitionOwners};
use crate::worker::exchange::Exchange;
use gb_api::{
    AggregateValue, ComputeContext, Edge, GraphValue, PartitionId, Superstep, VertexId, WorkerId,
};
use hashbrown::HashMap;

/// What every compute thread of a worker shares during one superstep.
#[derive(Clone, Copy)]
pub struct SuperstepInfo<'a> {
    pub sequence: u64,
    pub superstep: Superstep,
    pub total_vertices: u64,
    pub total_edges: u64,
    pub aggregates: &'a AggregatorValues,
    pub owners: &'a PartitionOwners,
}

/// What one compute thread produced besides messages.
pub struct ComputeOutcome<E> {
    pub messages_sent: u64,
    pub usage: AggregatorUsage,
    pub mutations: Mutations<E>,
}

/// The `ComputeContext` of one compute thread.
///
/// Messages are buffered per destination and flushed in batches: batches for partitions of this
/// worker go straight into the store of the next superstep, the others go over the network.
pub struct WorkerComputeContext<'a, V, E, M> {
    worker_id: WorkerId,
    info: SuperstepInfo<'a>,
    partitioner: HashPartitioner,
    exchange: &'a Exchange<V, E, M>,
    incoming: &'a MessageStore<M>,
    batch_size: usize,
    usage: AggregatorUsage,
    local: HashMap<PartitionId, Vec<(VertexId, M)>>,
    remote: HashMap<WorkerId, Vec<(VertexId, M)>>,
    mutations: Mutations<E>,
    messages_sent: u64,
    // The first failed send; compute cannot return errors.
    error: Option<GBError>,
}

impl<'a, V: GraphValue, E: GraphValue, M: GraphValue> WorkerComputeContext<'a, V, E, M> {
    pub fn new(
        info: SuperstepInfo<'a>,
        exchange: &'a Exchange<V, E, M>,
        incoming: &'a MessageStore<M>,
        usage: AggregatorUsage,
        batch_size: usize,
    ) -> Self {
        Self {
            worker_id: exchange.worker_id(),
            info,
            partitioner: info.owners.partitioner(),
            exchange,
            incoming,
            batch_size,
            usage,
            local: HashMap::new(),
            remote: HashMap::new(),
            mutations: Mutations::default(),
            messages_sent: 0,
            error: None,
        }
    }

    fn send_remote(&mut self, owner: WorkerId, batch: Vec<(VertexId, M)>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.exchange.send(self.info.sequence, owner, Payload::Messages(batch)) {
            self.error = Some(e);
        }
    }

    /// Flushes all buffered messages.
    pub fn finish(mut self) -> Result<ComputeOutcome<E>, GBError> {
        for (partition_id, batch) in self.local.drain() {
            self.incoming.add_messages(partition_id, batch);
        }
        for (owner, batch) in std::mem::take(&mut self.remote) {
            if !batch.is_empty() {
                self.send_remote(owner, batch);
            }
        }
        match self.error {
            Some(e) => Err(e),
            None => Ok(ComputeOutcome {
                messages_sent: self.messages_sent,
                usage: self.usage,
                mutations: self.mutations,
            }),
        }
    }
}

impl<'a, V, E, M> ComputeContext<M, E> for WorkerComputeContext<'a, V, E, M>
where
    V: GraphValue,
    E: GraphValue,
    M: GraphValue,
{
    fn superstep(&self) -> Superstep {
        self.info.superstep
    }

    fn total_vertices(&self) -> u64 {
        self.info.total_vertices
    }

    fn total_edges(&self) -> u64 {
        self.info.total_edges
    }

    fn send_message(&mut self, target: VertexId, message: M) {
        self.messages_sent += 1;
        let partition_id = self.partitioner.partition(target);
        let owner = self.info.owners.owner(partition_id);
        if owner == self.worker_id {
            let batch = self.local.entry(partition_id).or_default();
            batch.push((target, message));
            if batch.len() >= self.batch_size {
                self.incoming.add_messages(partition_id, std::mem::take(batch));
            }
        } else {
            let batch = self.remote.entry(owner).or_default();
            batch.push((target, message));
            if batch.len() >= self.batch_size {
                let batch = std::mem::take(batch);
                self.send_remote(owner, batch);
            }
        }
    }

    fn aggregate(&mut self, name: &str, value: AggregateValue) {
        self.usage.aggregate(name, &value);
    }

    fn aggregated_value(&self, name: &str) -> Option<&AggregateValue> {
        self.info.aggregates.get(name)
    }

    fn add_edge(&mut self, source: VertexId, edge: Edge<E>) {
        self.mutations.edge_additions.push((source, edge));
    }

    fn remove_edges(&mut self, source: VertexId, target: VertexId) {
        self.mutations.edge_removals.push((source, target));
    }

    fn remove_vertex(&mut self, vertex_id: VertexId) {
        self.mutations.vertex_removals.push(vertex_id);
    }
}

/// Splits `mutations` by the worker that owns the affected vertex.
pub fn route_mutations<E>(
    mutations: Mutations<E>,
    owners: &PartitionOwners,
) -> HashMap<WorkerId, Mutations<E>> {
    let mut routed: HashMap<WorkerId, Mutations<E>> = HashMap::new();
    for (source, target) in mutations.edge_removals {
        let owner = owners.owner_of_vertex(source);
        routed.entry(owner).or_default().edge_removals.push((source, target));
    }
    for (source, edge) in mutations.edge_additions {
        let owner = owners.owner_of_vertex(source);
        routed.entry(owner).or_default().edge_additions.push((source, edge));
    }
    for vertex_id in mutations.vertex_removals {
        let owner = owners.owner_of_vertex(vertex_id);
        routed.entry(owner).or_default().vertex_removals.push(vertex_id);
    }
    routed
}

#[cfg(test)]
mod tests {
    use crate::aggregators::{AggregatorSpec, AggregatorUsage, AggregatorValues};
    use crate::config::JobConfig;
    use crate::coordination::{CoordinationClient, LocalCoordinator};
    use crate::messages::transport::Network;
    use crate::messages::wire::{Mutations, Payload};
    use crate::messages::MessageStore;
    use crate::partition::PartitionOwners;
    use crate::worker::compute::{route_mutations, SuperstepInfo, WorkerComputeContext};
    use crate::worker::exchange::Exchange;
    use gb_api::{AggregateValue, ComputeContext, Edge};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn messages_are_routed_by_owner() {
        let client =
            CoordinationClient::new(Arc::new(LocalCoordinator::default()), &JobConfig::default());
        let mut endpoints = Network::connect(2);
        let remote_endpoint = endpoints.pop().unwrap();
        let exchange: Exchange<u64, (), u64> =
            Exchange::new(endpoints.pop().unwrap(), client, 2, Duration::from_millis(1));
        let owners = PartitionOwners::round_robin(4, &[0, 1]).unwrap();
        let incoming: MessageStore<u64> = MessageStore::new(owners.partitioner(), None);
        let specs = AggregatorUsage::specs_by_name(&[AggregatorSpec::sum_long("count")]);
        let aggregates = AggregatorValues::new();
        let info = SuperstepInfo {
            sequence: 7,
            superstep: 3,
            total_vertices: 100,
            total_edges: 0,
            aggregates: &aggregates,
            owners: &owners,
        };

        let mut context =
            WorkerComputeContext::new(info, &exchange, &incoming, AggregatorUsage::new(specs), 2);
        for target in 0..20 {
            context.send_message(target, target * 10);
        }
        context.aggregate("count", AggregateValue::Long(20));
        assert_eq!(context.superstep(), 3);
        let outcome = context.finish().unwrap();
        assert_eq!(outcome.messages_sent, 20);
        assert_eq!(outcome.usage.into_partials().unwrap()["count"], AggregateValue::Long(20));

        let local: Vec<_> = (0..20).filter(|&v| owners.owner_of_vertex(v) == 0).collect();
        for &vertex_id in &local {
            assert_eq!(incoming.get_messages(vertex_id), vec![vertex_id * 10]);
        }
        let mut remote = Vec::new();
        let timeout = Duration::from_millis(10);
        while let Some(frame) = remote_endpoint.receive::<u64, (), u64>(timeout).unwrap() {
            assert_eq!(frame.sequence, 7);
            if let Payload::Messages(batch) = frame.payload {
                assert!(batch.len() <= 2);
                remote.extend(batch.into_iter().map(|(vertex_id, _)| vertex_id));
            }
        }
        remote.sort_unstable();
        assert_eq!(local.len() + remote.len(), 20);
        assert!(remote.iter().all(|&v| owners.owner_of_vertex(v) == 1));
    }

    #[test]
    fn mutations_go_to_the_owner_of_the_vertex() {
        let owners = PartitionOwners::round_robin(8, &[0, 1, 2]).unwrap();
        let mutations = Mutations {
            edge_removals: vec![(1, 2)],
            edge_additions: (0..30).map(|source| (source, Edge::new(source + 1, ()))).collect(),
            vertex_removals: vec![5, 6],
        };
        let routed = route_mutations(mutations, &owners);
        let additions: usize = routed.values().map(|m| m.edge_additions.len()).sum();
        assert_eq!(additions, 30);
        for (&owner, mutations) in &routed {
            let owned = |vertex_id: u64| owners.owner_of_vertex(vertex_id) == owner;
            assert!(mutations.edge_additions.iter().all(|(source, _)| owned(*source)));
            assert!(mutations.vertex_removals.iter().all(|&vertex_id| owned(vertex_id)));
        }
        assert_eq!(routed[&owners.owner_of_vertex(1)].edge_removals, vec![(1, 2)]);
    }
}
