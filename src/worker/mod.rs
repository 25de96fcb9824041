//! A worker process: owns some partitions and executes the master's commands on them.

use crate::aggregators::{AggregatorSpec, AggregatorUsage, AggregatorValues};
use crate::checkpoint::{read_partition_checkpoint, write_partition_checkpoint};
use crate::config::JobConfig;
use crate::coordination::CoordinationClient;
use crate::error::GBError;
use crate::input::loader::{InputSplitLoader, LoadSink};
use crate::input::InputSplit;
use crate::job::{EdgeValue, Job, Message, VertexValue};
use crate::messages::transport::Endpoint;
use crate::messages::wire::{Mutations, Payload};
use crate::messages::MessageStore;
use crate::partition::serde::{partition_from_bytes, partition_to_bytes};
use crate::partition::{HashPartitioner, Partition, PartitionOwners, PartitionStore};
use crate::util::memory_usage::print_memory_usage;
use crate::util::timer::GbTimer;
use crate::worker::compute::{route_mutations, SuperstepInfo, WorkerComputeContext};
use crate::worker::exchange::Exchange;
use crate::worker::protocol::{
    ack_key, alive_key, sent_key, Command, CommandKind, LoadReport, WorkerAck, WorkerReport,
    COMMAND_KEY, COMMAND_PREFIX,
};
use crossbeam_utils::thread;
use gb_api::{Edge, GraphValue, Superstep, Vertex, VertexComputation, VertexId, WorkerId};
use hashbrown::HashMap;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

pub mod compute;
pub mod exchange;
pub mod protocol;

type Partitions<C> = PartitionStore<VertexValue<C>, EdgeValue<C>>;

pub struct Worker<'a, C: VertexComputation> {
    worker_id: WorkerId,
    job: &'a Job<C>,
    config: &'a JobConfig,
    client: CoordinationClient,
    exchange: Exchange<VertexValue<C>, EdgeValue<C>, Message<C>>,
    aggregator_specs: Arc<HashMap<String, AggregatorSpec>>,
    partitions: Partitions<C>,
    // Messages read by the running superstep.
    current: MessageStore<Message<C>>,
    // Messages sent during the running superstep, read by the next one.
    incoming: MessageStore<Message<C>>,
}

impl<'a, C: VertexComputation> Worker<'a, C> {
    pub fn new(
        job: &'a Job<C>,
        config: &'a JobConfig,
        client: CoordinationClient,
        endpoint: Endpoint,
    ) -> Self {
        let worker_id = endpoint.worker_id();
        let current = MessageStore::new(
            HashPartitioner::with_partitions(config.partition_count()),
            job.combiner(),
        );
        let incoming = current.empty_like();
        Self {
            worker_id,
            job,
            config,
            exchange: Exchange::new(endpoint, client.clone(), config.workers, config.poll_interval),
            client,
            aggregator_specs: AggregatorUsage::specs_by_name(job.aggregators()),
            partitions: PartitionStore::default(),
            current,
            incoming,
        }
    }

    /// Executes commands until the master shuts the job down or drops this worker.
    pub fn run(mut self) -> Result<(), GBError> {
        let session = self.client.open_session()?;
        self.client.create(&alive_key(self.worker_id), &[], Some(session.id()))?;
        info!("Worker {} registered", self.worker_id);

        let mut handled = 0;
        loop {
            let command = self.next_command(handled)?;
            handled = command.sequence;
            if !command.workers.contains(&self.worker_id) {
                info!("Worker {} is no longer part of the job", self.worker_id);
                return Ok(());
            }
            if let CommandKind::Shutdown = command.kind {
                info!("Worker {} shutting down", self.worker_id);
                return Ok(());
            }

            let timer = GbTimer::now();
            let ack = match self.handle(&command) {
                Ok(Some(ack)) => ack,
                Ok(None) => {
                    info!(
                        "Worker {} abandoned {} command {}",
                        self.worker_id,
                        command.kind.name(),
                        command.sequence
                    );
                    continue;
                }
                // Peers that disappear are the master's business.
                Err(e @ GBError::Transport(_)) => {
                    warn!(
                        "Worker {} abandoned command {}: {}",
                        self.worker_id, command.sequence, e
                    );
                    continue;
                }
                Err(e) => {
                    error!(
                        "Worker {} failed to {}: {}",
                        self.worker_id,
                        command.kind.name(),
                        e
                    );
                    WorkerAck::failed(&e)
                }
            };
            debug!(
                "Worker {} finished {} command {} in {}",
                self.worker_id,
                command.kind.name(),
                command.sequence,
                timer.elapsed().to_millis_string()
            );
            self.client.put_object(&ack_key(command.sequence, self.worker_id), &ack)?;
        }
    }

    fn next_command(&self, handled: u64) -> Result<Command, GBError> {
        loop {
            let revision = self.client.revision()?;
            if let Some((command, _)) = self.client.get_object::<Command>(COMMAND_KEY)? {
                if command.sequence > handled {
                    return Ok(command);
                }
            }
            self.client.watch(COMMAND_PREFIX, revision, self.config.poll_interval)?;
        }
    }

    /// Executes one command. `None` means the command was abandoned for a newer one.
    fn handle(&mut self, command: &Command) -> Result<Option<WorkerAck>, GBError> {
        match &command.kind {
            CommandKind::Load { vertex_splits, edge_splits } => {
                self.load(command, vertex_splits, edge_splits)
            }
            CommandKind::Migrate => self.migrate(command),
            CommandKind::Checkpoint { superstep, aggregates } => {
                self.checkpoint(command, *superstep, aggregates).map(Some)
            }
            CommandKind::Compute { superstep, aggregates, total_vertices, total_edges } => {
                let info = SuperstepInfo {
                    sequence: command.sequence,
                    superstep: *superstep,
                    total_vertices: *total_vertices,
                    total_edges: *total_edges,
                    aggregates,
                    owners: &command.owners,
                };
                self.compute(command, info)
            }
            CommandKind::Restore { superstep } => self.restore(command, *superstep).map(Some),
            CommandKind::Output => self.output().map(Some),
            CommandKind::Shutdown => Ok(None),
        }
    }

    fn mark_sent(&self, command: &Command) -> Result<(), GBError> {
        self.client.put_object(&sent_key(command.sequence, self.worker_id), &())?;
        Ok(())
    }

    /// Makes sure every owned partition exists, also the empty ones.
    fn create_owned_partitions(&mut self, owners: &PartitionOwners) {
        for partition_id in owners.partitions_of(self.worker_id) {
            self.partitions.get_or_create(partition_id);
        }
    }

    fn load(
        &mut self,
        command: &Command,
        vertex_splits: &[InputSplit],
        edge_splits: &[InputSplit],
    ) -> Result<Option<WorkerAck>, GBError> {
        self.exchange.begin();
        self.partitions.clear();
        self.current.clear_all();
        self.incoming.clear_all();

        let router = LoadRouter {
            worker_id: self.worker_id,
            sequence: command.sequence,
            owners: &command.owners,
            exchange: &self.exchange,
            local: Mutex::new(PartitionStore::default()),
        };
        let loader =
            InputSplitLoader::new(self.worker_id, &self.client, self.config, self.job.inputs());
        let totals = loader.load(vertex_splits, edge_splits, &router)?;
        self.partitions = router.local.into_inner().unwrap_or_else(PoisonError::into_inner);

        self.mark_sent(command)?;
        self.exchange.finish(command)?;
        let partitioner = command.owners.partitioner();
        let partitions = &mut self.partitions;
        let completed = self.exchange.drain(command, |payload| match payload {
            Payload::Vertices(vertices) => {
                for vertex in vertices {
                    partitions.get_or_create(partitioner.partition(vertex.id())).add_vertex(vertex);
                }
                Ok(())
            }
            Payload::Edges(edges) => {
                for (source, edge) in edges {
                    partitions.get_or_create(partitioner.partition(source)).add_edge(source, edge);
                }
                Ok(())
            }
            other => Err(unexpected_payload("load", &other)),
        })?;
        if !completed {
            return Ok(None);
        }
        self.create_owned_partitions(&command.owners);

        let (vertex_count, edge_count) =
            (self.partitions.vertex_count(), self.partitions.edge_count());
        info!(
            "Worker {} holds {} vertices and {} edges in {} partitions",
            self.worker_id,
            vertex_count,
            edge_count,
            self.partitions.partition_ids().len()
        );
        print_memory_usage(format_args!("worker {} after load", self.worker_id));
        let report =
            LoadReport::new(self.partitions.partition_sizes(), vertex_count, edge_count, totals);
        Ok(Some(WorkerAck::Loaded(report)))
    }

    fn migrate(&mut self, command: &Command) -> Result<Option<WorkerAck>, GBError> {
        self.exchange.begin();
        for partition_id in self.partitions.partition_ids() {
            let owner = command.owners.owner(partition_id);
            if owner == self.worker_id {
                continue;
            }
            if let Some(partition) = self.partitions.remove(partition_id) {
                let bytes = partition_to_bytes(&partition)?;
                self.exchange.send(
                    command.sequence,
                    owner,
                    Payload::Partition(partition_id, bytes),
                )?;
                let messages: Vec<_> = self
                    .incoming
                    .take_partition(partition_id)
                    .into_iter()
                    .flat_map(|(vertex_id, list)| list.into_iter().map(move |m| (vertex_id, m)))
                    .collect();
                if !messages.is_empty() {
                    self.exchange.send(command.sequence, owner, Payload::Messages(messages))?;
                }
                info!(
                    "Worker {} moved partition {} ({} vertices) to worker {}",
                    self.worker_id,
                    partition_id,
                    partition.vertex_count(),
                    owner
                );
            }
        }

        self.mark_sent(command)?;
        self.exchange.finish(command)?;
        let (partitions, incoming) = (&mut self.partitions, &self.incoming);
        let completed = self.exchange.drain(command, |payload| match payload {
            Payload::Partition(_, bytes) => {
                partitions.insert(partition_from_bytes(&bytes)?);
                Ok(())
            }
            Payload::Messages(messages) => {
                deliver(incoming, messages);
                Ok(())
            }
            other => Err(unexpected_payload("migrate", &other)),
        })?;
        if !completed {
            return Ok(None);
        }
        self.create_owned_partitions(&command.owners);
        Ok(Some(WorkerAck::Migrated))
    }

    fn checkpoint_dir(&self) -> Result<&'a Path, GBError> {
        let config: &'a JobConfig = self.config;
        config
            .checkpoint_dir
            .as_deref()
            .ok_or_else(|| GBError::Checkpoint("No checkpoint directory configured".to_owned()))
    }

    fn checkpoint(
        &mut self,
        command: &Command,
        superstep: Superstep,
        aggregates: &AggregatorValues,
    ) -> Result<WorkerAck, GBError> {
        let dir = self.checkpoint_dir()?;
        let timer = GbTimer::now();
        let partition_ids = command.owners.partitions_of(self.worker_id);
        for &partition_id in &partition_ids {
            let partition = self.partitions.get_or_create(partition_id);
            write_partition_checkpoint(dir, superstep, partition, &self.incoming, aggregates)?;
        }
        info!(
            "Worker {} wrote {} partitions for the checkpoint of superstep {} in {}",
            self.worker_id,
            partition_ids.len(),
            superstep,
            timer.elapsed().to_millis_string()
        );
        Ok(WorkerAck::Checkpointed)
    }

    fn restore(&mut self, command: &Command, superstep: Superstep) -> Result<WorkerAck, GBError> {
        let dir = self.checkpoint_dir()?;
        let timer = GbTimer::now();
        self.partitions.clear();
        self.current.clear_all();
        self.incoming.clear_all();
        for partition_id in command.owners.partitions_of(self.worker_id) {
            let (partition, _) =
                read_partition_checkpoint(dir, superstep, partition_id, &self.incoming)?;
            self.partitions.insert(partition);
        }
        info!(
            "Worker {} restored {} vertices from the checkpoint of superstep {} in {}",
            self.worker_id,
            self.partitions.vertex_count(),
            superstep,
            timer.elapsed().to_millis_string()
        );
        Ok(WorkerAck::Restored)
    }

    fn compute(
        &mut self,
        command: &Command,
        info: SuperstepInfo,
    ) -> Result<Option<WorkerAck>, GBError> {
        let timer = GbTimer::now();
        self.exchange.begin();
        std::mem::swap(&mut self.current, &mut self.incoming);
        self.incoming.clear_all();

        // Messages sent to vertices that do not exist create them.
        for partition_id in self.current.partition_ids() {
            let partition = self.partitions.get_or_create(partition_id);
            for vertex_id in self.current.destination_vertices(partition_id) {
                partition.get_or_create(vertex_id);
            }
        }

        let outcomes = self.compute_partitions(info);
        let mut usage = AggregatorUsage::new(Arc::clone(&self.aggregator_specs));
        let mut messages_sent = 0;
        let mut mutations = Mutations::default();
        for outcome in outcomes {
            let outcome = outcome?;
            messages_sent += outcome.messages_sent;
            usage.merge_from(outcome.usage);
            mutations.extend(outcome.mutations);
        }
        self.current.clear_all();

        let mut routed = route_mutations(mutations, &command.owners);
        let mut received = routed.remove(&self.worker_id).unwrap_or_default();
        for (owner, mutations) in routed {
            self.exchange.send(command.sequence, owner, Payload::Mutations(mutations))?;
        }
        self.mark_sent(command)?;
        self.exchange.finish(command)?;
        let incoming = &self.incoming;
        let completed = self.exchange.drain(command, |payload| match payload {
            Payload::Messages(messages) => {
                deliver(incoming, messages);
                Ok(())
            }
            Payload::Mutations(mutations) => {
                received.extend(mutations);
                Ok(())
            }
            other => Err(unexpected_payload("compute", &other)),
        })?;
        if !completed {
            return Ok(None);
        }
        self.apply_mutations(received, command.owners.partitioner());

        let report = WorkerReport::new(
            info.superstep,
            self.partitions.all_halted(),
            messages_sent,
            usage.into_partials()?,
            self.partitions.vertex_count(),
            self.partitions.edge_count(),
        );
        debug!(
            "Worker {} computed superstep {} in {}: {} messages sent, halted: {}",
            self.worker_id,
            info.superstep,
            timer.elapsed().to_millis_string(),
            report.messages_sent,
            report.all_halted
        );
        Ok(Some(WorkerAck::Computed(report)))
    }

    /// Runs the vertex computation over all owned partitions on `compute_threads` threads, each
    /// thread on its own disjoint set of partitions.
    fn compute_partitions(
        &mut self,
        info: SuperstepInfo,
    ) -> Vec<Result<compute::ComputeOutcome<EdgeValue<C>>, GBError>> {
        let threads = self.config.compute_threads;
        let mut groups: Vec<Vec<&mut Partition<VertexValue<C>, EdgeValue<C>>>> =
            (0..threads).map(|_| Vec::new()).collect();
        for (index, partition) in self.partitions.partitions_mut().enumerate() {
            groups[index % threads].push(partition);
        }
        let (current, incoming, exchange) = (&self.current, &self.incoming, &self.exchange);
        let computation = self.job.computation();
        let (specs, batch_size) = (&self.aggregator_specs, self.config.message_batch_size);
        let worker_id = self.worker_id;

        thread::scope(|s| {
            let handles: Vec<_> = groups
                .into_iter()
                .enumerate()
                .filter(|(_, group)| !group.is_empty())
                .map(|(thread_index, group)| {
                    s.builder()
                        .name(format!("worker-{}-compute-{}", worker_id, thread_index))
                        .spawn(move |_| {
                            let usage = AggregatorUsage::new(Arc::clone(specs));
                            let mut context = WorkerComputeContext::new(
                                info, exchange, incoming, usage, batch_size,
                            );
                            for partition in group {
                                let mut messages = current.take_partition(partition.id());
                                for vertex in partition.vertices_mut() {
                                    let vertex_messages =
                                        messages.remove(&vertex.id()).unwrap_or_default();
                                    if !vertex_messages.is_empty() {
                                        vertex.wake_up();
                                    }
                                    if !vertex.is_halted() {
                                        computation.compute(vertex, &vertex_messages, &mut context);
                                    }
                                }
                            }
                            context.finish()
                        })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    let handle = handle.map_err(|e| {
                        GBError::Generic(format!("Could not start compute thread: {}", e))
                    })?;
                    handle.join().expect("Error joining compute thread")
                })
                .collect()
        })
        .expect("Error ending compute scope")
    }

    /// Applies edge removals, then edge additions, then vertex removals.
    fn apply_mutations(
        &mut self,
        mutations: Mutations<EdgeValue<C>>,
        partitioner: HashPartitioner,
    ) {
        if mutations.is_empty() {
            return;
        }
        for (source, target) in mutations.edge_removals {
            let partition = self.partitions.get_mut(partitioner.partition(source));
            if let Some(vertex) = partition.and_then(|partition| partition.get_mut(source)) {
                vertex.remove_edges(target);
            }
        }
        for (source, edge) in mutations.edge_additions {
            self.partitions.get_or_create(partitioner.partition(source)).add_edge(source, edge);
        }
        for vertex_id in mutations.vertex_removals {
            if let Some(partition) = self.partitions.get_mut(partitioner.partition(vertex_id)) {
                partition.remove_vertex(vertex_id);
            }
        }
    }

    fn output(&self) -> Result<WorkerAck, GBError> {
        if let Some(output) = self.job.output() {
            let vertices: Vec<_> =
                self.partitions.partitions().flat_map(|p| p.vertices().cloned()).collect();
            output.write_vertices(self.worker_id, vertices)?;
        }
        Ok(WorkerAck::Written)
    }
}

fn deliver<M: GraphValue>(store: &MessageStore<M>, messages: Vec<(VertexId, M)>) {
    for (vertex_id, message) in messages {
        store.add_message(vertex_id, message);
    }
}

fn unexpected_payload<V, E, M>(phase: &str, payload: &Payload<V, E, M>) -> GBError {
    let kind = match payload {
        Payload::Messages(_) => "messages",
        Payload::Vertices(_) => "vertices",
        Payload::Edges(_) => "edges",
        Payload::Mutations(_) => "mutations",
        Payload::Partition(..) => "a partition",
        Payload::End { .. } => "an end marker",
    };
    GBError::Transport(format!("Received {} during {}", kind, phase))
}

/// Sends every loaded record to the worker that owns it and keeps the local ones.
struct LoadRouter<'a, V, E, M> {
    worker_id: WorkerId,
    sequence: u64,
    owners: &'a PartitionOwners,
    exchange: &'a Exchange<V, E, M>,
    local: Mutex<PartitionStore<V, E>>,
}

impl<'a, V, E, M> LoadSink<V, E> for LoadRouter<'a, V, E, M>
where
    V: GraphValue + Default,
    E: GraphValue,
    M: GraphValue,
{
    fn add_vertices(&self, vertices: Vec<Vertex<V, E>>) -> Result<(), GBError> {
        let partitioner = self.owners.partitioner();
        let mut remote: HashMap<WorkerId, Vec<Vertex<V, E>>> = HashMap::new();
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        for vertex in vertices {
            let partition_id = partitioner.partition(vertex.id());
            let owner = self.owners.owner(partition_id);
            if owner == self.worker_id {
                local.get_or_create(partition_id).add_vertex(vertex);
            } else {
                remote.entry(owner).or_default().push(vertex);
            }
        }
        drop(local);
        for (owner, batch) in remote {
            self.exchange.send(self.sequence, owner, Payload::Vertices(batch))?;
        }
        Ok(())
    }

    fn add_edges(&self, edges: Vec<(VertexId, Edge<E>)>) -> Result<(), GBError> {
        let partitioner = self.owners.partitioner();
        let mut remote: HashMap<WorkerId, Vec<(VertexId, Edge<E>)>> = HashMap::new();
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        for (source, edge) in edges {
            let partition_id = partitioner.partition(source);
            let owner = self.owners.owner(partition_id);
            if owner == self.worker_id {
                local.get_or_create(partition_id).add_edge(source, edge);
            } else {
                remote.entry(owner).or_default().push((source, edge));
            }
        }
        drop(local);
        for (owner, batch) in remote {
            self.exchange.send(self.sequence, owner, Payload::Edges(batch))?;
        }
        Ok(())
    }
}
