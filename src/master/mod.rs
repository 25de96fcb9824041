//! The elected master: drives the workers from superstep to superstep through the coordination
//! service, merges their aggregators, decides when the job halts and recovers from lost workers.

use crate::aggregators::AggregatorRegistry;
use crate::checkpoint::{latest_complete, prune, read_metadata, write_metadata, CheckpointMetadata};
use crate::config::JobConfig;
use crate::coordination::CoordinationClient;
use crate::error::GBError;
use crate::input::loader::LoadTotals;
use crate::job::{Job, JobSummary};
use crate::partition::PartitionOwners;
use crate::util::timer::GbTimer;
use crate::worker::protocol::{
    ack_key, ack_prefix, alive_key, sent_key, sent_prefix, Command, CommandKind, FailureKind,
    LoadReport, WorkerAck, WorkerReport, COMMAND_KEY, MASTER_ELECTION,
};
use gb_api::{AggregateValue, MasterContext, PartitionId, Superstep, VertexComputation, WorkerId};
use hashbrown::HashMap;
use log::{debug, info, warn};
use std::path::Path;
use std::time::Instant;

/// Where the master is in the lifetime of the job.
#[derive(Debug, Clone, PartialEq)]
enum MasterState {
    Loading,
    Superstep(Superstep),
    Recovering { failed: Vec<WorkerId>, cause: String },
    Output,
    Halted,
}

/// Why a phase could not complete.
enum Interrupt {
    Fatal(GBError),
    /// The workers stopped reporting; recoverable from a checkpoint.
    WorkersLost { workers: Vec<WorkerId>, cause: String },
}

impl From<GBError> for Interrupt {
    fn from(error: GBError) -> Self {
        Interrupt::Fatal(error)
    }
}

/// Global halt: every worker voted to halt and no message is pending for the next superstep.
pub fn decide_halt(reports: &[WorkerReport]) -> bool {
    reports.iter().all(|report| report.all_halted)
        && reports.iter().map(|report| report.messages_sent).sum::<u64>() == 0
}

pub struct Master<'a, C: VertexComputation> {
    job: &'a Job<C>,
    config: &'a JobConfig,
    client: CoordinationClient,
    registry: AggregatorRegistry,
    owners: PartitionOwners,
    /// Workers that take part in the job, in ascending order.
    workers: Vec<WorkerId>,
    sequence: u64,
    supersteps: Superstep,
    total_vertices: u64,
    total_edges: u64,
    load_totals: LoadTotals,
    recoveries: u32,
    last_checkpoint: Option<Superstep>,
}

impl<'a, C: VertexComputation> Master<'a, C> {
    pub fn new(
        job: &'a Job<C>,
        config: &'a JobConfig,
        client: CoordinationClient,
    ) -> Result<Self, GBError> {
        let workers: Vec<WorkerId> = (0..config.workers as WorkerId).collect();
        Ok(Self {
            job,
            config,
            client,
            registry: AggregatorRegistry::new(job.aggregators())?,
            owners: PartitionOwners::round_robin(config.partition_count(), &workers)?,
            workers,
            sequence: 0,
            supersteps: 0,
            total_vertices: 0,
            total_edges: 0,
            load_totals: LoadTotals::default(),
            recoveries: 0,
            last_checkpoint: None,
        })
    }

    /// Runs the job to completion. Workers are told to shut down whatever the outcome.
    pub fn run(mut self) -> Result<JobSummary, GBError> {
        let session = self.client.open_session()?;
        let elected = self.client.elect_leader(
            MASTER_ELECTION,
            session.id(),
            MASTER_ELECTION,
            self.config.worker_timeout,
        )?;
        if !elected {
            return Err(GBError::Coordination("Another master is running".to_owned()));
        }
        info!("Elected master of {} workers", self.workers.len());

        let result = self.drive();
        if let Err(e) = self.publish(CommandKind::Shutdown) {
            warn!("Could not tell the workers to shut down: {}", e);
        }
        result
    }

    fn drive(&mut self) -> Result<JobSummary, GBError> {
        self.await_registrations()?;
        let mut state = MasterState::Loading;
        loop {
            debug!("Master state: {:?}", state);
            state = match state {
                MasterState::Loading => match self.load() {
                    Ok(()) => MasterState::Superstep(0),
                    Err(Interrupt::Fatal(e)) => return Err(e),
                    Err(Interrupt::WorkersLost { cause, .. }) => {
                        return Err(GBError::WorkerFailure(format!("During load: {}", cause)))
                    }
                },
                MasterState::Superstep(superstep) => match self.superstep(superstep) {
                    Ok(next) => next,
                    Err(Interrupt::Fatal(e)) => return Err(e),
                    Err(Interrupt::WorkersLost { workers, cause }) => {
                        MasterState::Recovering { failed: workers, cause }
                    }
                },
                MasterState::Recovering { failed, cause } => match self.recover(&failed, &cause) {
                    Ok(superstep) => MasterState::Superstep(superstep),
                    Err(Interrupt::Fatal(e)) => return Err(e),
                    Err(Interrupt::WorkersLost { workers, cause }) => {
                        MasterState::Recovering { failed: workers, cause }
                    }
                },
                MasterState::Output => match self.output() {
                    Ok(()) => MasterState::Halted,
                    Err(Interrupt::Fatal(e)) => return Err(e),
                    Err(Interrupt::WorkersLost { workers, cause }) => {
                        MasterState::Recovering { failed: workers, cause }
                    }
                },
                MasterState::Halted => return Ok(self.summary()),
            };
        }
    }

    fn summary(&self) -> JobSummary {
        JobSummary {
            supersteps: self.supersteps,
            recoveries: self.recoveries,
            total_vertices: self.total_vertices,
            total_edges: self.total_edges,
            load_totals: self.load_totals,
            aggregates: self.registry.values().clone(),
        }
    }

    /// Waits until every worker holds its liveness entry.
    fn await_registrations(&self) -> Result<(), GBError> {
        let deadline = Instant::now() + self.config.worker_timeout;
        loop {
            let revision = self.client.revision()?;
            let mut missing = Vec::new();
            for &worker_id in &self.workers {
                if !self.client.exists(&alive_key(worker_id))? {
                    missing.push(worker_id);
                }
            }
            if missing.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(GBError::WorkerFailure(format!(
                    "Workers {:?} did not register within {:?}",
                    missing, self.config.worker_timeout
                )));
            }
            self.client.watch("/", revision, self.config.poll_interval)?;
        }
    }

    fn publish(&mut self, kind: CommandKind) -> Result<u64, GBError> {
        self.sequence += 1;
        debug!("Publishing {} command {}", kind.name(), self.sequence);
        let command = Command::new(self.sequence, self.owners.clone(), self.workers.clone(), kind);
        self.client.put_object(COMMAND_KEY, &command)?;
        Ok(self.sequence)
    }

    /// Waits for the ack of every active worker for command `sequence`, or for the first
    /// failure.
    ///
    /// Workers whose liveness entry vanished are lost immediately. After `worker_timeout` the
    /// workers that did not even finish sending are blamed; if all of them did, the ones that
    /// did not report are.
    fn await_acks(&self, sequence: u64) -> Result<Vec<(WorkerId, WorkerAck)>, Interrupt> {
        let deadline = Instant::now() + self.config.worker_timeout;
        loop {
            let revision = self.client.revision()?;
            let mut acks = Vec::with_capacity(self.workers.len());
            let mut missing = Vec::new();
            for &worker_id in &self.workers {
                match self.client.get_object::<WorkerAck>(&ack_key(sequence, worker_id))? {
                    Some((ack, _)) => acks.push((worker_id, ack)),
                    None => missing.push(worker_id),
                }
            }
            // Peers of a failed worker may never finish the command.
            let failed = acks.iter().any(|(_, ack)| matches!(ack, WorkerAck::Failed(..)));
            if missing.is_empty() || failed {
                self.clear_acks(sequence)?;
                return Ok(acks);
            }

            let mut dead = Vec::new();
            for &worker_id in &missing {
                if !self.client.exists(&alive_key(worker_id))? {
                    dead.push(worker_id);
                }
            }
            if !dead.is_empty() {
                return Err(Interrupt::WorkersLost {
                    cause: format!("Workers {:?} lost their session", dead),
                    workers: dead,
                });
            }

            if Instant::now() >= deadline {
                let mut stuck = Vec::new();
                for &worker_id in &missing {
                    if !self.client.exists(&sent_key(sequence, worker_id))? {
                        stuck.push(worker_id);
                    }
                }
                let suspects = if stuck.is_empty() { missing } else { stuck };
                return Err(Interrupt::WorkersLost {
                    cause: format!(
                        "Workers {:?} did not report command {} within {:?}",
                        suspects, sequence, self.config.worker_timeout
                    ),
                    workers: suspects,
                });
            }
            self.client.watch("/", revision, self.config.poll_interval)?;
        }
    }

    fn clear_acks(&self, sequence: u64) -> Result<(), GBError> {
        for prefix in &[ack_prefix(sequence), sent_prefix(sequence)] {
            for key in self.client.children(prefix)? {
                self.client.delete(&key)?;
            }
        }
        Ok(())
    }

    /// Publishes a command and waits until every active worker answered it.
    fn issue(&mut self, kind: CommandKind) -> Result<Vec<(WorkerId, WorkerAck)>, Interrupt> {
        let name = kind.name();
        let timer = GbTimer::now();
        let sequence = self.publish(kind)?;
        let acks = self.await_acks(sequence)?;
        debug!(
            "All workers answered {} command {} in {}",
            name,
            sequence,
            timer.elapsed().to_millis_string()
        );
        Ok(acks)
    }

    fn load(&mut self) -> Result<(), Interrupt> {
        let timer = GbTimer::now();
        let inputs = self.job.inputs();
        if inputs.vertex_input.is_none() && inputs.edge_input.is_none() {
            return Err(GBError::Config("A job needs a vertex or an edge input".to_owned()).into());
        }
        let vertex_splits = match &inputs.vertex_input {
            Some(input) => input.splits()?,
            None => Vec::new(),
        };
        let edge_splits = match &inputs.edge_input {
            Some(input) => input.splits()?,
            None => Vec::new(),
        };
        info!(
            "Loading {} vertex splits and {} edge splits on {} workers",
            vertex_splits.len(),
            edge_splits.len(),
            self.workers.len()
        );

        let acks = self.issue(CommandKind::Load { vertex_splits, edge_splits })?;
        let reports: Vec<LoadReport> = successful(acks)?
            .into_iter()
            .map(|(worker_id, ack)| match ack {
                WorkerAck::Loaded(report) => Ok(report),
                other => Err(unexpected_ack(worker_id, &other)),
            })
            .collect::<Result<_, _>>()?;

        self.load_totals = LoadTotals::default();
        for report in &reports {
            self.load_totals += report.totals;
        }
        self.total_vertices = reports.iter().map(|report| report.vertex_count).sum();
        self.total_edges = reports.iter().map(|report| report.edge_count).sum();
        info!(
            "Loaded {} vertices and {} edges in {}",
            self.total_vertices,
            self.total_edges,
            timer.elapsed().to_seconds_string()
        );

        if self.config.rebalance_after_load {
            let sizes: HashMap<PartitionId, u64> =
                reports.iter().flat_map(|report| report.partition_sizes.iter().copied()).collect();
            let moves = self.owners.rebalance(&sizes, self.config.rebalance_tolerance);
            if !moves.is_empty() {
                info!("Moving {} partitions to balance the workers", moves.len());
                for (partition_id, from, to) in &moves {
                    debug!("Partition {} moves from worker {} to {}", partition_id, from, to);
                }
                successful(self.issue(CommandKind::Migrate)?)?;
            }
        }
        Ok(())
    }

    fn superstep(&mut self, superstep: Superstep) -> Result<MasterState, Interrupt> {
        if let Some(max_supersteps) = self.config.max_supersteps {
            if superstep >= max_supersteps {
                info!("Reached the maximum of {} supersteps", max_supersteps);
                return Ok(MasterState::Output);
            }
        }
        if self.checkpoint_due(superstep) {
            self.trigger_checkpoint(superstep)?;
        }
        if self.run_master_compute(superstep)? {
            info!("Master compute halted the job before superstep {}", superstep);
            return Ok(MasterState::Output);
        }

        let timer = GbTimer::now();
        let sequence = self.start_superstep(superstep)?;
        let reports = self.await_superstep_completion(sequence, superstep)?;
        self.registry.merge_partials(reports.iter().map(|report| &report.partials))?;
        self.total_vertices = reports.iter().map(|report| report.vertex_count).sum();
        self.total_edges = reports.iter().map(|report| report.edge_count).sum();
        self.supersteps = superstep + 1;

        let halt = decide_halt(&reports);
        info!(
            "Superstep {} done in {}: {} messages sent, {} vertices{}",
            superstep,
            timer.elapsed().to_millis_string(),
            reports.iter().map(|report| report.messages_sent).sum::<u64>(),
            self.total_vertices,
            if halt { ", all halted" } else { "" }
        );
        Ok(if halt { MasterState::Output } else { MasterState::Superstep(superstep + 1) })
    }

    /// Releases the workers into `superstep` with the aggregators merged after the last one.
    fn start_superstep(&mut self, superstep: Superstep) -> Result<u64, GBError> {
        self.publish(CommandKind::Compute {
            superstep,
            aggregates: self.registry.values().clone(),
            total_vertices: self.total_vertices,
            total_edges: self.total_edges,
        })
    }

    fn await_superstep_completion(
        &self,
        sequence: u64,
        superstep: Superstep,
    ) -> Result<Vec<WorkerReport>, Interrupt> {
        let acks = successful(self.await_acks(sequence)?)?;
        acks.into_iter()
            .map(|(worker_id, ack)| match ack {
                WorkerAck::Computed(report) if report.superstep == superstep => Ok(report),
                other => Err(unexpected_ack(worker_id, &other).into()),
            })
            .collect()
    }

    fn checkpoint_dir(&self) -> Option<&'a Path> {
        let config: &'a JobConfig = self.config;
        if config.checkpointing_enabled() {
            config.checkpoint_dir.as_deref()
        } else {
            None
        }
    }

    fn checkpoint_due(&self, superstep: Superstep) -> bool {
        self.checkpoint_dir().is_some()
            && superstep % self.config.checkpoint_frequency == 0
            && self.last_checkpoint != Some(superstep)
    }

    /// Has every worker write its partitions for `superstep`, then completes the checkpoint with
    /// its metadata and drops the checkpoints that are no longer retained.
    fn trigger_checkpoint(&mut self, superstep: Superstep) -> Result<(), Interrupt> {
        let dir = match self.checkpoint_dir() {
            Some(dir) => dir,
            None => return Ok(()),
        };
        let timer = GbTimer::now();
        let mut attempt = 0;
        loop {
            let acks = self.issue(CommandKind::Checkpoint {
                superstep,
                aggregates: self.registry.values().clone(),
            })?;
            let metadata = CheckpointMetadata::new(
                superstep,
                self.owners.partition_count(),
                self.total_vertices,
                self.total_edges,
                self.registry.values().clone(),
            );
            let result = successful(acks).and_then(|_| write_metadata(dir, &metadata));
            match result {
                Ok(()) => break,
                Err(e @ GBError::Checkpoint(_)) if attempt < self.config.checkpoint_retries => {
                    attempt += 1;
                    warn!(
                        "Checkpoint of superstep {} failed ({}), retry {}/{}",
                        superstep, e, attempt, self.config.checkpoint_retries
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.last_checkpoint = Some(superstep);
        let removed = prune(dir, self.config.checkpoints_retained)?;
        info!(
            "Checkpointed superstep {} in {}{}",
            superstep,
            timer.elapsed().to_millis_string(),
            if removed.is_empty() { String::new() } else { format!(", removed {:?}", removed) }
        );
        Ok(())
    }

    fn run_master_compute(&mut self, superstep: Superstep) -> Result<bool, GBError> {
        let master_compute = match self.job.master_compute() {
            Some(master_compute) => master_compute,
            None => return Ok(false),
        };
        let mut context = MasterComputeContext {
            superstep,
            total_vertices: self.total_vertices,
            total_edges: self.total_edges,
            registry: &mut self.registry,
            halted: false,
            error: None,
        };
        master_compute.compute(&mut context);
        match context.error {
            Some(e) => Err(e),
            None => Ok(context.halted),
        }
    }

    /// Drops the `failed` workers, hands their partitions to the survivors and rolls everybody
    /// back to the latest complete checkpoint. Returns the superstep to continue from.
    fn recover(&mut self, failed: &[WorkerId], cause: &str) -> Result<Superstep, Interrupt> {
        warn!("Lost workers {:?}: {}", failed, cause);
        self.recoveries += 1;
        if self.recoveries > self.config.max_recovery_attempts {
            return Err(
                GBError::RecoveryExhausted(self.config.max_recovery_attempts, cause.to_owned())
                    .into(),
            );
        }
        let dir = self.checkpoint_dir().ok_or_else(|| {
            GBError::WorkerFailure(format!("{} and checkpointing is disabled", cause))
        })?;
        let superstep = latest_complete(dir)?.ok_or_else(|| {
            GBError::WorkerFailure(format!("{} and there is no checkpoint to recover from", cause))
        })?;
        let metadata = read_metadata(dir, superstep)?;
        if metadata.partition_count != self.owners.partition_count() {
            return Err(GBError::Checkpoint(format!(
                "Checkpoint of superstep {} has {} partitions, the job has {}",
                superstep,
                metadata.partition_count,
                self.owners.partition_count()
            ))
            .into());
        }

        self.workers.retain(|worker_id| !failed.contains(worker_id));
        self.owners.reassign_from(failed, &self.workers)?;
        info!(
            "Recovery {} restores superstep {} on workers {:?}",
            self.recoveries, superstep, self.workers
        );
        successful(self.issue(CommandKind::Restore { superstep })?)?;

        self.registry.restore(metadata.aggregates);
        self.total_vertices = metadata.total_vertices;
        self.total_edges = metadata.total_edges;
        self.supersteps = superstep;
        self.last_checkpoint = Some(superstep);
        Ok(superstep)
    }

    fn output(&mut self) -> Result<(), Interrupt> {
        let timer = GbTimer::now();
        successful(self.issue(CommandKind::Output)?)?;
        if self.job.output().is_some() {
            info!("Wrote the output in {}", timer.elapsed().to_seconds_string());
        }
        Ok(())
    }
}

/// Fails with the first error a worker reported.
fn successful(
    acks: Vec<(WorkerId, WorkerAck)>,
) -> Result<Vec<(WorkerId, WorkerAck)>, GBError> {
    for (worker_id, ack) in &acks {
        if let WorkerAck::Failed(kind, message) = ack {
            return Err(GBError::from_worker(*worker_id, *kind, message));
        }
    }
    Ok(acks)
}

fn unexpected_ack(worker_id: WorkerId, ack: &WorkerAck) -> GBError {
    GBError::from_worker(worker_id, FailureKind::Other, &format!("unexpected ack {:?}", ack))
}

struct MasterComputeContext<'r> {
    superstep: Superstep,
    total_vertices: u64,
    total_edges: u64,
    registry: &'r mut AggregatorRegistry,
    halted: bool,
    error: Option<GBError>,
}

impl<'r> MasterContext for MasterComputeContext<'r> {
    fn superstep(&self) -> Superstep {
        self.superstep
    }

    fn total_vertices(&self) -> u64 {
        self.total_vertices
    }

    fn total_edges(&self) -> u64 {
        self.total_edges
    }

    fn aggregated_value(&self, name: &str) -> Option<&AggregateValue> {
        self.registry.get(name)
    }

    fn set_aggregated_value(&mut self, name: &str, value: AggregateValue) {
        if let Err(e) = self.registry.set(name, value) {
            self.error.get_or_insert(e);
        }
    }

    fn reset_aggregator(&mut self, name: &str) {
        if let Err(e) = self.registry.reset(name) {
            self.error.get_or_insert(e);
        }
    }

    fn halt_computation(&mut self) {
        self.halted = true;
    }
}
