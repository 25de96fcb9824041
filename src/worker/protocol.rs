//! What the master and the workers exchange through the coordination service.
//!
//! The master publishes one `Command` at a time under `COMMAND_KEY`; every command has a new
//! sequence number. Each active worker answers with a `WorkerAck` under `ack_key(sequence, id)`.
//! Workers that exchange data with their peers also put `sent_key(sequence, id)` once all their
//! frames are out, which lets the master tell a stuck worker from one waiting on its peers.

use crate::aggregators::AggregatorValues;
use crate::error::GBError;
use crate::input::loader::LoadTotals;
use crate::input::InputSplit;
use crate::partition::PartitionOwners;
use gb_api::{PartitionId, Superstep, WorkerId};

pub const COMMAND_PREFIX: &str = "/job/";
pub const COMMAND_KEY: &str = "/job/command";
pub const ALIVE_PREFIX: &str = "/alive/";
pub const MASTER_ELECTION: &str = "master";

pub fn ack_prefix(sequence: u64) -> String {
    format!("/ack/{:010}/", sequence)
}

pub fn ack_key(sequence: u64, worker_id: WorkerId) -> String {
    format!("{}{}", ack_prefix(sequence), worker_id)
}

pub fn sent_prefix(sequence: u64) -> String {
    format!("/sent/{:010}/", sequence)
}

pub fn sent_key(sequence: u64, worker_id: WorkerId) -> String {
    format!("{}{}", sent_prefix(sequence), worker_id)
}

pub fn alive_key(worker_id: WorkerId) -> String {
    format!("{}{}", ALIVE_PREFIX, worker_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct Command {
    pub sequence: u64,
    pub owners: PartitionOwners,
    /// The active workers. A worker missing from this list stops.
    pub workers: Vec<WorkerId>,
    pub kind: CommandKind,
}

impl Command {
    pub fn peers_of(&self, worker_id: WorkerId) -> impl Iterator<Item = WorkerId> + '_ {
        self.workers.iter().copied().filter(move |&peer| peer != worker_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Read the input splits and route every vertex and edge to its owner.
    Load { vertex_splits: Vec<InputSplit>, edge_splits: Vec<InputSplit> },
    /// Hand partitions this worker no longer owns to their new owners.
    Migrate,
    /// Write the owned partitions and their pending messages for `superstep`.
    Checkpoint { superstep: Superstep, aggregates: AggregatorValues },
    Compute {
        superstep: Superstep,
        aggregates: AggregatorValues,
        total_vertices: u64,
        total_edges: u64,
    },
    /// Drop all state and read the owned partitions from the checkpoint of `superstep`.
    Restore { superstep: Superstep },
    Output,
    Shutdown,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Load { .. } => "load",
            CommandKind::Migrate => "migrate",
            CommandKind::Checkpoint { .. } => "checkpoint",
            CommandKind::Compute { .. } => "compute",
            CommandKind::Restore { .. } => "restore",
            CommandKind::Output => "output",
            CommandKind::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    MalformedInput,
    Checkpoint,
    Other,
}

impl FailureKind {
    pub fn of(error: &GBError) -> Self {
        match error {
            GBError::MalformedInput(_) => FailureKind::MalformedInput,
            GBError::Checkpoint(_) => FailureKind::Checkpoint,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct LoadReport {
    pub partition_sizes: Vec<(PartitionId, u64)>,
    pub vertex_count: u64,
    pub edge_count: u64,
    pub totals: LoadTotals,
}

/// One worker's view of the superstep it just computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct WorkerReport {
    pub superstep: Superstep,
    /// Whether every owned vertex voted to halt.
    pub all_halted: bool,
    /// Messages sent during the superstep, i.e., pending for the next one.
    pub messages_sent: u64,
    pub partials: AggregatorValues,
    pub vertex_count: u64,
    pub edge_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerAck {
    Loaded(LoadReport),
    Migrated,
    Checkpointed,
    Computed(WorkerReport),
    Restored,
    Written,
    Failed(FailureKind, String),
}

impl WorkerAck {
    pub fn failed(error: &GBError) -> Self {
        let message = match error {
            GBError::MalformedInput(message) | GBError::Checkpoint(message) => message.clone(),
            other => other.to_string(),
        };
        WorkerAck::Failed(FailureKind::of(error), message)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GBError;
    use crate::partition::PartitionOwners;
    use crate::worker::protocol::{
        ack_key, ack_prefix, Command, CommandKind, FailureKind, WorkerAck,
    };

    #[test]
    fn ack_keys_sort_by_sequence() {
        assert!(ack_key(9, 1) < ack_key(10, 0));
        assert!(ack_key(12, 3).starts_with(&ack_prefix(12)));
    }

    #[test]
    fn peers_exclude_self() {
        let owners = PartitionOwners::round_robin(4, &[0, 1, 2]).unwrap();
        let command = Command::new(1, owners, vec![0, 1, 2], CommandKind::Output);
        assert_eq!(command.peers_of(1).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn failure_kinds() {
        let error = GBError::MalformedInput("no target".to_owned());
        assert_eq!(FailureKind::of(&error), FailureKind::MalformedInput);
        assert_eq!(FailureKind::of(&GBError::Transport("gone".to_owned())), FailureKind::Other);
    }

    #[test]
    fn failed_ack_rebuilds_the_error() {
        let ack = WorkerAck::failed(&GBError::Checkpoint("disk full".to_owned()));
        let rebuilt = match ack {
            WorkerAck::Failed(kind, message) => GBError::from_worker(2, kind, &message),
            other => panic!("unexpected ack {:?}", other),
        };
        assert_eq!(rebuilt, GBError::Checkpoint("worker 2: disk full".to_owned()));
    }
}
