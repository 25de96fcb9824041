//! Durable snapshots of the whole job at superstep boundaries.
//!
//! Every checkpoint lives in `superstep_{n}` under the checkpoint directory and holds one file
//! per partition: the partition, then the messages pending for it, then the merged aggregator
//! values. The master writes `metadata.bin` once every worker acknowledged its partitions, so a
//! checkpoint without metadata is incomplete and never used.

use crate::aggregators::AggregatorValues;
use crate::error::{deserialize_error, serialize_error, GBError};
use crate::messages::MessageStore;
use crate::partition::serde::{read_partition, write_partition};
use crate::partition::Partition;
use crate::util::io::{
    create_dir_all, deserialize_object, get_buf_reader, serialize_object, GbWriter,
};
use gb_api::{GraphValue, PartitionId, Superstep};
use log::{info, warn};
use std::path::{Path, PathBuf};

const SUPERSTEP_DIR_PREFIX: &str = "superstep_";
const METADATA_FILE: &str = "metadata.bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct CheckpointMetadata {
    pub superstep: Superstep,
    pub partition_count: usize,
    pub total_vertices: u64,
    pub total_edges: u64,
    pub aggregates: AggregatorValues,
}

pub fn superstep_dir(dir: &Path, superstep: Superstep) -> PathBuf {
    dir.join(format!("{}{:010}", SUPERSTEP_DIR_PREFIX, superstep))
}

pub fn partition_file(dir: &Path, superstep: Superstep, partition_id: PartitionId) -> PathBuf {
    superstep_dir(dir, superstep).join(format!("partition_{}.bin", partition_id))
}

fn checkpoint_error(superstep: Superstep, e: &GBError) -> GBError {
    GBError::Checkpoint(format!("superstep {}: {}", superstep, e))
}

/// Writes the checkpoint file of one partition.
pub fn write_partition_checkpoint<V, E, M>(
    dir: &Path,
    superstep: Superstep,
    partition: &Partition<V, E>,
    messages: &MessageStore<M>,
    aggregates: &AggregatorValues,
) -> Result<(), GBError>
where
    V: GraphValue + Default,
    E: GraphValue,
    M: GraphValue,
{
    let write = || -> Result<(), GBError> {
        create_dir_all(&superstep_dir(dir, superstep))?;
        let path = partition_file(dir, superstep, partition.id());
        let mut writer = GbWriter::new(&path)?;
        write_partition(writer.buf_writer(), partition)?;
        messages.write_partition(writer.buf_writer(), partition.id())?;
        bincode::serialize_into(writer.buf_writer(), aggregates)
            .map_err(|e| serialize_error(&path.display().to_string(), e))?;
        writer.flush()
    };
    write().map_err(|e| checkpoint_error(superstep, &e))
}

/// Reads the checkpoint file of one partition. Its pending messages go to `messages`.
pub fn read_partition_checkpoint<V, E, M>(
    dir: &Path,
    superstep: Superstep,
    partition_id: PartitionId,
    messages: &MessageStore<M>,
) -> Result<(Partition<V, E>, AggregatorValues), GBError>
where
    V: GraphValue + Default,
    E: GraphValue,
    M: GraphValue,
{
    let read = || -> Result<(Partition<V, E>, AggregatorValues), GBError> {
        let path = partition_file(dir, superstep, partition_id);
        let mut reader = get_buf_reader(&path)?;
        let partition: Partition<V, E> = read_partition(&mut reader)?;
        if partition.id() != partition_id {
            return Err(GBError::Checkpoint(format!(
                "'{}' holds partition {}",
                path.display(),
                partition.id()
            )));
        }
        messages.read_partition(&mut reader, partition_id)?;
        let aggregates = bincode::deserialize_from(&mut reader)
            .map_err(|e| deserialize_error(&path.display().to_string(), e))?;
        Ok((partition, aggregates))
    };
    read().map_err(|e| checkpoint_error(superstep, &e))
}

pub fn write_metadata(dir: &Path, metadata: &CheckpointMetadata) -> Result<(), GBError> {
    let path = superstep_dir(dir, metadata.superstep).join(METADATA_FILE);
    serialize_object(&path, metadata).map_err(|e| checkpoint_error(metadata.superstep, &e))?;
    info!("Checkpoint of superstep {} is complete", metadata.superstep);
    Ok(())
}

pub fn read_metadata(dir: &Path, superstep: Superstep) -> Result<CheckpointMetadata, GBError> {
    let path = superstep_dir(dir, superstep).join(METADATA_FILE);
    deserialize_object(&path).map_err(|e| checkpoint_error(superstep, &e))
}

/// All supersteps with a checkpoint directory, complete or not, in ascending order.
fn checkpoint_supersteps(dir: &Path) -> Result<Vec<(Superstep, bool)>, GBError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GBError::ReadFile(dir.display().to_string(), e.to_string())),
    };
    let mut supersteps: Vec<(Superstep, bool)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let superstep = name.strip_prefix(SUPERSTEP_DIR_PREFIX)?.parse().ok()?;
            Some((superstep, entry.path().join(METADATA_FILE).exists()))
        })
        .collect();
    supersteps.sort_unstable();
    Ok(supersteps)
}

/// The superstep of the most recent complete checkpoint.
pub fn latest_complete(dir: &Path) -> Result<Option<Superstep>, GBError> {
    Ok(checkpoint_supersteps(dir)?
        .into_iter()
        .filter(|&(_, complete)| complete)
        .map(|(superstep, _)| superstep)
        .last())
}

/// Deletes all but the `retained` most recent complete checkpoints, and incomplete checkpoints
/// older than the latest complete one. The oldest retained checkpoint is the recovery floor.
pub fn prune(dir: &Path, retained: usize) -> Result<Vec<Superstep>, GBError> {
    let supersteps = checkpoint_supersteps(dir)?;
    let complete: Vec<Superstep> =
        supersteps.iter().filter(|(_, complete)| *complete).map(|(s, _)| *s).collect();
    let floor = match complete.len().checked_sub(retained) {
        Some(index) if index < complete.len() => complete[index],
        _ => return Ok(Vec::new()),
    };
    let mut removed = Vec::new();
    for (superstep, _) in supersteps.into_iter().filter(|(superstep, _)| *superstep < floor) {
        let path = superstep_dir(dir, superstep);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed.push(superstep),
            Err(e) => warn!("Could not remove old checkpoint '{}': {}", path.display(), e),
        }
    }
    if !removed.is_empty() {
        info!("Removed checkpoints of supersteps {:?}, recovery floor is {}", removed, floor);
    }
    Ok(removed)
}
