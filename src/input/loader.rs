use crate::config::JobConfig;
use crate::coordination::CoordinationClient;
use crate::error::GBError;
use crate::input::{EdgeInputFormat, InputSplit, VertexInputFormat};
use crate::util::memory_usage::print_memory_usage;
use crate::util::timer::GbTimer;
use crossbeam_utils::thread;
use gb_api::{AcceptAll, Edge, EdgeInputFilter, Vertex, VertexId, VertexInputFilter, WorkerId};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Records between two progress reports of a loader thread.
pub const PROGRESS_PERIOD: u64 = 1_000_000;
pub const CLAIM_PREFIX: &str = "/load/claim/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTotals {
    pub vertices_loaded: u64,
    pub vertices_filtered: u64,
    pub edges_loaded: u64,
    pub edges_filtered: u64,
    pub splits_read: u64,
}

impl AddAssign for LoadTotals {
    fn add_assign(&mut self, other: Self) {
        self.vertices_loaded += other.vertices_loaded;
        self.vertices_filtered += other.vertices_filtered;
        self.edges_loaded += other.edges_loaded;
        self.edges_filtered += other.edges_filtered;
        self.splits_read += other.splits_read;
    }
}

/// Receives the records a loader thread accepted, in batches.
pub trait LoadSink<V, E>: Sync {
    fn add_vertices(&self, vertices: Vec<Vertex<V, E>>) -> Result<(), GBError>;

    fn add_edges(&self, edges: Vec<(VertexId, Edge<E>)>) -> Result<(), GBError>;
}

/// The inputs of a job and the filters applied while reading them.
pub struct LoadInputs<V, E> {
    pub vertex_input: Option<Arc<dyn VertexInputFormat<V, E>>>,
    pub edge_input: Option<Arc<dyn EdgeInputFormat<E>>>,
    pub vertex_filter: Arc<dyn VertexInputFilter<V, E>>,
    pub edge_filter: Arc<dyn EdgeInputFilter<E>>,
}

impl<V, E> Default for LoadInputs<V, E> {
    fn default() -> Self {
        Self {
            vertex_input: None,
            edge_input: None,
            vertex_filter: Arc::new(AcceptAll),
            edge_filter: Arc::new(AcceptAll),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitKind {
    Vertex,
    Edge,
}

impl SplitKind {
    fn claim_key(self, split: &InputSplit) -> String {
        let tag = match self {
            SplitKind::Vertex => 'v',
            SplitKind::Edge => 'e',
        };
        format!("{}{}{}", CLAIM_PREFIX, tag, split.index)
    }
}

/// Reads the splits the master published, on a bounded pool of threads. Every split is claimed
/// through the coordination service first, so each split is read by exactly one thread of one
/// worker.
pub struct InputSplitLoader<'a, V, E> {
    worker_id: WorkerId,
    client: &'a CoordinationClient,
    config: &'a JobConfig,
    inputs: &'a LoadInputs<V, E>,
}

impl<'a, V: Send + Sync, E: Send + Sync> InputSplitLoader<'a, V, E> {
    pub fn new(
        worker_id: WorkerId,
        client: &'a CoordinationClient,
        config: &'a JobConfig,
        inputs: &'a LoadInputs<V, E>,
    ) -> Self {
        Self { worker_id, client, config, inputs }
    }

    pub fn load(
        &self,
        vertex_splits: &[InputSplit],
        edge_splits: &[InputSplit],
        sink: &dyn LoadSink<V, E>,
    ) -> Result<LoadTotals, GBError> {
        let timer = GbTimer::now();
        let queue: Vec<(SplitKind, &InputSplit)> = vertex_splits
            .iter()
            .map(|split| (SplitKind::Vertex, split))
            .chain(edge_splits.iter().map(|split| (SplitKind::Edge, split)))
            .collect();
        let failed = AtomicBool::new(false);
        let records_read = AtomicU64::new(0);

        let results = thread::scope(|s| {
            let handles: Vec<_> = (0..self.config.loader_threads)
                .map(|thread_index| {
                    let order = self.claim_order(queue.len(), thread_index);
                    let (queue, failed, records_read) = (&queue, &failed, &records_read);
                    s.builder()
                        .name(format!("worker-{}-loader-{}", self.worker_id, thread_index))
                        .spawn(move |_| {
                            let mut totals = LoadTotals::default();
                            for position in order {
                                if failed.load(Ordering::SeqCst) {
                                    break;
                                }
                                let (kind, split) = queue[position];
                                let result = self.claim(kind, split).and_then(|claimed| {
                                    if claimed {
                                        self.read_split(kind, split, sink, records_read, &timer)
                                    } else {
                                        Ok(LoadTotals::default())
                                    }
                                });
                                match result {
                                    Ok(split_totals) => totals += split_totals,
                                    Err(e) => {
                                        failed.store(true, Ordering::SeqCst);
                                        return Err(e);
                                    }
                                }
                            }
                            Ok(totals)
                        })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    let handle = handle.map_err(|e| {
                        GBError::Generic(format!("Could not start loader thread: {}", e))
                    })?;
                    handle.join().expect("Error joining loader thread")
                })
                .collect::<Vec<_>>()
        })
        .expect("Error ending loader scope");

        let mut totals = LoadTotals::default();
        for result in results {
            totals += result?;
        }
        info!(
            "Worker {} read {} splits: {} vertices ({} filtered), {} edges ({} filtered) in {}",
            self.worker_id,
            totals.splits_read,
            totals.vertices_loaded,
            totals.vertices_filtered,
            totals.edges_loaded,
            totals.edges_filtered,
            timer.elapsed().to_seconds_string()
        );
        print_memory_usage(format_args!("worker {} loaded", self.worker_id));
        Ok(totals)
    }

    /// The order in which one thread walks the split queue. Threads start at different places
    /// so that they rarely compete for the same split.
    fn claim_order(&self, splits: usize, thread_index: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..splits).collect();
        if self.config.randomize_splits {
            order.shuffle(&mut thread_rng());
        } else if splits > 0 {
            let start = (self.worker_id as usize * self.config.loader_threads + thread_index)
                % splits;
            order.rotate_left(start);
        }
        order
    }

    fn claim(&self, kind: SplitKind, split: &InputSplit) -> Result<bool, GBError> {
        let key = kind.claim_key(split);
        self.client.create(&key, self.worker_id.to_string().as_bytes(), None)
    }

    fn read_split(
        &self,
        kind: SplitKind,
        split: &InputSplit,
        sink: &dyn LoadSink<V, E>,
        records_read: &AtomicU64,
        timer: &GbTimer,
    ) -> Result<LoadTotals, GBError> {
        let mut totals = match kind {
            SplitKind::Vertex => self.read_vertex_split(split, sink, records_read, timer)?,
            SplitKind::Edge => self.read_edge_split(split, sink, records_read, timer)?,
        };
        totals.splits_read = 1;
        Ok(totals)
    }

    fn read_vertex_split(
        &self,
        split: &InputSplit,
        sink: &dyn LoadSink<V, E>,
        records_read: &AtomicU64,
        timer: &GbTimer,
    ) -> Result<LoadTotals, GBError> {
        let input = match &self.inputs.vertex_input {
            Some(input) => input,
            None => return Ok(LoadTotals::default()),
        };
        let mut totals = LoadTotals::default();
        let mut batch = Vec::new();
        for (index, record) in input.read_split(split)?.enumerate() {
            let vertex = match record {
                Ok(record) => record.into_vertex(),
                Err(GBError::MalformedInput(message)) => Err(message),
                Err(e) => return Err(e),
            }
            .map_err(|message| malformed("vertex", split, index, &message))?;
            totals.vertices_loaded += 1;
            self.report_progress(records_read, timer);
            if self.inputs.vertex_filter.drop_vertex(&vertex) {
                totals.vertices_filtered += 1;
            } else {
                batch.push(vertex);
                if batch.len() >= self.config.message_batch_size {
                    sink.add_vertices(std::mem::take(&mut batch))?;
                }
            }
            if self.reached_max_records(totals.vertices_loaded, "vertex", split) {
                break;
            }
        }
        if !batch.is_empty() {
            sink.add_vertices(batch)?;
        }
        Ok(totals)
    }

    fn read_edge_split(
        &self,
        split: &InputSplit,
        sink: &dyn LoadSink<V, E>,
        records_read: &AtomicU64,
        timer: &GbTimer,
    ) -> Result<LoadTotals, GBError> {
        let input = match &self.inputs.edge_input {
            Some(input) => input,
            None => return Ok(LoadTotals::default()),
        };
        let mut totals = LoadTotals::default();
        let mut batch = Vec::new();
        for (index, record) in input.read_split(split)?.enumerate() {
            let (source, edge) = match record {
                Ok(record) => record.into_edge(),
                Err(GBError::MalformedInput(message)) => Err(message),
                Err(e) => return Err(e),
            }
            .map_err(|message| malformed("edge", split, index, &message))?;
            totals.edges_loaded += 1;
            self.report_progress(records_read, timer);
            if self.inputs.edge_filter.drop_edge(source, &edge) {
                totals.edges_filtered += 1;
            } else {
                batch.push((source, edge));
                if batch.len() >= self.config.message_batch_size {
                    sink.add_edges(std::mem::take(&mut batch))?;
                }
            }
            if self.reached_max_records(totals.edges_loaded, "edge", split) {
                break;
            }
        }
        if !batch.is_empty() {
            sink.add_edges(batch)?;
        }
        Ok(totals)
    }

    fn reached_max_records(&self, records: u64, what: &str, split: &InputSplit) -> bool {
        match self.config.split_max_records {
            Some(max_records) if records >= max_records => {
                info!(
                    "Leaving {} split {} early, reached maximum of {} records",
                    what, split.index, max_records
                );
                true
            }
            _ => false,
        }
    }

    fn report_progress(&self, records_read: &AtomicU64, timer: &GbTimer) {
        let records = records_read.fetch_add(1, Ordering::Relaxed) + 1;
        if records % PROGRESS_PERIOD == 0 {
            let elapsed = timer.elapsed();
            info!(
                "Worker {} loaded {} records at {:.0} records/sec",
                self.worker_id,
                records,
                elapsed.rate(records)
            );
            print_memory_usage(format_args!("worker {} loading", self.worker_id));
        }
    }
}

/// Records that fail validation abort the load with their position. Reader failures such as
/// unreadable files pass through unchanged.
fn malformed(what: &str, split: &InputSplit, index: usize, message: &str) -> GBError {
    warn!("Aborting {} split {}: record {}: {}", what, split.index, index, message);
    GBError::MalformedInput(format!(
        "{} split {}, record {}: {}",
        what, split.index, index, message
    ))
}
