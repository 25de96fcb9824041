use crate::aggregators::AggregatorSpec;
use crate::config::JobConfig;
use crate::coordination::LocalCoordinator;
use crate::error::GBError;
use crate::input::memory::{MemoryEdgeInput, MemoryVertexInput};
use crate::input::EdgeRecord;
use crate::job::Job;
use crate::output::CollectedOutput;
use crate::partition::PartitionOwners;
use crate::util::io::tests::temp_dir;
use gb_api::{
    AggregateValue, ComputationTypes, ComputeContext, Edge, MasterCompute, MasterContext,
    Superstep, Vertex, VertexComputation, VertexId, WorkerId,
};
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_config(workers: usize) -> JobConfig {
    JobConfig::default()
        .with_workers(workers)
        .with_compute_threads(2)
        .with_loader_threads(2)
        .with_worker_timeout(Duration::from_secs(20))
}

/// Superstep 0 sends the own value along every edge, later supersteps take the sum of the
/// received messages as the new value and halt once it no longer changes.
struct PathSum;

impl ComputationTypes for PathSum {
    type VertexValue = f64;
    type EdgeValue = ();
    type Message = f64;
}

impl VertexComputation for PathSum {
    fn compute(
        &self,
        vertex: &mut Vertex<f64, ()>,
        messages: &[f64],
        context: &mut dyn ComputeContext<f64, ()>,
    ) {
        if context.superstep() == 0 {
            context.send_message_to_edges(vertex.edges(), *vertex.value());
            return;
        }
        let sum: f64 = messages.iter().sum();
        if (sum - *vertex.value()).abs() < f64::EPSILON {
            vertex.vote_to_halt();
        } else {
            vertex.set_value(sum);
        }
    }
}

fn path_graph_job() -> (Job<PathSum>, Arc<CollectedOutput<f64, ()>>) {
    let output = Arc::new(CollectedOutput::default());
    let job = Job::new(PathSum)
        .with_vertex_input(MemoryVertexInput::from_vertices(vec![
            (1, 1.0, vec![Edge::new(2, ())]),
            (2, 1.0, vec![Edge::new(3, ())]),
            (3, 1.0, Vec::new()),
        ]))
        .with_output(output.clone());
    (job, output)
}

#[test]
fn test_path_graph() {
    for &workers in &[1, 3] {
        let (job, output) = path_graph_job();
        let summary = job.run(&test_config(workers)).expect("Job failed");
        assert_eq!(summary.supersteps, 3);
        assert_eq!(summary.recoveries, 0);
        assert_eq!(summary.total_vertices, 3);
        assert_eq!(summary.total_edges, 2);
        assert_eq!(summary.load_totals.vertices_loaded, 3);

        let values = output.values();
        assert_eq!(values.len(), 3);
        assert!(values[&1].abs() < f64::EPSILON);
        assert!((values[&2] - 1.0).abs() < f64::EPSILON);
        assert!((values[&3] - 1.0).abs() < f64::EPSILON);
    }
}

#[test]
fn test_max_supersteps() {
    let (job, output) = path_graph_job();
    let summary = job.run(&test_config(2).with_max_supersteps(1)).expect("Job failed");
    assert_eq!(summary.supersteps, 1);
    assert!(output.values().values().all(|&value| (value - 1.0).abs() < f64::EPSILON));
}

/// Contributes the own value to "total" and then takes the merged total as its value.
struct Total;

impl ComputationTypes for Total {
    type VertexValue = f64;
    type EdgeValue = ();
    type Message = f64;
}

impl VertexComputation for Total {
    fn compute(
        &self,
        vertex: &mut Vertex<f64, ()>,
        _messages: &[f64],
        context: &mut dyn ComputeContext<f64, ()>,
    ) {
        if context.superstep() == 0 {
            context.aggregate("total", AggregateValue::Double(*vertex.value()));
        } else {
            let total = context.aggregated_value("total").and_then(AggregateValue::as_double);
            vertex.set_value(total.unwrap_or(-1.0));
            vertex.vote_to_halt();
        }
    }
}

#[test]
fn test_aggregator_total() {
    // One vertex on each of the three workers.
    let config = test_config(3);
    let workers: Vec<WorkerId> = vec![0, 1, 2];
    let owners = PartitionOwners::round_robin(config.partition_count(), &workers)
        .expect("Could not assign partitions");
    let ids: Vec<VertexId> = workers
        .iter()
        .map(|&worker| {
            (1..).find(|&id| owners.owner_of_vertex(id) == worker).expect("Worker without ids")
        })
        .collect();

    let output = Arc::new(CollectedOutput::default());
    let job = Job::new(Total)
        .with_aggregator(AggregatorSpec::sum_double("total"))
        .with_vertex_input(MemoryVertexInput::from_vertices(vec![
            (ids[0], 2.0, Vec::new()),
            (ids[1], 5.0, Vec::new()),
            (ids[2], 3.0, Vec::new()),
        ]))
        .with_output(output.clone());
    let summary = job.run(&config).expect("Job failed");
    assert_eq!(summary.supersteps, 2);
    assert_eq!(summary.aggregates["total"], AggregateValue::Double(10.0));
    assert!(output.values().values().all(|&value| (value - 10.0).abs() < f64::EPSILON));
}

/// Keeps every vertex as loaded.
struct Idle;

impl ComputationTypes for Idle {
    type VertexValue = u64;
    type EdgeValue = ();
    type Message = u64;
}

impl VertexComputation for Idle {
    fn compute(
        &self,
        vertex: &mut Vertex<u64, ()>,
        _messages: &[u64],
        _context: &mut dyn ComputeContext<u64, ()>,
    ) {
        vertex.vote_to_halt();
    }
}

#[test]
fn test_edge_filter() {
    let output = Arc::new(CollectedOutput::default());
    let job = Job::new(Idle)
        .with_edge_input(MemoryEdgeInput::from_edges(vec![
            (1, 2, ()),
            (1, 0, ()),
            (2, 3, ()),
            (3, 0, ()),
        ]))
        .with_edge_filter(|_source: VertexId, edge: &Edge<()>| edge.target == 0)
        .with_output(output.clone());
    let summary = job.run(&test_config(2)).expect("Job failed");
    assert_eq!(summary.load_totals.edges_loaded, 4);
    assert_eq!(summary.load_totals.edges_filtered, 2);
    assert_eq!(summary.total_edges, 2);

    // Only sources of kept edges become vertices.
    let vertices = output.vertices();
    assert_eq!(vertices.len(), 2);
    assert_eq!(vertices[&1].edges(), &[Edge::new(2, ())]);
    assert_eq!(vertices[&2].edges(), &[Edge::new(3, ())]);
}

#[test]
fn test_malformed_input() {
    let job = Job::new(Idle).with_edge_input(MemoryEdgeInput::new(vec![
        EdgeRecord::new(Some(1), Some(2), Some(())),
        EdgeRecord::new(Some(2), None, Some(())),
    ]));
    let result = job.run(&test_config(2));
    assert!(matches!(result, Err(GBError::MalformedInput(_))), "{:?}", result);
}

#[test]
fn test_missing_input() {
    let result = Job::new(Idle).run(&test_config(1));
    assert!(matches!(result, Err(GBError::Config(_))), "{:?}", result);
}

#[test]
fn test_coordinator_unavailable() {
    let coordinator = Arc::new(LocalCoordinator::default());
    coordinator.set_available(false);
    let mut config = test_config(2);
    config.coordination_retries = 2;
    config.coordination_backoff = Duration::from_millis(1);
    let (job, _) = path_graph_job();
    let result = job.run_with_coordinator(&config, coordinator);
    assert!(matches!(result, Err(GBError::CoordinationUnavailable(_))), "{:?}", result);
}

#[test]
fn test_duplicate_aggregator() {
    let (job, _) = path_graph_job();
    let job = job
        .with_aggregator(AggregatorSpec::sum_long("dup"))
        .with_aggregator(AggregatorSpec::sum_long("dup"));
    let result = job.run(&test_config(2));
    assert!(matches!(result, Err(GBError::Aggregator(_, _))), "{:?}", result);
}

#[test]
fn test_two_jobs_share_a_coordinator() {
    let coordinator = Arc::new(LocalCoordinator::default());
    for &workers in &[2, 3] {
        let (job, output) = path_graph_job();
        let summary = job
            .run_with_coordinator(&test_config(workers), coordinator.clone())
            .expect("Job failed");
        assert_eq!(summary.supersteps, 3);
        let values = output.values();
        assert!(values[&1].abs() < f64::EPSILON);
        assert!((values[&3] - 1.0).abs() < f64::EPSILON);
    }
}

#[test]
fn test_checkpoint_dir_unwritable() {
    let blocker = temp_dir("unwritable").join("blocker");
    std::fs::write(&blocker, "not a directory").expect("Could not write blocker file");
    let (job, _) = path_graph_job();
    let result = job.run(&test_config(2).with_checkpoints(blocker.join("checkpoints"), 1));
    assert!(matches!(result, Err(GBError::Checkpoint(_))), "{:?}", result);
}

/// Spreads the largest value along the edges. Panics once when `crash_at` is reached.
struct MaxValue {
    crash_at: Option<(Superstep, VertexId)>,
    crashed: AtomicBool,
}

impl MaxValue {
    fn new(crash_at: Option<(Superstep, VertexId)>) -> Self {
        Self { crash_at, crashed: AtomicBool::new(false) }
    }
}

impl ComputationTypes for MaxValue {
    type VertexValue = u64;
    type EdgeValue = ();
    type Message = u64;
}

impl VertexComputation for MaxValue {
    fn compute(
        &self,
        vertex: &mut Vertex<u64, ()>,
        messages: &[u64],
        context: &mut dyn ComputeContext<u64, ()>,
    ) {
        if self.crash_at == Some((context.superstep(), vertex.id()))
            && !self.crashed.swap(true, Ordering::SeqCst)
        {
            panic!("Simulated crash at vertex {}", vertex.id());
        }
        let max = messages.iter().copied().max().unwrap_or(0);
        if context.superstep() == 0 || max > *vertex.value() {
            vertex.set_value(max.max(*vertex.value()));
            context.send_message_to_edges(vertex.edges(), *vertex.value());
        }
        vertex.vote_to_halt();
    }
}

fn max_value_job(computation: MaxValue) -> (Job<MaxValue>, Arc<CollectedOutput<u64, ()>>) {
    // Two chains, 0 -> 1 -> ... -> 19 and 100 -> ... -> 119, with scattered values.
    let vertices = (0..20_u64).chain(100..120).map(|id| {
        let edges = if id % 100 < 19 { vec![Edge::new(id + 1, ())] } else { Vec::new() };
        (id, (id * 7) % 23, edges)
    });
    let output = Arc::new(CollectedOutput::default());
    let job = Job::new(computation)
        .with_vertex_input(MemoryVertexInput::from_vertices(vertices).with_records_per_split(7))
        .with_output(output.clone());
    (job, output)
}

#[test]
fn test_recovery_from_checkpoint() {
    let (job, output) = max_value_job(MaxValue::new(None));
    let expected = job.run(&test_config(1)).expect("Job failed");
    let expected_values = output.values();

    let dir = temp_dir("recovery");
    let config = test_config(3).with_checkpoints(&dir, 2);
    let (job, output) = max_value_job(MaxValue::new(Some((5, 8))));
    let summary = job.run(&config).expect("Job failed");
    assert_eq!(summary.recoveries, 1);
    assert_eq!(summary.supersteps, expected.supersteps);
    assert_eq!(output.values(), expected_values);
}

#[test]
fn test_checkpoint_dir_reused() {
    let (job, output) = max_value_job(MaxValue::new(None));
    job.run(&test_config(1)).expect("Job failed");
    let expected_values = output.values();

    // A finished job leaves later checkpoints with another partitioning behind.
    let dir = temp_dir("reused_checkpoints");
    let (job, _) = path_graph_job();
    job.run(&test_config(2).with_checkpoints(&dir, 1)).expect("Job failed");
    let (job, _) = max_value_job(MaxValue::new(None));
    job.run(&test_config(2).with_checkpoints(&dir, 1)).expect("Job failed");

    let (job, output) = max_value_job(MaxValue::new(Some((5, 8))));
    let summary = job.run(&test_config(3).with_checkpoints(&dir, 2)).expect("Job failed");
    assert_eq!(summary.recoveries, 1);
    assert_eq!(output.values(), expected_values);
    assert_eq!(std::fs::read_dir(&dir).expect("No checkpoint dir").count(), 3);
}

#[test]
fn test_no_checkpoint_to_recover_from() {
    let (job, _) = max_value_job(MaxValue::new(Some((1, 3))));
    let result = job.run(&test_config(2));
    assert!(matches!(result, Err(GBError::WorkerFailure(_))), "{:?}", result);
}

/// Sends itself a message every superstep and counts the supersteps in its value.
struct Ping;

impl ComputationTypes for Ping {
    type VertexValue = u64;
    type EdgeValue = ();
    type Message = u64;
}

impl VertexComputation for Ping {
    fn compute(
        &self,
        vertex: &mut Vertex<u64, ()>,
        _messages: &[u64],
        context: &mut dyn ComputeContext<u64, ()>,
    ) {
        *vertex.value_mut() += 1;
        context.aggregate("pings", AggregateValue::Long(1));
        context.send_message(vertex.id(), 1);
        vertex.vote_to_halt();
    }
}

/// Halts the job after three supersteps and doubles the ping count it saw.
struct StopAfterThree;

impl MasterCompute for StopAfterThree {
    fn compute(&self, context: &mut dyn MasterContext) {
        if context.superstep() == 3 {
            let pings = context.aggregated_value("pings").and_then(AggregateValue::as_long);
            context.set_aggregated_value("pings", AggregateValue::Long(pings.unwrap_or(0) * 2));
            context.halt_computation();
        }
    }
}

#[test]
fn test_master_compute_halts() {
    let output = Arc::new(CollectedOutput::default());
    let job = Job::new(Ping)
        .with_master_compute(StopAfterThree)
        .with_aggregator(AggregatorSpec::sum_long("pings").persistent())
        .with_vertex_input(MemoryVertexInput::from_vertices((0..10).map(|id| (id, 0, Vec::new()))))
        .with_output(output.clone());
    let summary = job.run(&test_config(2)).expect("Job failed");
    assert_eq!(summary.supersteps, 3);
    assert_eq!(summary.aggregates["pings"], AggregateValue::Long(60));
    assert!(output.values().values().all(|&value| value == 3));
}

/// Vertex 1 drops vertex 2 and links itself to 3 and 4 during superstep 0.
struct Rewire;

impl ComputationTypes for Rewire {
    type VertexValue = u64;
    type EdgeValue = ();
    type Message = u64;
}

impl VertexComputation for Rewire {
    fn compute(
        &self,
        vertex: &mut Vertex<u64, ()>,
        _messages: &[u64],
        context: &mut dyn ComputeContext<u64, ()>,
    ) {
        if context.superstep() == 0 && vertex.id() == 1 {
            context.remove_edges(1, 2);
            context.remove_vertex(2);
            context.add_edge(1, Edge::new(3, ()));
            context.add_edge(4, Edge::new(1, ()));
        }
        vertex.vote_to_halt();
    }
}

#[test]
fn test_graph_mutations() {
    let output = Arc::new(CollectedOutput::default());
    let job = Job::new(Rewire)
        .with_vertex_input(MemoryVertexInput::from_vertices(vec![
            (1, 0, vec![Edge::new(2, ())]),
            (2, 0, vec![Edge::new(3, ())]),
            (3, 0, Vec::new()),
        ]))
        .with_output(output.clone());
    let summary = job.run(&test_config(3)).expect("Job failed");
    assert_eq!(summary.total_vertices, 3);
    assert_eq!(summary.total_edges, 2);

    let vertices: HashMap<_, _> = output.vertices();
    assert!(!vertices.contains_key(&2));
    assert_eq!(vertices[&1].edges(), &[Edge::new(3, ())]);
    assert_eq!(vertices[&4].edges(), &[Edge::new(1, ())]);
}
