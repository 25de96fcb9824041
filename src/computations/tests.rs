use crate::computations::builder::{initialize_computations, ComputationBuilder, ComputationRun};
use crate::computations::pagerank::PageRank;
use crate::computations::sssp::{Distance, Sssp};
use crate::computations::wcc::Wcc;
use crate::computations::{parse_properties, ComputationProperties};
use crate::config::JobConfig;
use crate::error::GBError;
use crate::input::memory::MemoryEdgeInput;
use crate::output::CollectedOutput;
use crate::util::io::tests::temp_dir;
use gb_api::VertexId;
use hashbrown::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn test_config(workers: usize) -> JobConfig {
    JobConfig::default()
        .with_workers(workers)
        .with_compute_threads(2)
        .with_worker_timeout(Duration::from_secs(20))
}

fn properties(pairs: &[&str]) -> ComputationProperties {
    parse_properties(pairs.iter().copied()).expect("Invalid properties")
}

const RANK_EDGES: [(VertexId, VertexId); 7] =
    [(1, 2), (1, 3), (2, 3), (3, 1), (4, 1), (4, 3), (5, 4)];

fn run_pagerank(workers: usize, pagerank: PageRank) -> (u64, HashMap<VertexId, f64>) {
    let output = Arc::new(CollectedOutput::default());
    let summary = pagerank
        .into_job()
        .with_edge_input(MemoryEdgeInput::from_edges(
            RANK_EDGES.iter().map(|&(source, target)| (source, target, ())),
        ))
        .with_output(output.clone())
        .run(&test_config(workers))
        .expect("PageRank failed");
    (summary.supersteps, output.values())
}

#[test]
fn test_pagerank() {
    let (supersteps, expected) = run_pagerank(1, PageRank::new(20, 0.85, None));
    assert_eq!(supersteps, 21);
    assert_eq!(expected.len(), 5);
    let total: f64 = expected.values().sum();
    assert!((total - 1.0).abs() < 1e-9, "ranks add up to {}", total);
    assert!(expected[&3] > expected[&2]);
    assert!(expected[&5] < expected[&4]);

    let (supersteps, ranks) = run_pagerank(3, PageRank::new(20, 0.85, None));
    assert_eq!(supersteps, 21);
    for (id, rank) in &expected {
        assert!((ranks[id] - rank).abs() < 1e-9, "vertex {}: {} != {}", id, ranks[id], rank);
    }
}

#[test]
fn test_pagerank_converges_early() {
    let (supersteps, ranks) = run_pagerank(2, PageRank::new(200, 0.85, Some(1e-6)));
    assert!(supersteps < 201, "ran for {} supersteps", supersteps);
    let (_, expected) = run_pagerank(1, PageRank::new(200, 0.85, None));
    for (id, rank) in &expected {
        assert!((ranks[id] - rank).abs() < 1e-4);
    }
}

#[test]
fn test_sssp() {
    let output = Arc::new(CollectedOutput::default());
    let summary = Sssp::new(1)
        .into_job()
        .with_edge_input(MemoryEdgeInput::from_edges(vec![
            (1, 2, 1.0),
            (1, 3, 4.0),
            (2, 3, 2.0),
            (3, 4, 1.0),
            (5, 1, 1.0),
        ]))
        .with_output(output.clone())
        .run(&test_config(2))
        .expect("SSSP failed");
    assert_eq!(summary.recoveries, 0);

    let distances = output.values();
    assert_eq!(distances[&1], Distance(0.0));
    assert_eq!(distances[&2], Distance(1.0));
    assert_eq!(distances[&3], Distance(3.0));
    assert_eq!(distances[&4], Distance(4.0));
    assert!(!distances[&5].is_reached());
}

#[test]
fn test_wcc() {
    let output = Arc::new(CollectedOutput::default());
    Wcc.into_job()
        .with_edge_input(MemoryEdgeInput::from_edges(vec![
            (1, 2, ()),
            (3, 2, ()),
            (7, 5, ()),
            (5, 4, ()),
            (6, 6, ()),
        ]))
        .with_output(output.clone())
        .run(&test_config(3))
        .expect("WCC failed");

    let mut components = output.values().into_iter().collect::<Vec<_>>();
    components.sort_unstable();
    assert_eq!(components, vec![(1, 1), (2, 1), (3, 1), (4, 4), (5, 4), (6, 6), (7, 4)]);
}

#[test]
fn test_computation_properties() {
    let pagerank = PageRank::instance(&properties(&["iterations=5", "damping = 0.5"]))
        .expect("Valid PageRank properties");
    assert_eq!(pagerank.iterations, 5);
    assert!((pagerank.damping - 0.5).abs() < f64::EPSILON);
    assert_eq!(pagerank.tolerance, None);

    assert!(matches!(
        PageRank::instance(&properties(&["damping=0.5"])),
        Err(GBError::Computation(_))
    ));
    assert!(matches!(
        PageRank::instance(&properties(&["iterations=5", "damping=2"])),
        Err(GBError::Computation(_))
    ));
    assert!(matches!(
        Sssp::instance(&properties(&["source=x"])),
        Err(GBError::Computation(_))
    ));
    assert!(matches!(Wcc::instance(&properties(&["source=1"])), Err(GBError::Computation(_))));
    assert!(parse_properties(vec!["iterations"]).is_err());
    assert!(parse_properties(vec!["=3"]).is_err());
}

#[test]
fn test_wcc_from_files() {
    let dir = temp_dir("wcc_files");
    let edges = dir.join("edges.csv");
    std::fs::write(&edges, "# source,target\n1,2\n2,3\n10,11\n").expect("Could not write edges");
    let output_dir = dir.join("output");

    let mut computations: HashMap<String, Box<dyn ComputationBuilder>> = HashMap::new();
    initialize_computations(&mut computations);
    assert!(computations.contains_key("pagerank"));
    assert!(computations.contains_key("sssp"));

    let run = ComputationRun::new(
        Vec::new(),
        vec![edges],
        Some(output_dir.clone()),
        Some(2),
        test_config(2),
    );
    let summary = computations["wcc"].execute(&ComputationProperties::new(), &run).expect("WCC");
    assert_eq!(summary.load_totals.edges_loaded, 3);

    let mut components = Vec::new();
    for entry in std::fs::read_dir(&output_dir).expect("No output") {
        let text = std::fs::read_to_string(entry.expect("No entry").path()).expect("Unreadable");
        for line in text.lines() {
            let fields: Vec<&str> = line.split(',').collect();
            components.push((fields[0].to_owned(), fields[1].to_owned()));
        }
    }
    components.sort_unstable();
    let expected: Vec<(String, String)> =
        vec![("1", "1"), ("10", "10"), ("11", "10"), ("2", "1"), ("3", "1")]
            .into_iter()
            .map(|(id, component)| (id.to_owned(), component.to_owned()))
            .collect();
    assert_eq!(components, expected);
}
