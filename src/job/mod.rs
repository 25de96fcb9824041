//! Assembling a job and running it: one thread per worker and the master on the calling thread.

use crate::aggregators::{AggregatorSpec, AggregatorValues};
use crate::config::JobConfig;
use crate::coordination::{CoordinationClient, CoordinationService, LocalCoordinator};
use crate::error::GBError;
use crate::input::loader::{LoadInputs, LoadTotals};
use crate::input::{EdgeInputFormat, VertexInputFormat};
use crate::master::Master;
use crate::messages::transport::Network;
use crate::output::VertexOutputFormat;
use crate::util::memory_usage::print_memory_usage;
use crate::util::timer::GbTimer;
use crate::worker::Worker;
use crossbeam_utils::thread;
use gb_api::{
    EdgeInputFilter, MasterCompute, MessageCombiner, Superstep, VertexComputation,
    VertexInputFilter,
};
use log::{error, info, warn};
use std::sync::Arc;

#[cfg(test)]
mod tests;

pub type VertexValue<C> = <C as gb_api::ComputationTypes>::VertexValue;
pub type EdgeValue<C> = <C as gb_api::ComputationTypes>::EdgeValue;
pub type Message<C> = <C as gb_api::ComputationTypes>::Message;

/// What a job computes: the vertex computation and everything plugged in around it.
pub struct Job<C: VertexComputation> {
    computation: C,
    combiner: Option<Arc<dyn MessageCombiner<Message<C>>>>,
    master_compute: Option<Box<dyn MasterCompute>>,
    aggregators: Vec<AggregatorSpec>,
    inputs: LoadInputs<VertexValue<C>, EdgeValue<C>>,
    output: Option<Arc<dyn VertexOutputFormat<VertexValue<C>, EdgeValue<C>>>>,
}

/// How a finished job ended.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// Number of supersteps that were computed.
    pub supersteps: Superstep,
    pub recoveries: u32,
    pub total_vertices: u64,
    pub total_edges: u64,
    pub load_totals: LoadTotals,
    /// Merged aggregator values after the last superstep.
    pub aggregates: AggregatorValues,
}

impl<C: VertexComputation> Job<C> {
    pub fn new(computation: C) -> Self {
        Self {
            computation,
            combiner: None,
            master_compute: None,
            aggregators: Vec::new(),
            inputs: LoadInputs::default(),
            output: None,
        }
    }

    pub fn with_combiner(mut self, combiner: impl MessageCombiner<Message<C>> + 'static) -> Self {
        self.combiner = Some(Arc::new(combiner));
        self
    }

    pub fn with_master_compute(mut self, master_compute: impl MasterCompute) -> Self {
        self.master_compute = Some(Box::new(master_compute));
        self
    }

    pub fn with_aggregator(mut self, spec: AggregatorSpec) -> Self {
        self.aggregators.push(spec);
        self
    }

    pub fn with_vertex_input(
        mut self,
        input: impl VertexInputFormat<VertexValue<C>, EdgeValue<C>> + 'static,
    ) -> Self {
        self.inputs.vertex_input = Some(Arc::new(input));
        self
    }

    pub fn with_edge_input(mut self, input: impl EdgeInputFormat<EdgeValue<C>> + 'static) -> Self {
        self.inputs.edge_input = Some(Arc::new(input));
        self
    }

    pub fn with_vertex_filter(
        mut self,
        filter: impl VertexInputFilter<VertexValue<C>, EdgeValue<C>> + 'static,
    ) -> Self {
        self.inputs.vertex_filter = Arc::new(filter);
        self
    }

    pub fn with_edge_filter(
        mut self,
        filter: impl EdgeInputFilter<EdgeValue<C>> + 'static,
    ) -> Self {
        self.inputs.edge_filter = Arc::new(filter);
        self
    }

    pub fn with_output(
        mut self,
        output: Arc<dyn VertexOutputFormat<VertexValue<C>, EdgeValue<C>>>,
    ) -> Self {
        self.output = Some(output);
        self
    }

    pub fn computation(&self) -> &C {
        &self.computation
    }

    pub fn combiner(&self) -> Option<Arc<dyn MessageCombiner<Message<C>>>> {
        self.combiner.clone()
    }

    pub fn master_compute(&self) -> Option<&dyn MasterCompute> {
        self.master_compute.as_deref()
    }

    pub fn aggregators(&self) -> &[AggregatorSpec] {
        &self.aggregators
    }

    pub fn inputs(&self) -> &LoadInputs<VertexValue<C>, EdgeValue<C>> {
        &self.inputs
    }

    pub fn output(&self) -> Option<&dyn VertexOutputFormat<VertexValue<C>, EdgeValue<C>>> {
        self.output.as_deref()
    }

    /// Runs the job on an in-process coordination service.
    pub fn run(&self, config: &JobConfig) -> Result<JobSummary, GBError> {
        self.run_with_coordinator(config, Arc::new(LocalCoordinator::default()))
    }

    /// Runs the job with `config.workers` worker threads that talk to each other only through
    /// the network and `coordinator`. Returns the first fatal error of the job.
    pub fn run_with_coordinator(
        &self,
        config: &JobConfig,
        coordinator: Arc<dyn CoordinationService>,
    ) -> Result<JobSummary, GBError> {
        config.validate()?;
        let timer = GbTimer::now();
        let job_id = format!("{:016x}", rand::random::<u64>());
        info!(
            "Running job {} with {} workers, {} partitions and {} compute threads per worker",
            job_id,
            config.workers,
            config.partition_count(),
            config.compute_threads
        );
        let config = &config.for_job(&job_id);
        let client = CoordinationClient::new(coordinator, config).for_job(&job_id);
        let master = Master::new(self, config, client.clone())?;
        let endpoints = Network::connect(config.workers);

        let result = thread::scope(|s| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|endpoint| {
                    let worker_id = endpoint.worker_id();
                    let client = client.clone();
                    let handle = s
                        .builder()
                        .name(format!("worker-{}", worker_id))
                        .spawn(move |_| Worker::new(self, config, client, endpoint).run());
                    (worker_id, handle)
                })
                .collect();

            let result = master.run();

            for (worker_id, handle) in handles {
                match handle {
                    Ok(handle) => match handle.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("Worker {} stopped with an error: {}", worker_id, e),
                        Err(_) => warn!("Worker {} crashed", worker_id),
                    },
                    Err(e) => error!("Could not start worker {}: {}", worker_id, e),
                }
            }
            result
        })
        .expect("Error ending job scope");

        match &result {
            Ok(summary) => info!(
                "Job finished after {} supersteps and {} recoveries in {}",
                summary.supersteps,
                summary.recoveries,
                timer.elapsed().to_seconds_string()
            ),
            Err(e) => error!("Job failed after {}: {}", timer.elapsed().to_seconds_string(), e),
        }
        print_memory_usage(format_args!("job finished"));
        result
    }
}
