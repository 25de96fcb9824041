use crate::computations::pagerank::PageRank;
use crate::computations::{sssp::Sssp, wcc::Wcc};
use crate::computations::ComputationProperties;
use crate::config::JobConfig;
use crate::error::GBError;
use crate::input::text::{TextEdgeInput, TextSource, TextVertexInput};
use crate::input::ParseValue;
use crate::job::{EdgeValue, Job, JobSummary, VertexValue};
use crate::output::{FormatValue, TextVertexOutput};
use gb_api::VertexComputation;
use hashbrown::HashMap;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

pub trait ComputationBuilder {
    fn execute(
        &self,
        properties: &ComputationProperties,
        run: &ComputationRun,
    ) -> Result<JobSummary, GBError>;
}

/// Files and settings of one run of a named computation.
#[derive(Debug, Clone, new)]
pub struct ComputationRun {
    pub vertex_files: Vec<PathBuf>,
    pub edge_files: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub records_per_split: Option<u64>,
    pub config: JobConfig,
}

impl ComputationRun {
    pub fn execute<C>(&self, mut job: Job<C>) -> Result<JobSummary, GBError>
    where
        C: VertexComputation,
        VertexValue<C>: ParseValue + FormatValue,
        EdgeValue<C>: ParseValue + FormatValue,
    {
        if !self.vertex_files.is_empty() {
            job = job.with_vertex_input(TextVertexInput::new(self.source(&self.vertex_files)));
        }
        if !self.edge_files.is_empty() {
            job = job.with_edge_input(TextEdgeInput::new(self.source(&self.edge_files)));
        }
        if let Some(dir) = &self.output_dir {
            info!("Writing results to '{}'", dir.display());
            job = job.with_output(Arc::new(TextVertexOutput::new(dir.clone())));
        }
        job.run(&self.config)
    }

    fn source(&self, files: &[PathBuf]) -> TextSource {
        let source = TextSource::new(files.to_vec());
        match self.records_per_split {
            Some(records) => source.with_records_per_split(records),
            None => source,
        }
    }
}

macro_rules! create_builder {
    ($builder:ident, $name:ident) => {
        pub struct $builder;

        impl ComputationBuilder for $builder {
            fn execute(
                &self,
                properties: &ComputationProperties,
                run: &ComputationRun,
            ) -> Result<JobSummary, GBError> {
                run.execute($name::instance(properties)?.into_job())
            }
        }
    };
}

create_builder!(PageRankBuilder, PageRank);
create_builder!(SsspBuilder, Sssp);
create_builder!(WccBuilder, Wcc);

pub fn initialize_computations(computations: &mut HashMap<String, Box<dyn ComputationBuilder>>) {
    computations.insert(String::from("pagerank"), Box::new(PageRankBuilder));
    computations.insert(String::from("sssp"), Box::new(SsspBuilder));
    computations.insert(String::from("wcc"), Box::new(WccBuilder));
}
