use crate::aggregators::AggregatorSpec;
use crate::computations::{check_properties, get_property, required_property};
use crate::computations::ComputationProperties;
use crate::error::GBError;
use crate::job::Job;
use gb_api::{
    AggregateValue, ComputationTypes, ComputeContext, MasterCompute, MasterContext, SumCombiner,
    Superstep, Vertex, VertexComputation,
};

const NAME: &str = "PageRank";
const DEFAULT_DAMPING: f64 = 0.85;
/// Sum of the absolute rank changes of the last superstep.
pub const DELTA_AGGREGATOR: &str = "pagerank_delta";

const ITERATIONS: &str = "iterations";
const DAMPING: &str = "damping";
const TOLERANCE: &str = "tolerance";

/// Ranks every vertex for `iterations` supersteps after the initial one, or until the total
/// rank change drops below `tolerance`.
#[derive(Debug, Clone, new)]
pub struct PageRank {
    pub iterations: Superstep,
    pub damping: f64,
    pub tolerance: Option<f64>,
}

impl ComputationTypes for PageRank {
    type VertexValue = f64;
    type EdgeValue = ();
    type Message = f64;
}

impl PageRank {
    pub fn instance(properties: &ComputationProperties) -> Result<Self, GBError> {
        check_properties(NAME, properties, &[ITERATIONS, DAMPING, TOLERANCE])?;
        let damping = get_property(NAME, properties, DAMPING)?.unwrap_or(DEFAULT_DAMPING);
        if !(0.0..=1.0).contains(&damping) {
            return Err(GBError::Computation(format!(
                "{} damping factor {} is not in [0, 1]",
                NAME, damping
            )));
        }
        Ok(PageRank::new(
            required_property(NAME, properties, ITERATIONS)?,
            damping,
            get_property(NAME, properties, TOLERANCE)?,
        ))
    }

    pub fn into_job(self) -> Job<Self> {
        let tolerance = self.tolerance;
        let job = Job::new(self)
            .with_combiner(SumCombiner)
            .with_aggregator(AggregatorSpec::sum_double(DELTA_AGGREGATOR));
        match tolerance {
            Some(tolerance) => job.with_master_compute(Convergence { tolerance }),
            None => job,
        }
    }
}

impl VertexComputation for PageRank {
    fn compute(
        &self,
        vertex: &mut Vertex<f64, ()>,
        messages: &[f64],
        context: &mut dyn ComputeContext<f64, ()>,
    ) {
        let vertices = context.total_vertices().max(1) as f64;
        if context.superstep() == 0 {
            vertex.set_value(1.0 / vertices);
        } else {
            let incoming: f64 = messages.iter().sum();
            let rank = (1.0 - self.damping) / vertices + self.damping * incoming;
            let delta = (rank - vertex.value()).abs();
            context.aggregate(DELTA_AGGREGATOR, AggregateValue::Double(delta));
            vertex.set_value(rank);
        }

        if context.superstep() < self.iterations {
            if !vertex.edges().is_empty() {
                let share = vertex.value() / vertex.edges().len() as f64;
                context.send_message_to_edges(vertex.edges(), share);
            }
        } else {
            vertex.vote_to_halt();
        }
    }
}

/// Ends the job once the ranks of a full superstep moved less than `tolerance` in total.
struct Convergence {
    tolerance: f64,
}

impl MasterCompute for Convergence {
    fn compute(&self, context: &mut dyn MasterContext) {
        // Superstep 0 only spreads the initial ranks.
        if context.superstep() < 2 {
            return;
        }
        let delta = context.aggregated_value(DELTA_AGGREGATOR).and_then(AggregateValue::as_double);
        if let Some(delta) = delta {
            if delta < self.tolerance {
                context.halt_computation();
            }
        }
    }
}
