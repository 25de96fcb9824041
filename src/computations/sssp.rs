use crate::computations::{check_properties, required_property};
use crate::computations::ComputationProperties;
use crate::error::GBError;
use crate::input::ParseValue;
use crate::job::Job;
use crate::output::FormatValue;
use gb_api::{
    ComputationTypes, ComputeContext, MinCombiner, Vertex, VertexComputation, VertexId,
};

const NAME: &str = "SSSP";
const SOURCE: &str = "source";

/// Length of the shortest known path from the source. Unreached vertices are infinitely far.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Distance(pub f64);

impl Default for Distance {
    fn default() -> Self {
        Distance(f64::INFINITY)
    }
}

impl Distance {
    pub fn is_reached(self) -> bool {
        self.0.is_finite()
    }
}

impl ParseValue for Distance {
    fn parse_value(field: Option<&str>) -> Result<Option<Self>, String> {
        f64::parse_value(field).map(|distance| distance.map(Distance))
    }
}

impl FormatValue for Distance {
    fn format_value(&self) -> Option<String> {
        self.0.format_value()
    }
}

/// Shortest paths over non-negative `f64` edge weights from a single source vertex.
#[derive(Debug, Clone, new)]
pub struct Sssp {
    pub source: VertexId,
}

impl ComputationTypes for Sssp {
    type VertexValue = Distance;
    type EdgeValue = f64;
    type Message = f64;
}

impl Sssp {
    pub fn instance(properties: &ComputationProperties) -> Result<Self, GBError> {
        check_properties(NAME, properties, &[SOURCE])?;
        Ok(Sssp::new(required_property(NAME, properties, SOURCE)?))
    }

    pub fn into_job(self) -> Job<Self> {
        Job::new(self).with_combiner(MinCombiner)
    }
}

impl VertexComputation for Sssp {
    fn compute(
        &self,
        vertex: &mut Vertex<Distance, f64>,
        messages: &[f64],
        context: &mut dyn ComputeContext<f64, f64>,
    ) {
        let mut improved = false;
        if context.superstep() == 0 {
            let start = if vertex.id() == self.source { 0.0 } else { f64::INFINITY };
            vertex.set_value(Distance(start));
            improved = vertex.value().is_reached();
        }
        let closest = messages.iter().copied().fold(f64::INFINITY, f64::min);
        if closest < vertex.value().0 {
            vertex.set_value(Distance(closest));
            improved = true;
        }

        if improved {
            let distance = vertex.value().0;
            for edge in vertex.edges() {
                context.send_message(edge.target, distance + edge.value);
            }
        }
        vertex.vote_to_halt();
    }
}
