use crate::computations::check_properties;
use crate::computations::ComputationProperties;
use crate::error::GBError;
use crate::job::Job;
use gb_api::{ComputationTypes, ComputeContext, Edge, MinCombiner, Vertex, VertexComputation};

const NAME: &str = "WCC";

/// Weakly connected components: every vertex ends with the smallest id of its component.
///
/// Superstep 0 makes the graph undirected by adding the reverse of every edge, so vertices that
/// only appear as edge targets exist from superstep 1 on.
#[derive(Debug, Clone, Default)]
pub struct Wcc;

impl ComputationTypes for Wcc {
    type VertexValue = u64;
    type EdgeValue = ();
    type Message = u64;
}

impl Wcc {
    pub fn instance(properties: &ComputationProperties) -> Result<Self, GBError> {
        check_properties(NAME, properties, &[])?;
        Ok(Wcc)
    }

    pub fn into_job(self) -> Job<Self> {
        Job::new(self).with_combiner(MinCombiner)
    }
}

impl VertexComputation for Wcc {
    fn compute(
        &self,
        vertex: &mut Vertex<u64, ()>,
        messages: &[u64],
        context: &mut dyn ComputeContext<u64, ()>,
    ) {
        match context.superstep() {
            0 => {
                for edge in vertex.edges() {
                    context.add_edge(edge.target, Edge::new(vertex.id(), ()));
                }
            }
            1 => {
                vertex.set_value(vertex.id());
                context.send_message_to_edges(vertex.edges(), vertex.id());
                vertex.vote_to_halt();
            }
            _ => {
                let smallest = messages.iter().copied().min().unwrap_or(*vertex.value());
                if smallest < *vertex.value() {
                    vertex.set_value(smallest);
                    context.send_message_to_edges(vertex.edges(), smallest);
                }
                vertex.vote_to_halt();
            }
        }
    }
}
