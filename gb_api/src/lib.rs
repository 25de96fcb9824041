mod aggregate;
mod combiner;
mod context;
mod filter;
mod vertex;

// Public exports from root of the crate.
pub use aggregate::{AggregateOperation, AggregateValue};
pub use combiner::{MaxCombiner, MessageCombiner, MinCombiner, SumCombiner};
pub use context::{ComputeContext, MasterContext};
pub use filter::{AcceptAll, EdgeInputFilter, VertexInputFilter};
pub use vertex::{Edge, Vertex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

// Universally used types.
pub type VertexId = u64;
pub type PartitionId = u32;
pub type WorkerId = u32;
pub type Superstep = u64;

/// Bounds shared by every value that lives in a vertex, on an edge or inside a message.
///
/// Values cross thread and process boundaries (message batches, partition transfers and
/// checkpoints), so they must be sendable and must round-trip exactly through serde.
pub trait GraphValue: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> GraphValue for T where
    T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// This trait is used to define the value types a computation works with.
///
/// # Examples
/// ```notest
/// impl ComputationTypes for PageRank {
///     type VertexValue = f64;
///     type EdgeValue = ();
///     type Message = f64;
/// }
/// ```
pub trait ComputationTypes {
    /// Per-vertex state. `Default` is used for vertices that are created implicitly, e.g.,
    /// by an edge whose source was never loaded or by a message sent to an unknown id.
    type VertexValue: GraphValue + Default;
    /// Value carried by every outgoing edge.
    type EdgeValue: GraphValue;
    /// Payload of the messages exchanged between supersteps.
    type Message: GraphValue;
}

/// The primary trait of the programming interface: the per-vertex step of a superstep.
///
/// `compute` is invoked once per superstep for every vertex that is either active or has
/// received messages. `messages` holds exactly what was sent to the vertex during the previous
/// superstep (a single combined value if the job has a combiner). Messages sent through the
/// `context` become visible to their destinations in the next superstep.
pub trait VertexComputation: ComputationTypes + Send + Sync + 'static {
    fn compute(
        &self,
        vertex: &mut Vertex<Self::VertexValue, Self::EdgeValue>,
        messages: &[Self::Message],
        context: &mut dyn ComputeContext<Self::Message, Self::EdgeValue>,
    );
}

/// Centralized hook that runs on the master before every superstep, after the aggregators of
/// the previous superstep have been merged.
pub trait MasterCompute: Send + Sync + 'static {
    fn compute(&self, context: &mut dyn MasterContext);
}
