use crate::{AggregateValue, Edge, Superstep, VertexId};

/// What a vertex can see and do while it computes.
///
/// Every side effect (messages, aggregations, mutations) becomes visible only after the barrier
/// that ends the current superstep.
pub trait ComputeContext<M: Clone, E> {
    fn superstep(&self) -> Superstep;

    /// Number of vertices in the whole graph at the end of the previous superstep.
    fn total_vertices(&self) -> u64;

    /// Number of edges in the whole graph at the end of the previous superstep.
    fn total_edges(&self) -> u64;

    fn send_message(&mut self, target: VertexId, message: M);

    fn send_message_to_edges(&mut self, edges: &[Edge<E>], message: M) {
        for edge in edges {
            self.send_message(edge.target, message.clone());
        }
    }

    /// Merges `value` into this worker's partial value of aggregator `name`.
    fn aggregate(&mut self, name: &str, value: AggregateValue);

    /// Globally merged value of aggregator `name` from the previous superstep.
    fn aggregated_value(&self, name: &str) -> Option<&AggregateValue>;

    fn add_edge(&mut self, source: VertexId, edge: Edge<E>);

    fn remove_edges(&mut self, source: VertexId, target: VertexId);

    fn remove_vertex(&mut self, vertex_id: VertexId);
}

/// What the master compute hook can see and do between two supersteps.
pub trait MasterContext {
    /// The superstep that is about to start.
    fn superstep(&self) -> Superstep;

    fn total_vertices(&self) -> u64;

    fn total_edges(&self) -> u64;

    fn aggregated_value(&self, name: &str) -> Option<&AggregateValue>;

    /// Overrides the merged value that will be broadcast for the coming superstep.
    fn set_aggregated_value(&mut self, name: &str, value: AggregateValue);

    /// Sets aggregator `name` back to its identity value.
    fn reset_aggregator(&mut self, name: &str);

    /// Ends the job before the coming superstep starts.
    fn halt_computation(&mut self);
}
