use crate::{Edge, Vertex, VertexId};

/// Decides, while the graph is loaded, which edges are dropped.
pub trait EdgeInputFilter<E>: Send + Sync {
    fn drop_edge(&self, source: VertexId, edge: &Edge<E>) -> bool;
}

/// Decides, while the graph is loaded, which vertices are dropped.
pub trait VertexInputFilter<V, E>: Send + Sync {
    fn drop_vertex(&self, vertex: &Vertex<V, E>) -> bool;
}

/// Keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<E> EdgeInputFilter<E> for AcceptAll {
    fn drop_edge(&self, _source: VertexId, _edge: &Edge<E>) -> bool {
        false
    }
}

impl<V, E> VertexInputFilter<V, E> for AcceptAll {
    fn drop_vertex(&self, _vertex: &Vertex<V, E>) -> bool {
        false
    }
}

impl<E, F> EdgeInputFilter<E> for F
where
    F: Fn(VertexId, &Edge<E>) -> bool + Send + Sync,
{
    fn drop_edge(&self, source: VertexId, edge: &Edge<E>) -> bool {
        self(source, edge)
    }
}

#[cfg(test)]
mod tests {
    use crate::{AcceptAll, Edge, EdgeInputFilter};

    #[test]
    fn closures_are_filters() {
        let drop_self_loops = |source: u64, edge: &Edge<()>| edge.target == source;
        assert!(drop_self_loops.drop_edge(3, &Edge::new(3, ())));
        assert!(!drop_self_loops.drop_edge(3, &Edge::new(4, ())));
        assert!(!EdgeInputFilter::<()>::drop_edge(&AcceptAll, 3, &Edge::new(3, ())));
    }
}
