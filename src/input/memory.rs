use crate::error::GBError;
use crate::input::{
    EdgeInputFormat, EdgeRecord, InputSplit, RecordIterator, VertexInputFormat, VertexRecord,
};
use gb_api::{Edge, VertexId};

const DEFAULT_RECORDS_PER_SPLIT: usize = 1_000;

fn memory_splits(records: usize, per_split: usize) -> Vec<InputSplit> {
    (0..records)
        .step_by(per_split.max(1))
        .enumerate()
        .map(|(index, offset)| InputSplit::new(index, 0, offset as u64, Some(per_split as u64)))
        .collect()
}

fn split_range(split: &InputSplit, records: usize) -> std::ops::Range<usize> {
    let start = (split.offset as usize).min(records);
    let end = split.length.map_or(records, |length| (start + length as usize).min(records));
    start..end
}

/// Edges held in memory, for tests and for embedding the engine.
pub struct MemoryEdgeInput<E> {
    records: Vec<EdgeRecord<E>>,
    records_per_split: usize,
}

impl<E> MemoryEdgeInput<E> {
    pub fn new(records: Vec<EdgeRecord<E>>) -> Self {
        Self { records, records_per_split: DEFAULT_RECORDS_PER_SPLIT }
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (VertexId, VertexId, E)>) -> Self {
        Self::new(
            edges
                .into_iter()
                .map(|(source, target, value)| {
                    EdgeRecord::new(Some(source), Some(target), Some(value))
                })
                .collect(),
        )
    }

    pub fn with_records_per_split(mut self, records_per_split: usize) -> Self {
        self.records_per_split = records_per_split;
        self
    }
}

impl<E: Clone + Send + Sync + 'static> EdgeInputFormat<E> for MemoryEdgeInput<E> {
    fn splits(&self) -> Result<Vec<InputSplit>, GBError> {
        Ok(memory_splits(self.records.len(), self.records_per_split))
    }

    fn read_split<'a>(
        &'a self,
        split: &InputSplit,
    ) -> Result<RecordIterator<'a, EdgeRecord<E>>, GBError> {
        Ok(Box::new(self.records[split_range(split, self.records.len())].iter().cloned().map(Ok)))
    }
}

pub struct MemoryVertexInput<V, E> {
    records: Vec<VertexRecord<V, E>>,
    records_per_split: usize,
}

impl<V, E> MemoryVertexInput<V, E> {
    pub fn new(records: Vec<VertexRecord<V, E>>) -> Self {
        Self { records, records_per_split: DEFAULT_RECORDS_PER_SPLIT }
    }

    pub fn from_vertices(vertices: impl IntoIterator<Item = (VertexId, V, Vec<Edge<E>>)>) -> Self {
        Self::new(
            vertices
                .into_iter()
                .map(|(id, value, edges)| VertexRecord::new(Some(id), Some(value), edges))
                .collect(),
        )
    }

    pub fn with_records_per_split(mut self, records_per_split: usize) -> Self {
        self.records_per_split = records_per_split;
        self
    }
}

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> VertexInputFormat<V, E>
    for MemoryVertexInput<V, E>
{
    fn splits(&self) -> Result<Vec<InputSplit>, GBError> {
        Ok(memory_splits(self.records.len(), self.records_per_split))
    }

    fn read_split<'a>(
        &'a self,
        split: &InputSplit,
    ) -> Result<RecordIterator<'a, VertexRecord<V, E>>, GBError> {
        Ok(Box::new(self.records[split_range(split, self.records.len())].iter().cloned().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use crate::input::memory::MemoryEdgeInput;
    use crate::input::EdgeInputFormat;

    #[test]
    fn splits_cover_all_records_once() {
        let input = MemoryEdgeInput::from_edges((0..10).map(|i| (i, i + 1, ())))
            .with_records_per_split(4);
        let splits = input.splits().unwrap();
        assert_eq!(splits.len(), 3);
        let sources: Vec<_> = splits
            .iter()
            .flat_map(|split| input.read_split(split).unwrap())
            .map(|record| record.unwrap().source.unwrap())
            .collect();
        assert_eq!(sources, (0..10).collect::<Vec<_>>());
    }
}
