//! Input formats and the split loader that streams them into the workers.

use crate::error::GBError;
use gb_api::{Edge, Vertex, VertexId};

pub mod loader;
pub mod memory;
pub mod text;

/// A disjoint, independently readable range of an input. `source` selects a file or a buffer of
/// the format, `offset`/`length` select a range of records inside of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct InputSplit {
    pub index: usize,
    pub source: usize,
    pub offset: u64,
    pub length: Option<u64>,
}

pub type RecordIterator<'a, R> = Box<dyn Iterator<Item = Result<R, GBError>> + 'a>;

/// One vertex as read from the input. Missing fields stay `None` so that the loader can reject
/// the record.
#[derive(Debug, Clone, PartialEq, new)]
pub struct VertexRecord<V, E> {
    pub id: Option<VertexId>,
    pub value: Option<V>,
    pub edges: Vec<Edge<E>>,
}

impl<V, E> VertexRecord<V, E> {
    pub fn into_vertex(self) -> Result<Vertex<V, E>, String> {
        let id = self.id.ok_or_else(|| "vertex without an id".to_owned())?;
        let value = self.value.ok_or_else(|| format!("vertex {} without a value", id))?;
        Ok(Vertex::new(id, value, self.edges))
    }
}

/// One edge as read from the input.
#[derive(Debug, Clone, PartialEq, new)]
pub struct EdgeRecord<E> {
    pub source: Option<VertexId>,
    pub target: Option<VertexId>,
    pub value: Option<E>,
}

impl<E> EdgeRecord<E> {
    pub fn into_edge(self) -> Result<(VertexId, Edge<E>), String> {
        let source = self.source.ok_or_else(|| "edge without a source vertex id".to_owned())?;
        let target = self
            .target
            .ok_or_else(|| format!("edge from {} without a target vertex id", source))?;
        let value =
            self.value.ok_or_else(|| format!("edge {} -> {} without a value", source, target))?;
        Ok((source, Edge::new(target, value)))
    }
}

pub trait VertexInputFormat<V, E>: Send + Sync {
    fn splits(&self) -> Result<Vec<InputSplit>, GBError>;

    fn read_split<'a>(
        &'a self,
        split: &InputSplit,
    ) -> Result<RecordIterator<'a, VertexRecord<V, E>>, GBError>;
}

pub trait EdgeInputFormat<E>: Send + Sync {
    fn splits(&self) -> Result<Vec<InputSplit>, GBError>;

    fn read_split<'a>(&'a self, split: &InputSplit)
        -> Result<RecordIterator<'a, EdgeRecord<E>>, GBError>;
}

/// Parses a value from an optional text field. `Ok(None)` means the value is missing.
pub trait ParseValue: Sized {
    fn parse_value(field: Option<&str>) -> Result<Option<Self>, String>;
}

impl ParseValue for () {
    fn parse_value(_field: Option<&str>) -> Result<Option<Self>, String> {
        Ok(Some(()))
    }
}

impl ParseValue for String {
    fn parse_value(field: Option<&str>) -> Result<Option<Self>, String> {
        Ok(field.map(str::to_owned))
    }
}

macro_rules! implement_parse_value {
    ($($value_type:ty),*) => (
        $(
            impl ParseValue for $value_type {
                fn parse_value(field: Option<&str>) -> Result<Option<Self>, String> {
                    match field.map(str::trim) {
                        None | Some("") => Ok(None),
                        Some(text) => text.parse().map(Some).map_err(|e| {
                            format!(
                                "could not parse '{}' as {}: {}",
                                text,
                                stringify!($value_type),
                                e
                            )
                        }),
                    }
                }
            }
        )*
    )
}

implement_parse_value!(f64, f32, i64, u64, i32, u32, bool);

#[cfg(test)]
mod tests {
    use crate::input::{EdgeRecord, ParseValue, VertexRecord};
    use gb_api::Edge;

    #[test]
    fn parse_values() {
        assert_eq!(f64::parse_value(Some(" 1.5")), Ok(Some(1.5)));
        assert_eq!(u64::parse_value(Some("")), Ok(None));
        assert_eq!(u64::parse_value(None), Ok(None));
        assert!(u64::parse_value(Some("x")).is_err());
        assert_eq!(<()>::parse_value(None), Ok(Some(())));
    }

    #[test]
    fn incomplete_records_are_rejected() {
        let record: EdgeRecord<f64> = EdgeRecord::new(Some(1), None, Some(1.0));
        assert_eq!(
            record.into_edge(),
            Err("edge from 1 without a target vertex id".to_owned())
        );
        let record: EdgeRecord<f64> = EdgeRecord::new(Some(1), Some(2), None);
        assert!(record.into_edge().is_err());
        let record: EdgeRecord<()> = EdgeRecord::new(Some(1), Some(2), Some(()));
        assert_eq!(record.into_edge(), Ok((1, Edge::new(2, ()))));

        let record: VertexRecord<f64, ()> = VertexRecord::new(None, Some(1.0), Vec::new());
        assert!(record.into_vertex().is_err());
    }
}
