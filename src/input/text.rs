//! Delimited text inputs.
//!
//! Edge lines are `source,target[,value]`. Vertex lines are `id[,value[,edges]]` where `edges`
//! is a `;`-separated list of `target[:value]`, the same layout the text output writes.

use crate::error::GBError;
use crate::input::{
    EdgeInputFormat, EdgeRecord, InputSplit, ParseValue, RecordIterator, VertexInputFormat,
    VertexRecord,
};
use crate::util::io::get_buf_reader;
use csv::{Reader, StringRecord};
use gb_api::{Edge, VertexId};
use std::fs::File;
use std::io::BufReader;
use std::marker::PhantomData;
use std::path::PathBuf;

pub const DEFAULT_SEPARATOR: u8 = b',';
const EDGE_LIST_SEPARATOR: char = ';';
const EDGE_VALUE_SEPARATOR: char = ':';

/// Where and how text records are read. One split per file unless `records_per_split` is set.
#[derive(Debug, Clone)]
pub struct TextSource {
    pub files: Vec<PathBuf>,
    pub separator: u8,
    pub has_headers: bool,
    pub comment_char: Option<u8>,
    pub records_per_split: Option<u64>,
}

impl TextSource {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            separator: DEFAULT_SEPARATOR,
            has_headers: false,
            comment_char: Some(b'#'),
            records_per_split: None,
        }
    }

    pub fn with_records_per_split(mut self, records: u64) -> Self {
        self.records_per_split = Some(records);
        self
    }

    fn get_csv_reader(&self, source: usize) -> Result<Reader<BufReader<File>>, GBError> {
        let file = self
            .files
            .get(source)
            .ok_or_else(|| GBError::Config(format!("No input file {}", source)))?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(self.has_headers)
            .delimiter(self.separator)
            .double_quote(false)
            .flexible(true)
            .comment(self.comment_char)
            .from_reader(get_buf_reader(file)?))
    }

    fn splits(&self) -> Result<Vec<InputSplit>, GBError> {
        let mut splits = Vec::new();
        for source in 0..self.files.len() {
            match self.records_per_split {
                Some(per_split) if per_split > 0 => {
                    let records = self.get_csv_reader(source)?.records().count() as u64;
                    let mut offset = 0;
                    while offset < records {
                        let index = splits.len();
                        splits.push(InputSplit::new(index, source, offset, Some(per_split)));
                        offset += per_split;
                    }
                }
                _ => splits.push(InputSplit::new(splits.len(), source, 0, None)),
            }
        }
        Ok(splits)
    }

    fn records<'a>(
        &'a self,
        split: &InputSplit,
    ) -> Result<impl Iterator<Item = Result<StringRecord, GBError>> + 'a, GBError> {
        let file = self.files.get(split.source).map(|f| f.display().to_string());
        let file = file.unwrap_or_default();
        let records = self
            .get_csv_reader(split.source)?
            .into_records()
            .skip(split.offset as usize)
            .take(split.length.map_or(usize::MAX, |length| length as usize))
            .map(move |record| {
                record.map_err(|e| {
                    if e.is_io_error() {
                        GBError::ReadFile(file.clone(), e.to_string())
                    } else {
                        GBError::MalformedInput(format!("Could not read '{}': {}", file, e))
                    }
                })
            });
        Ok(records)
    }
}

fn parse_id(field: Option<&str>) -> Result<Option<VertexId>, GBError> {
    u64::parse_value(field).map_err(GBError::MalformedInput)
}

fn parse<T: ParseValue>(field: Option<&str>) -> Result<Option<T>, GBError> {
    T::parse_value(field).map_err(GBError::MalformedInput)
}

fn parse_edge_list<E: ParseValue>(field: Option<&str>) -> Result<Vec<Edge<E>>, GBError> {
    let field = match field.map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(field) => field,
    };
    field
        .split(EDGE_LIST_SEPARATOR)
        .map(|item| {
            let mut parts = item.splitn(2, EDGE_VALUE_SEPARATOR);
            let target = parse_id(parts.next())?.ok_or_else(|| {
                GBError::MalformedInput(format!("Edge '{}' without a target vertex id", item))
            })?;
            let value = parse(parts.next())?.ok_or_else(|| {
                GBError::MalformedInput(format!("Edge '{}' without a value", item))
            })?;
            Ok(Edge::new(target, value))
        })
        .collect()
}

pub struct TextEdgeInput<E> {
    source: TextSource,
    value_type: PhantomData<fn() -> E>,
}

impl<E> TextEdgeInput<E> {
    pub fn new(source: TextSource) -> Self {
        Self { source, value_type: PhantomData }
    }
}

impl<E: ParseValue + 'static> EdgeInputFormat<E> for TextEdgeInput<E> {
    fn splits(&self) -> Result<Vec<InputSplit>, GBError> {
        self.source.splits()
    }

    fn read_split<'a>(
        &'a self,
        split: &InputSplit,
    ) -> Result<RecordIterator<'a, EdgeRecord<E>>, GBError> {
        Ok(Box::new(self.source.records(split)?.map(|record| {
            let record = record?;
            Ok(EdgeRecord::new(
                parse_id(record.get(0))?,
                parse_id(record.get(1))?,
                parse(record.get(2))?,
            ))
        })))
    }
}

pub struct TextVertexInput<V, E> {
    source: TextSource,
    value_types: PhantomData<fn() -> (V, E)>,
}

impl<V, E> TextVertexInput<V, E> {
    pub fn new(source: TextSource) -> Self {
        Self { source, value_types: PhantomData }
    }
}

impl<V: ParseValue + 'static, E: ParseValue + 'static> VertexInputFormat<V, E>
    for TextVertexInput<V, E>
{
    fn splits(&self) -> Result<Vec<InputSplit>, GBError> {
        self.source.splits()
    }

    fn read_split<'a>(
        &'a self,
        split: &InputSplit,
    ) -> Result<RecordIterator<'a, VertexRecord<V, E>>, GBError> {
        Ok(Box::new(self.source.records(split)?.map(|record| {
            let record = record?;
            Ok(VertexRecord::new(
                parse_id(record.get(0))?,
                parse(record.get(1))?,
                parse_edge_list(record.get(2))?,
            ))
        })))
    }
}
