use crate::error::GBError;
use crate::util::io::{create_dir_all, GbWriter};
use gb_api::{Vertex, VertexId, WorkerId};
use hashbrown::HashMap;
use log::info;
use std::path::PathBuf;
use std::sync::Mutex;

/// Receives the final vertices of every worker once the job halted. Workers call it
/// concurrently, and nothing is guaranteed about the order of vertices.
pub trait VertexOutputFormat<V, E>: Send + Sync {
    fn write_vertices(&self, worker_id: WorkerId, vertices: Vec<Vertex<V, E>>)
        -> Result<(), GBError>;
}

/// Writes `id,value,target:value;...` lines into `part-{worker}.csv` under `dir`.
pub struct TextVertexOutput {
    dir: PathBuf,
}

impl TextVertexOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn part_file(&self, worker_id: WorkerId) -> PathBuf {
        self.dir.join(format!("part-{}.csv", worker_id))
    }
}

/// Text form of a value. `None` for values that have no text, which are left out.
pub trait FormatValue {
    fn format_value(&self) -> Option<String>;
}

impl FormatValue for () {
    fn format_value(&self) -> Option<String> {
        None
    }
}

macro_rules! implement_format_value {
    ($($value_type:ty),*) => (
        $(
            impl FormatValue for $value_type {
                fn format_value(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    )
}

implement_format_value!(f64, f32, i64, u64, i32, u32, bool, String);

pub fn format_vertex<V: FormatValue, E: FormatValue>(vertex: &Vertex<V, E>) -> String {
    let edges: Vec<String> = vertex
        .edges()
        .iter()
        .map(|edge| match edge.value.format_value() {
            Some(value) => format!("{}:{}", edge.target, value),
            None => edge.target.to_string(),
        })
        .collect();
    format!(
        "{},{},{}",
        vertex.id(),
        vertex.value().format_value().unwrap_or_default(),
        edges.join(";")
    )
}

impl<V: FormatValue + Send, E: FormatValue + Send> VertexOutputFormat<V, E>
    for TextVertexOutput
{
    fn write_vertices(
        &self,
        worker_id: WorkerId,
        vertices: Vec<Vertex<V, E>>,
    ) -> Result<(), GBError> {
        create_dir_all(&self.dir)?;
        let mut writer = GbWriter::new(&self.part_file(worker_id))?;
        let count = vertices.len();
        writer.write_file_lines(vertices.iter().map(format_vertex))?;
        writer.flush()?;
        info!("Worker {} wrote {} vertices to '{}'", worker_id, count, writer.file_path());
        Ok(())
    }
}

/// Keeps the final vertices in memory.
pub struct CollectedOutput<V, E> {
    vertices: Mutex<HashMap<VertexId, Vertex<V, E>>>,
}

impl<V, E> Default for CollectedOutput<V, E> {
    fn default() -> Self {
        Self { vertices: Mutex::new(HashMap::new()) }
    }
}

impl<V: Clone, E: Clone> CollectedOutput<V, E> {
    pub fn vertices(&self) -> HashMap<VertexId, Vertex<V, E>> {
        self.vertices.lock().map(|vertices| vertices.clone()).unwrap_or_default()
    }

    pub fn values(&self) -> HashMap<VertexId, V> {
        self.vertices()
            .into_iter()
            .map(|(id, vertex)| (id, vertex.value().clone()))
            .collect()
    }
}

impl<V: Send, E: Send> VertexOutputFormat<V, E> for CollectedOutput<V, E> {
    fn write_vertices(
        &self,
        worker_id: WorkerId,
        vertices: Vec<Vertex<V, E>>,
    ) -> Result<(), GBError> {
        let mut collected = self
            .vertices
            .lock()
            .map_err(|_| GBError::Generic(format!("Output of worker {} is poisoned", worker_id)))?;
        for vertex in vertices {
            collected.insert(vertex.id(), vertex);
        }
        Ok(())
    }
}
