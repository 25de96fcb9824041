use crate::error::{deserialize_error, serialize_error, GBError};
use crate::partition::Partition;
use gb_api::{GraphValue, PartitionId, Vertex};
use std::io::{Read, Write};

/// Writes the partition id, the vertex count and then every vertex with its value, halt flag and
/// edges.
pub fn write_partition<V: GraphValue + Default, E: GraphValue>(
    writer: &mut impl Write,
    partition: &Partition<V, E>,
) -> Result<(), GBError> {
    let name = format!("partition {}", partition.id());
    bincode::serialize_into(&mut *writer, &partition.id()).map_err(|e| serialize_error(&name, e))?;
    bincode::serialize_into(&mut *writer, &partition.vertex_count())
        .map_err(|e| serialize_error(&name, e))?;
    for vertex in partition.vertices() {
        bincode::serialize_into(&mut *writer, vertex).map_err(|e| serialize_error(&name, e))?;
    }
    Ok(())
}

/// Reads back a partition written by `write_partition`.
pub fn read_partition<V: GraphValue + Default, E: GraphValue>(
    reader: &mut impl Read,
) -> Result<Partition<V, E>, GBError> {
    let partition_id: PartitionId =
        bincode::deserialize_from(&mut *reader).map_err(|e| deserialize_error("partition", e))?;
    let name = format!("partition {}", partition_id);
    let vertex_count: u64 =
        bincode::deserialize_from(&mut *reader).map_err(|e| deserialize_error(&name, e))?;
    let mut partition = Partition::new(partition_id);
    for _ in 0..vertex_count {
        let vertex: Vertex<V, E> =
            bincode::deserialize_from(&mut *reader).map_err(|e| deserialize_error(&name, e))?;
        partition.add_vertex(vertex);
    }
    Ok(partition)
}

/// Encodes a partition for a transfer to another worker.
pub fn partition_to_bytes<V: GraphValue + Default, E: GraphValue>(
    partition: &Partition<V, E>,
) -> Result<Vec<u8>, GBError> {
    let mut bytes = Vec::new();
    write_partition(&mut bytes, partition)?;
    Ok(bytes)
}

pub fn partition_from_bytes<V: GraphValue + Default, E: GraphValue>(
    bytes: &[u8],
) -> Result<Partition<V, E>, GBError> {
    read_partition(&mut &bytes[..])
}

#[cfg(test)]
mod tests {
    use crate::partition::serde::{
        partition_from_bytes, partition_to_bytes, read_partition, write_partition,
    };
    use crate::partition::Partition;
    use gb_api::{Edge, Vertex};

    #[test]
    fn partition_round_trip() {
        let mut partition: Partition<f64, u32> = Partition::new(3);
        partition.add_vertex(Vertex::new(1, 0.25, vec![Edge::new(2, 7), Edge::new(9, 1)]));
        partition.add_vertex(Vertex::new(2, -1.5, Vec::new()));
        partition.get_or_create(11).vote_to_halt();

        let mut bytes = Vec::new();
        write_partition(&mut bytes, &partition).unwrap();
        let read: Partition<f64, u32> = read_partition(&mut &bytes[..]).unwrap();
        assert_eq!(read, partition);
        assert!(read.get(11).unwrap().is_halted());

        let transferred: Partition<f64, u32> =
            partition_from_bytes(&partition_to_bytes(&partition).unwrap()).unwrap();
        assert_eq!(transferred, partition);
    }

    #[test]
    fn truncated_partition_fails() {
        let mut partition: Partition<u64, ()> = Partition::new(0);
        partition.add_vertex(Vertex::new(1, 5, vec![Edge::new(2, ())]));
        let bytes = partition_to_bytes(&partition).unwrap();
        assert!(partition_from_bytes::<u64, ()>(&bytes[..bytes.len() - 1]).is_err());
    }
}
