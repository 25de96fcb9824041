use crate::VertexId;

/// Folds all messages sent to one vertex during a superstep into a single message.
///
/// Implementations must be associative and commutative: the message store applies `combine` in
/// whatever order messages arrive from the worker threads and the network, and the result has to
/// be the same for every order. This cannot be checked at runtime.
pub trait MessageCombiner<M>: Send + Sync {
    /// The value a vertex holds before its first message arrives.
    fn identity(&self) -> M;

    fn combine(&self, vertex_id: VertexId, existing: M, incoming: M) -> M;
}

/// Adds messages up. Integer sums wrap on overflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumCombiner;

#[derive(Debug, Clone, Copy, Default)]
pub struct MinCombiner;

#[derive(Debug, Clone, Copy, Default)]
pub struct MaxCombiner;

macro_rules! implement_combiners {
    ($($value_type:ty, $min:expr, $max:expr, $zero:expr, $add:path;)*) => (
        $(
            impl MessageCombiner<$value_type> for SumCombiner {
                fn identity(&self) -> $value_type {
                    $zero
                }

                fn combine(
                    &self,
                    _vertex_id: VertexId,
                    existing: $value_type,
                    incoming: $value_type,
                ) -> $value_type {
                    $add(existing, incoming)
                }
            }

            impl MessageCombiner<$value_type> for MinCombiner {
                fn identity(&self) -> $value_type {
                    $max
                }

                fn combine(
                    &self,
                    _vertex_id: VertexId,
                    existing: $value_type,
                    incoming: $value_type,
                ) -> $value_type {
                    if incoming < existing { incoming } else { existing }
                }
            }

            impl MessageCombiner<$value_type> for MaxCombiner {
                fn identity(&self) -> $value_type {
                    $min
                }

                fn combine(
                    &self,
                    _vertex_id: VertexId,
                    existing: $value_type,
                    incoming: $value_type,
                ) -> $value_type {
                    if incoming > existing { incoming } else { existing }
                }
            }
        )*
    )
}
implement_combiners!(
    f64, f64::NEG_INFINITY, f64::INFINITY, 0.0, std::ops::Add::add;
    f32, f32::NEG_INFINITY, f32::INFINITY, 0.0, std::ops::Add::add;
    i64, i64::MIN, i64::MAX, 0, i64::wrapping_add;
    u64, u64::MIN, u64::MAX, 0, u64::wrapping_add;
    i32, i32::MIN, i32::MAX, 0, i32::wrapping_add;
    u32, u32::MIN, u32::MAX, 0, u32::wrapping_add;
);

#[cfg(test)]
mod tests {
    use crate::{MaxCombiner, MessageCombiner, MinCombiner, SumCombiner};

    #[test]
    fn builtin_combiners() {
        let values = [4_i64, -2, 9, 0];
        let fold = |combiner: &dyn MessageCombiner<i64>| {
            values.iter().fold(combiner.identity(), |acc, &v| combiner.combine(1, acc, v))
        };
        assert_eq!(fold(&SumCombiner), 11);
        assert_eq!(fold(&MinCombiner), -2);
        assert_eq!(fold(&MaxCombiner), 9);
    }

    #[test]
    fn identity_is_neutral() {
        let combiner = MinCombiner;
        let identity: u64 = combiner.identity();
        assert_eq!(combiner.combine(3, identity, 17), 17);
    }

    #[test]
    fn integer_sums_wrap() {
        assert_eq!(SumCombiner.combine(5, u32::MAX, 3_u32), 2);
        assert_eq!(SumCombiner.combine(5, i64::MIN, -1_i64), i64::MAX);
        assert!((SumCombiner.combine(5, 0.5_f64, 0.25) - 0.75).abs() < f64::EPSILON);
    }
}
