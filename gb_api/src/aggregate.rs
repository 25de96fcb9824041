use hashbrown::HashMap;
use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Reduction applied by an aggregator. Every operation is associative and commutative, so
/// partial values can be merged in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOperation {
    Sum,
    Min,
    Max,
    And,
    Or,
}

/// Value held by an aggregator.
///
/// The vector variants are sparse and `Sum`/`Min`/`Max` merge them element by element. An entry
/// missing on one side takes the value of the other side. Integer sums wrap on overflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateValue {
    Long(i64),
    Double(f64),
    Bool(bool),
    LongVector(HashMap<u32, i64>),
    DoubleVector(HashMap<u32, f64>),
}

impl AggregateValue {
    pub fn get_type(&self) -> &'static str {
        match self {
            AggregateValue::Long(_) => "long",
            AggregateValue::Double(_) => "double",
            AggregateValue::Bool(_) => "bool",
            AggregateValue::LongVector(_) => "long_vector",
            AggregateValue::DoubleVector(_) => "double_vector",
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        if let AggregateValue::Long(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        if let AggregateValue::Double(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let AggregateValue::Bool(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    /// Merges `other` into `self` using `operation`.
    ///
    /// Returns a description of the problem if the operation is not defined for the two values.
    pub fn merge(
        &mut self,
        operation: AggregateOperation,
        other: &AggregateValue,
    ) -> Result<(), String> {
        use AggregateOperation::{And, Max, Min, Or, Sum};
        match (self, other) {
            (AggregateValue::Long(left), AggregateValue::Long(right)) => match operation {
                Sum => *left = left.wrapping_add(*right),
                Min => *left = std::cmp::min(*left, *right),
                Max => *left = std::cmp::max(*left, *right),
                And | Or => return Err(unsupported(operation, "long")),
            },
            (AggregateValue::Double(left), AggregateValue::Double(right)) => match operation {
                Sum => *left += right,
                Min => *left = left.min(*right),
                Max => *left = left.max(*right),
                And | Or => return Err(unsupported(operation, "double")),
            },
            (AggregateValue::Bool(left), AggregateValue::Bool(right)) => match operation {
                And => *left = *left && *right,
                Or => *left = *left || *right,
                Sum | Min | Max => return Err(unsupported(operation, "bool")),
            },
            (AggregateValue::LongVector(left), AggregateValue::LongVector(right)) => {
                if let And | Or = operation {
                    return Err(unsupported(operation, "long_vector"));
                }
                // Absent entries take the incoming value as they are.
                for (&index, &value) in right {
                    left.entry(index)
                        .and_modify(|entry| {
                            *entry = match operation {
                                Min => std::cmp::min(*entry, value),
                                Max => std::cmp::max(*entry, value),
                                _ => entry.wrapping_add(value),
                            }
                        })
                        .or_insert(value);
                }
            }
            (AggregateValue::DoubleVector(left), AggregateValue::DoubleVector(right)) => {
                if let And | Or = operation {
                    return Err(unsupported(operation, "double_vector"));
                }
                for (&index, &value) in right {
                    left.entry(index)
                        .and_modify(|entry| {
                            *entry = match operation {
                                Min => entry.min(value),
                                Max => entry.max(value),
                                _ => *entry + value,
                            }
                        })
                        .or_insert(value);
                }
            }
            (left, right) => {
                return Err(format!(
                    "cannot merge '{}' into '{}'",
                    right.get_type(),
                    left.get_type()
                ));
            }
        }
        Ok(())
    }
}

fn unsupported(operation: AggregateOperation, value_type: &str) -> String {
    format!("operation {:?} is not defined for '{}' values", operation, value_type)
}

impl Display for AggregateValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AggregateValue::Long(value) => write!(f, "{}", value),
            AggregateValue::Double(value) => write!(f, "{}", value),
            AggregateValue::Bool(value) => write!(f, "{}", value),
            AggregateValue::LongVector(values) => write!(f, "{:?}", values),
            AggregateValue::DoubleVector(values) => write!(f, "{:?}", values),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{AggregateOperation, AggregateValue};
    use hashbrown::HashMap;

    #[test]
    fn scalar_merges() {
        let mut sum = AggregateValue::Double(2.0);
        sum.merge(AggregateOperation::Sum, &AggregateValue::Double(5.0)).expect("merge failed");
        assert_eq!(sum, AggregateValue::Double(7.0));

        let mut min = AggregateValue::Long(3);
        min.merge(AggregateOperation::Min, &AggregateValue::Long(-1)).expect("merge failed");
        assert_eq!(min, AggregateValue::Long(-1));

        let mut all = AggregateValue::Bool(true);
        all.merge(AggregateOperation::And, &AggregateValue::Bool(false)).expect("merge failed");
        assert_eq!(all, AggregateValue::Bool(false));
    }

    #[test]
    fn vector_sum_is_element_wise() {
        let mut left = AggregateValue::LongVector(vec![(0, 1), (3, 4)].into_iter().collect());
        let right = AggregateValue::LongVector(vec![(3, 6), (7, 2)].into_iter().collect());
        left.merge(AggregateOperation::Sum, &right).expect("merge failed");
        let expected: HashMap<u32, i64> = vec![(0, 1), (3, 10), (7, 2)].into_iter().collect();
        assert_eq!(left, AggregateValue::LongVector(expected));
    }

    #[test]
    fn vector_min_max_start_from_the_first_value() {
        let mut min = AggregateValue::LongVector(HashMap::new());
        for partial in &[vec![(3, 5)], vec![(3, 7), (4, -2)]] {
            let partial = AggregateValue::LongVector(partial.iter().copied().collect());
            min.merge(AggregateOperation::Min, &partial).expect("merge failed");
        }
        let expected: HashMap<u32, i64> = vec![(3, 5), (4, -2)].into_iter().collect();
        assert_eq!(min, AggregateValue::LongVector(expected));

        let mut max = AggregateValue::DoubleVector(HashMap::new());
        for partial in &[vec![(1, -4.0)], vec![(1, -6.5)]] {
            let partial = AggregateValue::DoubleVector(partial.iter().copied().collect());
            max.merge(AggregateOperation::Max, &partial).expect("merge failed");
        }
        let expected: HashMap<u32, f64> = vec![(1, -4.0)].into_iter().collect();
        assert_eq!(max, AggregateValue::DoubleVector(expected));
    }

    #[test]
    fn long_sum_wraps() {
        let mut sum = AggregateValue::Long(i64::MAX);
        sum.merge(AggregateOperation::Sum, &AggregateValue::Long(1)).expect("merge failed");
        assert_eq!(sum, AggregateValue::Long(i64::MIN));
    }

    #[test]
    fn mismatches_are_rejected() {
        let mut value = AggregateValue::Long(1);
        assert!(value.merge(AggregateOperation::Sum, &AggregateValue::Double(1.0)).is_err());
        assert!(value.merge(AggregateOperation::And, &AggregateValue::Long(1)).is_err());
        assert_eq!(value, AggregateValue::Long(1));
    }
}
