//! Named, globally merged reductions.
//!
//! Vertices fold values into a thread-local [`AggregatorUsage`], threads are merged into one
//! partial per worker, and the master merges the worker partials into the values every vertex
//! sees during the next superstep.

use crate::error::GBError;
use gb_api::{AggregateOperation, AggregateValue};
use hashbrown::HashMap;
use log::debug;

mod usage;

pub use usage::AggregatorUsage;

/// Merged value of every registered aggregator, keyed by name.
pub type AggregatorValues = HashMap<String, AggregateValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct AggregatorSpec {
    pub name: String,
    pub operation: AggregateOperation,
    pub identity: AggregateValue,
    /// A persistent aggregator keeps accumulating across supersteps instead of starting from its
    /// identity every superstep.
    pub persistent: bool,
}

impl AggregatorSpec {
    pub fn sum_long(name: &str) -> Self {
        Self::new(name.to_owned(), AggregateOperation::Sum, AggregateValue::Long(0), false)
    }

    pub fn sum_double(name: &str) -> Self {
        Self::new(name.to_owned(), AggregateOperation::Sum, AggregateValue::Double(0.0), false)
    }

    pub fn min_double(name: &str) -> Self {
        let identity = AggregateValue::Double(f64::INFINITY);
        Self::new(name.to_owned(), AggregateOperation::Min, identity, false)
    }

    pub fn max_double(name: &str) -> Self {
        let identity = AggregateValue::Double(f64::NEG_INFINITY);
        Self::new(name.to_owned(), AggregateOperation::Max, identity, false)
    }

    pub fn and(name: &str) -> Self {
        Self::new(name.to_owned(), AggregateOperation::And, AggregateValue::Bool(true), false)
    }

    pub fn or(name: &str) -> Self {
        Self::new(name.to_owned(), AggregateOperation::Or, AggregateValue::Bool(false), false)
    }

    pub fn sum_long_vector(name: &str) -> Self {
        let identity = AggregateValue::LongVector(HashMap::new());
        Self::new(name.to_owned(), AggregateOperation::Sum, identity, false)
    }

    pub fn sum_double_vector(name: &str) -> Self {
        let identity = AggregateValue::DoubleVector(HashMap::new());
        Self::new(name.to_owned(), AggregateOperation::Sum, identity, false)
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn merge_into(
        &self,
        target: &mut AggregateValue,
        value: &AggregateValue,
    ) -> Result<(), GBError> {
        target
            .merge(self.operation, value)
            .map_err(|message| GBError::Aggregator(self.name.clone(), message))
    }
}

/// The master's view of all aggregators: specs and the merged values of the last superstep.
#[derive(Debug, Clone)]
pub struct AggregatorRegistry {
    specs: HashMap<String, AggregatorSpec>,
    values: AggregatorValues,
}

impl AggregatorRegistry {
    pub fn new(specs: &[AggregatorSpec]) -> Result<Self, GBError> {
        let mut registry = Self { specs: HashMap::new(), values: HashMap::new() };
        for spec in specs {
            if registry.specs.contains_key(&spec.name) {
                return Err(GBError::Aggregator(
                    spec.name.clone(),
                    "registered more than once".to_owned(),
                ));
            }
            // The identity must be mergeable with itself under its operation.
            spec.merge_into(&mut spec.identity.clone(), &spec.identity)?;
            registry.values.insert(spec.name.clone(), spec.identity.clone());
            registry.specs.insert(spec.name.clone(), spec.clone());
        }
        Ok(registry)
    }

    pub fn specs(&self) -> impl Iterator<Item = &AggregatorSpec> {
        self.specs.values()
    }

    pub fn values(&self) -> &AggregatorValues {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&AggregateValue> {
        self.values.get(name)
    }

    /// Merges the partials reported by all workers for one superstep.
    ///
    /// An aggregator nobody contributed to keeps its previous value. Otherwise the new value is
    /// the merge of all contributions, on top of the previous value for persistent aggregators.
    pub fn merge_partials<'a>(
        &mut self,
        partials: impl IntoIterator<Item = &'a AggregatorValues>,
    ) -> Result<(), GBError> {
        let mut merged: AggregatorValues = HashMap::new();
        for partial in partials {
            for (name, value) in partial {
                let spec = self.spec(name)?;
                match merged.get_mut(name) {
                    Some(current) => spec.merge_into(current, value)?,
                    None => {
                        let mut current = spec.identity.clone();
                        spec.merge_into(&mut current, value)?;
                        merged.insert(name.clone(), current);
                    }
                }
            }
        }
        for (name, contribution) in merged {
            let spec = &self.specs[&name];
            if spec.persistent {
                if let Some(previous) = self.values.get_mut(&name) {
                    spec.merge_into(previous, &contribution)?;
                    continue;
                }
            }
            debug!("Aggregator '{}' = {}", name, contribution);
            self.values.insert(name, contribution);
        }
        Ok(())
    }

    /// Overrides a merged value, e.g., from master compute.
    pub fn set(&mut self, name: &str, value: AggregateValue) -> Result<(), GBError> {
        let spec = self.spec(name)?;
        if std::mem::discriminant(&spec.identity) != std::mem::discriminant(&value) {
            return Err(GBError::Aggregator(
                name.to_owned(),
                format!(
                    "cannot set a '{}' value, expected '{}'",
                    value.get_type(),
                    spec.identity.get_type()
                ),
            ));
        }
        self.values.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn reset(&mut self, name: &str) -> Result<(), GBError> {
        let identity = self.spec(name)?.identity.clone();
        self.values.insert(name.to_owned(), identity);
        Ok(())
    }

    fn spec(&self, name: &str) -> Result<&AggregatorSpec, GBError> {
        self.specs.get(name).ok_or_else(|| GBError::UnknownAggregator(name.to_owned()))
    }

    /// Replaces all merged values, e.g., with the values stored in a checkpoint.
    pub fn restore(&mut self, values: AggregatorValues) {
        self.values = values;
    }
}
