use crate::aggregators::{AggregatorSpec, AggregatorValues};
use crate::error::GBError;
use gb_api::AggregateValue;
use hashbrown::HashMap;
use std::sync::Arc;

/// Partial aggregator values of one compute thread or one worker for the current superstep.
///
/// Only aggregators that received a contribution have an entry, which is what lets the master
/// keep the previous value of aggregators nobody touched.
#[derive(Debug, Clone)]
pub struct AggregatorUsage {
    specs: Arc<HashMap<String, AggregatorSpec>>,
    partials: AggregatorValues,
    // The first failed aggregation; compute cannot return errors, so it is reported at the end.
    error: Option<GBError>,
}

impl AggregatorUsage {
    pub fn new(specs: Arc<HashMap<String, AggregatorSpec>>) -> Self {
        Self { specs, partials: HashMap::new(), error: None }
    }

    pub fn specs_by_name(specs: &[AggregatorSpec]) -> Arc<HashMap<String, AggregatorSpec>> {
        Arc::new(specs.iter().map(|spec| (spec.name.clone(), spec.clone())).collect())
    }

    /// A fresh, empty usage over the same aggregators.
    pub fn fresh(&self) -> Self {
        Self::new(Arc::clone(&self.specs))
    }

    pub fn aggregate(&mut self, name: &str, value: &AggregateValue) {
        if let Err(e) = self.try_aggregate(name, value) {
            self.error.get_or_insert(e);
        }
    }

    fn try_aggregate(&mut self, name: &str, value: &AggregateValue) -> Result<(), GBError> {
        let spec =
            self.specs.get(name).ok_or_else(|| GBError::UnknownAggregator(name.to_owned()))?;
        match self.partials.get_mut(name) {
            Some(partial) => spec.merge_into(partial, value),
            None => {
                let mut partial = spec.identity.clone();
                spec.merge_into(&mut partial, value)?;
                self.partials.insert(name.to_owned(), partial);
                Ok(())
            }
        }
    }

    /// Folds the partials of another thread into this one.
    pub fn merge_from(&mut self, other: AggregatorUsage) {
        if let Some(e) = other.error {
            self.error.get_or_insert(e);
        }
        for (name, value) in &other.partials {
            self.aggregate(name, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    pub fn into_partials(self) -> Result<AggregatorValues, GBError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.partials),
        }
    }
}
