//! Built-in vertex computations, selectable by name.

use crate::error::GBError;
use hashbrown::HashMap;
use std::fmt::Display;
use std::str::FromStr;

pub mod builder;
pub mod pagerank;
pub mod sssp;
pub mod wcc;

#[cfg(test)]
mod tests;

/// `name=value` settings of a computation, e.g., `iterations=20`.
pub type ComputationProperties = HashMap<String, String>;

/// Parses `key=value` pairs.
pub fn parse_properties<'a>(
    pairs: impl IntoIterator<Item = &'a str>,
) -> Result<ComputationProperties, GBError> {
    pairs
        .into_iter()
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some(key), Some(value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_owned(), value.trim().to_owned()))
                }
                _ => Err(GBError::Computation(format!(
                    "Property '{}' is not of the form 'name=value'",
                    pair
                ))),
            }
        })
        .collect()
}

/// Fails on properties the computation does not know.
pub fn check_properties(
    computation: &str,
    properties: &ComputationProperties,
    known: &[&str],
) -> Result<(), GBError> {
    match properties.keys().find(|key| !known.contains(&key.as_str())) {
        Some(key) => Err(GBError::Computation(format!(
            "{} does not have a property '{}', expected one of {:?}",
            computation, key, known
        ))),
        None => Ok(()),
    }
}

pub fn get_property<T>(
    computation: &str,
    properties: &ComputationProperties,
    property: &str,
) -> Result<Option<T>, GBError>
where
    T: FromStr,
    T::Err: Display,
{
    properties
        .get(property)
        .map(|value| {
            value.parse().map_err(|e| {
                GBError::Computation(format!(
                    "{} property '{}' has invalid value '{}': {}",
                    computation, property, value, e
                ))
            })
        })
        .transpose()
}

pub fn required_property<T>(
    computation: &str,
    properties: &ComputationProperties,
    property: &str,
) -> Result<T, GBError>
where
    T: FromStr,
    T::Err: Display,
{
    get_property(computation, properties, property)?.ok_or_else(|| {
        GBError::Computation(format!(
            "{} needs property '{}' but found {:?}",
            computation,
            property,
            properties.keys().collect::<Vec<_>>()
        ))
    })
}
