//! Variable-value container consumed by factors.
//!
//! The external solver owns the authoritative estimates; this module defines
//! the container type so that factors can be evaluated against it. Keys are
//! opaque: a factor only ever queries the keys it was constructed with, and a
//! missing key is a fatal [`FactorError::UnknownKey`] for that evaluation.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::error::{FactorError, FactorResult};
use crate::manifold::se3::SE3;

/// Opaque variable identifier.
pub type Key = u64;

/// Renders a key for human-readable factor printouts.
pub type KeyFormatter = fn(Key) -> String;

/// Default key rendering: the bare number.
pub fn default_key_formatter(key: Key) -> String {
    format!("{key}")
}

/// A single variable estimate.
#[derive(Clone, Debug)]
pub enum Value {
    /// A pose-valued variable (robot pose, detection pose, velocity).
    Pose(SE3),
    /// A point-valued variable.
    Point(Vector3<f64>),
}

impl Value {
    /// The variant name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Pose(_) => "pose",
            Value::Point(_) => "point",
        }
    }
}

/// Map from keys to current variable estimates.
///
/// Read-only from a factor's point of view: `error`/`linearize` only look up
/// the estimates, and consistency of the container across a solver iteration
/// is the solver's responsibility.
#[derive(Clone, Debug, Default)]
pub struct Values {
    entries: HashMap<Key, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pose-valued variable.
    pub fn insert_pose(&mut self, key: Key, pose: SE3) {
        self.entries.insert(key, Value::Pose(pose));
    }

    /// Insert or replace a point-valued variable.
    pub fn insert_point(&mut self, key: Key, point: Vector3<f64>) {
        self.entries.insert(key, Value::Point(point));
    }

    /// Look up a variable of any type.
    pub fn get(&self, key: Key) -> Option<&Value> {
        self.entries.get(&key)
    }

    /// Look up a pose-valued variable.
    ///
    /// Fails with [`FactorError::UnknownKey`] when the key is absent and
    /// [`FactorError::MismatchedValueType`] when it holds a point.
    pub fn pose(&self, key: Key) -> FactorResult<&SE3> {
        match self.entries.get(&key) {
            Some(Value::Pose(pose)) => Ok(pose),
            Some(value) => Err(FactorError::MismatchedValueType {
                key,
                expected: "pose",
                actual: value.type_name(),
            }),
            None => Err(FactorError::UnknownKey(key)),
        }
    }

    /// Look up a point-valued variable.
    pub fn point(&self, key: Key) -> FactorResult<&Vector3<f64>> {
        match self.entries.get(&key) {
            Some(Value::Point(point)) => Ok(point),
            Some(value) => Err(FactorError::MismatchedValueType {
                key,
                expected: "point",
                actual: value.type_name(),
            }),
            None => Err(FactorError::UnknownKey(key)),
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
