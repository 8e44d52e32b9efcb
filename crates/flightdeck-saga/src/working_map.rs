use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkingMapError;

/// Working Map key under which the step at `index` stores its output.
///
/// The format is part of the persisted state of every flight and must not change.
#[must_use]
pub fn output_key(index: usize) -> String {
    format!("{index}.output")
}

/// Per-flight key/value state shared by the steps of one flight.
///
/// Values are held as JSON so that every entry can be persisted and rebuilt
/// after a restart. Typing is structural: a value can be read back as any type
/// whose serde representation accepts it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingMap {
    entries: IndexMap<String, Value>,
}

impl WorkingMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingMapError::Serialize`] if the value has no JSON representation.
    pub fn put<T>(&mut self, key: impl Into<String>, value: &T) -> Result<(), WorkingMapError>
    where
        T: Serialize + ?Sized,
    {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|source| WorkingMapError::Serialize {
                key: key.clone(),
                source,
            })?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Builder-style [`WorkingMap::put`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkingMapError::Serialize`] if the value has no JSON representation.
    pub fn with<T>(mut self, key: impl Into<String>, value: &T) -> Result<Self, WorkingMapError>
    where
        T: Serialize + ?Sized,
    {
        self.put(key, value)?;
        Ok(self)
    }

    pub fn put_raw(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Read the value under `key` as a `T`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingMapError::TypeMismatch`] if the stored value cannot be read as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, WorkingMapError> {
        let Some(value) = self.entries.get(key) else {
            return Ok(None);
        };
        T::deserialize(value)
            .map(Some)
            .map_err(|source| WorkingMapError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
                source,
            })
    }

    /// Read the value under `key` as a `T`, treating absence as an error.
    ///
    /// # Errors
    ///
    /// Returns [`WorkingMapError::Missing`] if the key is absent and
    /// [`WorkingMapError::TypeMismatch`] if the value cannot be read as `T`.
    pub fn get_required<T: DeserializeOwned>(&self, key: &str) -> Result<T, WorkingMapError> {
        self.get(key)?.ok_or_else(|| WorkingMapError::Missing {
            key: key.to_string(),
        })
    }

    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
