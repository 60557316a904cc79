// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server-pushed session parameters.
//!
//! Login and query responses carry `{name, value}` pairs. Only the parameters
//! listed in [`SessionParameter`] are kept; everything else is dropped on
//! arrival.

use crate::types::session::NameValueParameter;
use std::collections::HashMap;
use tracing::trace;

/// Session parameters this client acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionParameter {
    ClientPrefetchThreads,
    QueryContextCacheSize,
    ClientSessionKeepAlive,
    ClientStageArrayBindingThreshold,
}

impl SessionParameter {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CLIENT_PREFETCH_THREADS" => Some(Self::ClientPrefetchThreads),
            "QUERY_CONTEXT_CACHE_SIZE" => Some(Self::QueryContextCacheSize),
            "CLIENT_SESSION_KEEP_ALIVE" => Some(Self::ClientSessionKeepAlive),
            "CLIENT_STAGE_ARRAY_BINDING_THRESHOLD" => Some(Self::ClientStageArrayBindingThreshold),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientPrefetchThreads => "CLIENT_PREFETCH_THREADS",
            Self::QueryContextCacheSize => "QUERY_CONTEXT_CACHE_SIZE",
            Self::ClientSessionKeepAlive => "CLIENT_SESSION_KEEP_ALIVE",
            Self::ClientStageArrayBindingThreshold => "CLIENT_STAGE_ARRAY_BINDING_THRESHOLD",
        }
    }

    fn is_boolean(&self) -> bool {
        matches!(self, Self::ClientSessionKeepAlive)
    }
}

/// Typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ParameterValue {
    /// Coerce a JSON value into the type `parameter` expects.
    ///
    /// The server sends numbers and booleans either natively or as strings.
    /// Values that cannot be coerced are kept as `Str`.
    fn coerce(parameter: SessionParameter, value: &serde_json::Value) -> Self {
        use serde_json::Value;

        if parameter.is_boolean() {
            return match value {
                Value::Bool(b) => Self::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Self::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Self::Bool(false),
                other => Self::Str(other.to_string()),
            };
        }

        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Str(n.to_string()),
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => Self::Int(i),
                Err(_) => Self::Str(s.clone()),
            },
            Value::Bool(b) => Self::Bool(*b),
            other => Self::Str(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Last-write-wins map of recognized session parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    values: HashMap<SessionParameter, ParameterValue>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `parameters` and return the recognized ones that were applied,
    /// in arrival order.
    pub fn merge(
        &mut self,
        parameters: &[NameValueParameter],
    ) -> Vec<(SessionParameter, ParameterValue)> {
        let mut applied = Vec::new();
        for parameter in parameters {
            let Some(key) = SessionParameter::from_name(&parameter.name) else {
                trace!("Ignoring unrecognized session parameter {}", parameter.name);
                continue;
            };
            let value = ParameterValue::coerce(key, &parameter.value);
            self.values.insert(key, value.clone());
            applied.push((key, value));
        }
        applied
    }

    pub fn get(&self, key: SessionParameter) -> Option<&ParameterValue> {
        self.values.get(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recognized_parameters_are_typed() {
        let mut map = ParameterMap::new();
        let applied = map.merge(&[
            NameValueParameter::new("CLIENT_PREFETCH_THREADS", 8),
            NameValueParameter::new("QUERY_CONTEXT_CACHE_SIZE", "3"),
            NameValueParameter::new("CLIENT_SESSION_KEEP_ALIVE", "TRUE"),
            NameValueParameter::new("CLIENT_STAGE_ARRAY_BINDING_THRESHOLD", json!(65280)),
        ]);

        assert_eq!(applied.len(), 4);
        assert_eq!(
            map.get(SessionParameter::ClientPrefetchThreads),
            Some(&ParameterValue::Int(8))
        );
        assert_eq!(
            map.get(SessionParameter::QueryContextCacheSize)
                .and_then(ParameterValue::as_i64),
            Some(3)
        );
        assert_eq!(
            map.get(SessionParameter::ClientSessionKeepAlive)
                .and_then(ParameterValue::as_bool),
            Some(true)
        );
        assert_eq!(
            map.get(SessionParameter::ClientStageArrayBindingThreshold)
                .and_then(ParameterValue::as_i64),
            Some(65280)
        );
    }

    #[test]
    fn test_unrecognized_parameters_ignored() {
        let mut map = ParameterMap::new();
        let applied = map.merge(&[
            NameValueParameter::new("TIMEZONE", "UTC"),
            NameValueParameter::new("CLIENT_RESULT_CHUNK_SIZE", 160),
        ]);
        assert!(applied.is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let mut map = ParameterMap::new();
        map.merge(&[
            NameValueParameter::new("CLIENT_PREFETCH_THREADS", 2),
            NameValueParameter::new("client_prefetch_threads", 6),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(SessionParameter::ClientPrefetchThreads),
            Some(&ParameterValue::Int(6))
        );
    }

    #[test]
    fn test_uncoercible_value_kept_as_string() {
        let mut map = ParameterMap::new();
        map.merge(&[NameValueParameter::new("CLIENT_PREFETCH_THREADS", "lots")]);
        assert_eq!(
            map.get(SessionParameter::ClientPrefetchThreads),
            Some(&ParameterValue::Str("lots".to_string()))
        );
    }
}
