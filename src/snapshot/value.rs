//! Typed input values accepted by the snapshot builder.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A runtime state value submitted for capture.
///
/// Collections own their children, so a plain `StateValue` tree can never be
/// cyclic. Shared or self-referential graphs go through [`SharedState`] cells,
/// whose identity is what cycle detection tracks.
#[derive(Clone, Debug)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Serialized as an ISO-8601 string.
    Timestamp(DateTime<Utc>),
    /// Enumerated or tagged value, serialized as its tag name.
    Enum(String),
    /// Ordered key/value pairs. Keys of any shape are coerced to strings.
    Map(Vec<(StateValue, StateValue)>),
    List(Vec<StateValue>),
    /// Normalized to a list; element order is whatever the caller supplied.
    Set(Vec<StateValue>),
    Shared(SharedState),
    /// Anything else, normalized through a serde round trip.
    Opaque(OpaqueValue),
}

impl StateValue {
    /// Build a map from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<StateValue>,
        V: Into<StateValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        StateValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list<V: Into<StateValue>, I: IntoIterator<Item = V>>(items: I) -> Self {
        StateValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn set<V: Into<StateValue>, I: IntoIterator<Item = V>>(items: I) -> Self {
        StateValue::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn enumeration(tag: impl Into<String>) -> Self {
        StateValue::Enum(tag.into())
    }

    /// Wrap an arbitrary serializable value.
    pub fn opaque<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        StateValue::Opaque(OpaqueValue::new(value))
    }

    /// Name of the value's runtime shape, recorded alongside captures.
    pub fn runtime_type(&self) -> String {
        match self {
            StateValue::Null => "Null".into(),
            StateValue::Bool(_) => "bool".into(),
            StateValue::Int(_) => "i64".into(),
            StateValue::Float(_) => "f64".into(),
            StateValue::Text(_) => "String".into(),
            StateValue::Timestamp(_) => "DateTime<Utc>".into(),
            StateValue::Enum(_) => "Enum".into(),
            StateValue::Map(_) => "Map".into(),
            StateValue::List(_) => "List".into(),
            StateValue::Set(_) => "Set".into(),
            StateValue::Shared(_) => "Shared".into(),
            StateValue::Opaque(o) => o.type_name().into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::Int(v.into())
    }
}

impl From<u32> for StateValue {
    fn from(v: u32) -> Self {
        StateValue::Int(v.into())
    }
}

impl From<u64> for StateValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => StateValue::Int(i),
            Err(_) => StateValue::Float(v as f64),
        }
    }
}

impl From<usize> for StateValue {
    fn from(v: usize) -> Self {
        StateValue::from(v as u64)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(v: DateTime<Utc>) -> Self {
        StateValue::Timestamp(v)
    }
}

impl From<SharedState> for StateValue {
    fn from(v: SharedState) -> Self {
        StateValue::Shared(v)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(StateValue::Null)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(v: Vec<T>) -> Self {
        StateValue::list(v)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StateValue::Int(i),
                None => StateValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => StateValue::Text(s),
            Value::Array(items) => StateValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => StateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (StateValue::Text(k), v.into()))
                    .collect(),
            ),
        }
    }
}

/// A shared, mutable cell that may be referenced from several places,
/// including from inside its own value.
#[derive(Clone)]
pub struct SharedState(Arc<RwLock<StateValue>>);

impl SharedState {
    pub fn new(value: impl Into<StateValue>) -> Self {
        SharedState(Arc::new(RwLock::new(value.into())))
    }

    /// Replace the cell's value.
    pub fn set(&self, value: impl Into<StateValue>) {
        *self.0.write() = value.into();
    }

    /// Clone of the current value.
    pub fn get(&self) -> StateValue {
        self.0.read().clone()
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&StateValue) -> R) -> R {
        f(&self.0.read())
    }

    /// Identity used for cycle detection.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedState) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedState({:#x})", self.identity())
    }
}

trait ErasedJson: Send + Sync {
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn describe(&self) -> String;
}

impl<T> ErasedJson for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn describe(&self) -> String {
        format!("{:?}", self)
    }
}

/// A value the builder has no dedicated variant for.
#[derive(Clone)]
pub struct OpaqueValue {
    type_name: &'static str,
    inner: Arc<dyn ErasedJson>,
}

impl OpaqueValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Serialize into a JSON tree.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.inner.to_json()
    }

    /// `Debug` rendering, used when serialization fails.
    pub fn describe(&self) -> String {
        self.inner.describe()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}
