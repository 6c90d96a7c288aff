//! Value transformations applied while propagating a bound value.

use serde_json::{Number, Value};
use std::fmt;
use std::sync::Arc;

/// Converts values in one direction, optionally in reverse.
pub trait ValueTransformer: Send + Sync {
    /// Transform a source value. `None` skips the propagation.
    fn transform(&self, value: &Value) -> Option<Value>;

    /// Undo [`transform`](Self::transform). Only called when
    /// [`allows_reverse_transformation`](Self::allows_reverse_transformation)
    /// is true.
    fn reverse_transform(&self, _value: &Value) -> Option<Value> {
        None
    }

    fn allows_reverse_transformation(&self) -> bool {
        false
    }
}

/// Renders values as text and optionally parses text back.
pub trait Formatter: Send + Sync {
    /// Render a value. `None` skips the propagation.
    fn format(&self, value: &Value) -> Option<String>;

    /// Parse text produced by [`format`](Self::format) (or typed by a user).
    fn parse(&self, _text: &str) -> Option<Value> {
        None
    }

    fn can_parse(&self) -> bool {
        false
    }
}

type MapFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// How a bound value is converted on its way from source to destination.
#[derive(Clone, Default)]
pub enum Transform {
    /// Copy the value as is. Reversible.
    #[default]
    None,
    /// An arbitrary function. Not reversible.
    Function(MapFn),
    /// A function with its inverse. Reversible.
    Invertible { forward: MapFn, reverse: MapFn },
    /// Reversible if the transformer allows it.
    ValueTransformer(Arc<dyn ValueTransformer>),
    /// Renders to a string; reversible if the formatter can parse.
    Formatter(Arc<dyn Formatter>),
}

impl Transform {
    pub fn function(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Transform::Function(Arc::new(f))
    }

    pub fn invertible(
        forward: impl Fn(&Value) -> Value + Send + Sync + 'static,
        reverse: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Transform::Invertible {
            forward: Arc::new(forward),
            reverse: Arc::new(reverse),
        }
    }

    pub fn value_transformer(transformer: impl ValueTransformer + 'static) -> Self {
        Transform::ValueTransformer(Arc::new(transformer))
    }

    pub fn formatter(formatter: impl Formatter + 'static) -> Self {
        Transform::Formatter(Arc::new(formatter))
    }

    /// True if values can flow back from destination to source.
    pub fn is_reversible(&self) -> bool {
        match self {
            Transform::None | Transform::Invertible { .. } => true,
            Transform::Function(_) => false,
            Transform::ValueTransformer(t) => t.allows_reverse_transformation(),
            Transform::Formatter(f) => f.can_parse(),
        }
    }

    pub(crate) fn forward(&self, value: &Value) -> Option<Value> {
        match self {
            Transform::None => Some(value.clone()),
            Transform::Function(f) => Some(f(value)),
            Transform::Invertible { forward, .. } => Some(forward(value)),
            Transform::ValueTransformer(t) => t.transform(value),
            Transform::Formatter(f) => f.format(value).map(Value::String),
        }
    }

    pub(crate) fn reverse(&self, value: &Value) -> Option<Value> {
        match self {
            Transform::None => Some(value.clone()),
            Transform::Function(_) => None,
            Transform::Invertible { reverse, .. } => Some(reverse(value)),
            Transform::ValueTransformer(t) if t.allows_reverse_transformation() => {
                t.reverse_transform(value)
            }
            Transform::ValueTransformer(_) => None,
            Transform::Formatter(f) if f.can_parse() => value.as_str().and_then(|s| f.parse(s)),
            Transform::Formatter(_) => None,
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transform::None => "None",
            Transform::Function(_) => "Function",
            Transform::Invertible { .. } => "Invertible",
            Transform::ValueTransformer(_) => "ValueTransformer",
            Transform::Formatter(_) => "Formatter",
        };
        f.write_str(name)
    }
}

/// Logical negation of booleans; `null` reads as false. Reversible.
#[derive(Clone, Copy, Debug, Default)]
pub struct NegateBoolean;

impl ValueTransformer for NegateBoolean {
    fn transform(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Bool(b) => Some(Value::Bool(!b)),
            Value::Null => Some(Value::Bool(true)),
            _ => None,
        }
    }

    fn reverse_transform(&self, value: &Value) -> Option<Value> {
        self.transform(value)
    }

    fn allows_reverse_transformation(&self) -> bool {
        true
    }
}

/// True when the value is `null`. Not reversible.
#[derive(Clone, Copy, Debug, Default)]
pub struct IsNull;

impl ValueTransformer for IsNull {
    fn transform(&self, value: &Value) -> Option<Value> {
        Some(Value::Bool(value.is_null()))
    }
}

/// Formats numbers with a fixed number of decimals and parses them back.
#[derive(Clone, Debug, Default)]
pub struct NumberFormatter {
    pub decimals: usize,
}

impl NumberFormatter {
    pub fn new(decimals: usize) -> Self {
        Self { decimals }
    }
}

impl Formatter for NumberFormatter {
    fn format(&self, value: &Value) -> Option<String> {
        let number = value.as_f64()?;
        Some(format!("{:.*}", self.decimals, number))
    }

    fn parse(&self, text: &str) -> Option<Value> {
        let number: f64 = text.trim().parse().ok()?;
        if self.decimals == 0 && number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
            return Some(Value::from(number as i64));
        }
        Number::from_f64(number).map(Value::Number)
    }

    fn can_parse(&self) -> bool {
        true
    }
}
