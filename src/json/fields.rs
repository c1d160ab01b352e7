//! Field codec: bidirectional typed access through a JSON slot.
//!
//! One function serves both directions of the schema. An empty-string
//! value is a query: the field's current value is echoed into the slot.
//! Any other value is an assignment: the wire value is narrowed to the
//! field's native type and the narrowed value echoed back, so responses
//! are always self-describing.
//!
//! Narrowing that moves the value by more than [`EPSILON`] rejects the
//! assignment atomically: the field keeps its previous value and the
//! value-range fault is returned. Exact types (`i32`, `bool`, pins) skip
//! the check.

use serde_json::Value;

use super::{is_query, JsonMap};
use crate::error::{FaultCode, Status};

/// Largest representation error an accepted narrowing may introduce.
pub const EPSILON: f64 = 1e-7;

/// A field the codec can read and write through JSON.
pub(crate) trait JsonField: Copy {
    /// Skip the narrowing epsilon check (native type holds the wire type
    /// exactly).
    const EXACT: bool = false;

    /// Read the wire value as a common numeric carrier.
    fn from_wire(v: &Value) -> Option<f64>;

    /// Narrow the carrier to the native type.
    fn narrow(wire: f64) -> Self;

    /// Widen back for the epsilon comparison.
    fn widen(self) -> f64;

    /// Native value as a JSON echo.
    fn to_json(self) -> Value;
}

macro_rules! int_field {
    ($t:ty, $exact:expr) => {
        impl JsonField for $t {
            const EXACT: bool = $exact;

            fn from_wire(v: &Value) -> Option<f64> {
                v.as_i64().map(|n| n as f64)
            }

            fn narrow(wire: f64) -> Self {
                wire as $t
            }

            fn widen(self) -> f64 {
                self as f64
            }

            fn to_json(self) -> Value {
                Value::from(self as i64)
            }
        }
    };
}

int_field!(i32, true);
int_field!(i16, false);
int_field!(u16, false);
int_field!(u8, false);

impl JsonField for f32 {
    fn from_wire(v: &Value) -> Option<f64> {
        v.as_f64()
    }

    fn narrow(wire: f64) -> Self {
        wire as f32
    }

    fn widen(self) -> f64 {
        self as f64
    }

    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl JsonField for bool {
    const EXACT: bool = true;

    fn from_wire(v: &Value) -> Option<f64> {
        v.as_bool().map(|b| if b { 1.0 } else { 0.0 })
    }

    fn narrow(wire: f64) -> Self {
        wire != 0.0
    }

    fn widen(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn to_json(self) -> Value {
        Value::Bool(self)
    }
}

/// Query or assign `field` through `obj[key]`.
///
/// The slot always holds the post-operation value afterwards (echo
/// semantics). The key must be present; handlers only call this for keys
/// they routed.
pub(crate) fn process_field<T: JsonField>(obj: &mut JsonMap, key: &str, field: &mut T) -> Status {
    let Some(v) = obj.get(key) else {
        return Status::fault(FaultCode::FieldRequired, key);
    };
    if is_query(v) {
        obj.insert(key.to_string(), field.to_json());
        return Status::Ok;
    }
    let Some(wire) = T::from_wire(v) else {
        return Status::fault(FaultCode::WrongType, key);
    };
    let narrowed = T::narrow(wire);
    if !T::EXACT && (narrowed.widen() - wire).abs() > EPSILON {
        return Status::fault(FaultCode::ValueRange, key);
    }
    *field = narrowed;
    obj.insert(key.to_string(), narrowed.to_json());
    Status::Ok
}
