//! Axis coordinate codec.
//!
//! Every image in a dataset is keyed by an open, user-defined
//! coordinate: a mapping from axis name to either a signed integer or
//! a string (for example `{time: 3, channel: "GFP", z: 12}`). The
//! canonical form is a JSON object whose keys are sorted
//! lexicographically; that exact byte string is the lookup key in the
//! in-memory maps and in `NDTiff.index`, which is what makes
//! coordinate equality a plain byte compare.
//!
//! The emitter is hand-written on purpose: the sorted-key contract is
//! part of the on-disk format and must not depend on any library's
//! default object ordering.

use std::collections::BTreeMap;

use crate::error::IndexError;

/// Reserved axis locating a tile's row in the XY grid of a tiled
/// dataset.
pub const ROW_AXIS: &str = "row";

/// Reserved axis locating a tile's column in the XY grid of a tiled
/// dataset.
pub const COL_AXIS: &str = "column";

// =============================================================================
// AxisValue
// =============================================================================

/// The value of one axis: a signed 32-bit integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AxisValue {
    I32(i32),
    Str(String),
}

/// The two kinds an axis can be bound to. An axis name is bound at
/// first use and may never mix kinds within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Integer,
    Text,
}

impl AxisValue {
    /// Which kind this value belongs to.
    pub fn kind(&self) -> AxisKind {
        match self {
            AxisValue::I32(_) => AxisKind::Integer,
            AxisValue::Str(_) => AxisKind::Text,
        }
    }

    /// The integer value, if this is an integer axis.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            AxisValue::I32(v) => Some(*v),
            AxisValue::Str(_) => None,
        }
    }
}

impl From<i32> for AxisValue {
    fn from(v: i32) -> Self {
        AxisValue::I32(v)
    }
}

impl From<&str> for AxisValue {
    fn from(v: &str) -> Self {
        AxisValue::Str(v.to_string())
    }
}

impl From<String> for AxisValue {
    fn from(v: String) -> Self {
        AxisValue::Str(v)
    }
}

// =============================================================================
// Axes
// =============================================================================

/// A coordinate: axis name to axis value. A `BTreeMap` keeps the
/// iteration order identical to the canonical serialisation order.
pub type Axes = BTreeMap<String, AxisValue>;

/// Serialise a coordinate to its canonical sorted-key JSON form.
///
/// The output has no whitespace and escapes strings per JSON rules,
/// so any two equal coordinates produce identical bytes regardless of
/// insertion order.
pub fn serialize_axes(axes: &Axes) -> String {
    let mut out = String::with_capacity(16 + axes.len() * 16);
    out.push('{');
    for (i, (name, value)) in axes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_json_string(&mut out, name);
        out.push(':');
        match value {
            AxisValue::I32(v) => {
                out.push_str(&v.to_string());
            }
            AxisValue::Str(v) => {
                push_json_string(&mut out, v);
            }
        }
    }
    out.push('}');
    out
}

/// Parse a canonical axes key back into a coordinate.
///
/// Accepts any JSON object whose values are integers (within i32
/// range) or strings; anything else is rejected.
pub fn deserialize_axes(s: &str) -> Result<Axes, IndexError> {
    let parsed: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(s).map_err(IndexError::InvalidAxesJson)?;

    let mut axes = Axes::new();
    for (name, value) in parsed {
        let value = match value {
            serde_json::Value::Number(ref n) => match n.as_i64() {
                Some(v) if i32::try_from(v).is_ok() => AxisValue::I32(v as i32),
                _ => return Err(IndexError::NonScalarAxisValue { axis: name }),
            },
            serde_json::Value::String(v) => AxisValue::Str(v),
            _ => return Err(IndexError::NonScalarAxisValue { axis: name }),
        };
        axes.insert(name, value);
    }
    Ok(axes)
}

/// Copy a coordinate, setting the reserved `row`/`column` tile axes.
pub fn axes_at_tile(axes: &Axes, row: i32, col: i32) -> Axes {
    let mut copy = axes.clone();
    copy.insert(ROW_AXIS.to_string(), AxisValue::I32(row));
    copy.insert(COL_AXIS.to_string(), AxisValue::I32(col));
    copy
}

/// Append a string in JSON form, with quoting and escaping.
fn push_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn axes_of(pairs: &[(&str, AxisValue)]) -> Axes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_serialize_sorts_keys() {
        let axes = axes_of(&[
            ("z", AxisValue::I32(3)),
            ("time", AxisValue::I32(1)),
            ("channel", AxisValue::Str("GFP".to_string())),
        ]);
        assert_eq!(
            serialize_axes(&axes),
            r#"{"channel":"GFP","time":1,"z":3}"#
        );
    }

    #[test]
    fn test_serialize_empty() {
        assert_eq!(serialize_axes(&Axes::new()), "{}");
    }

    #[test]
    fn test_serialize_negative_values() {
        let axes = axes_of(&[
            ("column", AxisValue::I32(-2)),
            ("row", AxisValue::I32(-1)),
        ]);
        assert_eq!(serialize_axes(&axes), r#"{"column":-2,"row":-1}"#);
    }

    #[test]
    fn test_serialize_invariant_under_input_order() {
        let mut a = Axes::new();
        a.insert("b".to_string(), AxisValue::I32(2));
        a.insert("a".to_string(), AxisValue::I32(1));

        let mut b = Axes::new();
        b.insert("a".to_string(), AxisValue::I32(1));
        b.insert("b".to_string(), AxisValue::I32(2));

        assert_eq!(serialize_axes(&a), serialize_axes(&b));
    }

    #[test]
    fn test_round_trip() {
        let axes = axes_of(&[
            ("channel", AxisValue::Str("DAPI".to_string())),
            ("time", AxisValue::I32(42)),
            ("z", AxisValue::I32(-7)),
        ]);
        let encoded = serialize_axes(&axes);
        assert_eq!(deserialize_axes(&encoded).unwrap(), axes);
    }

    #[test]
    fn test_string_escaping_round_trips() {
        let axes = axes_of(&[(
            "channel",
            AxisValue::Str("a \"quoted\"\\path\nline".to_string()),
        )]);
        let encoded = serialize_axes(&axes);
        assert_eq!(deserialize_axes(&encoded).unwrap(), axes);
    }

    #[test]
    fn test_deserialize_rejects_non_scalar() {
        let result = deserialize_axes(r#"{"time":[1,2]}"#);
        assert!(matches!(
            result,
            Err(IndexError::NonScalarAxisValue { .. })
        ));

        let result = deserialize_axes(r#"{"time":1.5}"#);
        assert!(matches!(
            result,
            Err(IndexError::NonScalarAxisValue { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_malformed() {
        assert!(matches!(
            deserialize_axes("not json"),
            Err(IndexError::InvalidAxesJson(_))
        ));
    }

    #[test]
    fn test_axes_at_tile() {
        let axes = axes_of(&[("time", AxisValue::I32(0))]);
        let tiled = axes_at_tile(&axes, 3, -1);
        assert_eq!(tiled.get(ROW_AXIS), Some(&AxisValue::I32(3)));
        assert_eq!(tiled.get(COL_AXIS), Some(&AxisValue::I32(-1)));
        assert_eq!(tiled.get("time"), Some(&AxisValue::I32(0)));
    }
}
