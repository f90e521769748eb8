//! Wire-level parameter encoding for the MAVLink parameter protocol.
//!
//! PX4 transmits every parameter value as an IEEE-754 float32 regardless of
//! its declared type; integer-typed parameters are value-cast into the float
//! field and must stay within the float32 exact-integer range so the cast
//! round-trips losslessly. Names travel as fixed 16-byte fields, truncated
//! and null-padded.

use mavlink::common::MavParamType;
use serde::Serialize;

/// Fixed width of the `param_id` field on the wire.
pub const PARAM_ID_LEN: usize = 16;

/// Largest integer magnitude exactly representable in a float32 (2^24).
/// All realistic PX4 parameter values sit well inside this.
pub const F32_EXACT_INT_MAX: f64 = 16_777_216.0;

/// Comparison tolerance for REAL32 verification.
pub const FLOAT_TOLERANCE: f64 = 1e-3;

/// Suffixes marking bitmask parameters, shown in both decimal and hex.
const MASK_SUFFIXES: &[&str] = &["MASK", "BITMASK"];

/// Declared type of a parameter on the wire. Closed set; conversion to and
/// from [`MavParamType`] happens in exactly one match each way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Real32,
}

impl WireType {
    /// Map from the MAVLink enum. Returns `None` for types PX4 does not use
    /// on this link (64-bit and REAL64); callers drop those frames.
    pub fn from_mav(t: MavParamType) -> Option<Self> {
        match t {
            MavParamType::MAV_PARAM_TYPE_INT8 => Some(WireType::Int8),
            MavParamType::MAV_PARAM_TYPE_UINT8 => Some(WireType::Uint8),
            MavParamType::MAV_PARAM_TYPE_INT16 => Some(WireType::Int16),
            MavParamType::MAV_PARAM_TYPE_UINT16 => Some(WireType::Uint16),
            MavParamType::MAV_PARAM_TYPE_INT32 => Some(WireType::Int32),
            MavParamType::MAV_PARAM_TYPE_UINT32 => Some(WireType::Uint32),
            MavParamType::MAV_PARAM_TYPE_REAL32 => Some(WireType::Real32),
            _ => None,
        }
    }

    pub fn to_mav(self) -> MavParamType {
        match self {
            WireType::Int8 => MavParamType::MAV_PARAM_TYPE_INT8,
            WireType::Uint8 => MavParamType::MAV_PARAM_TYPE_UINT8,
            WireType::Int16 => MavParamType::MAV_PARAM_TYPE_INT16,
            WireType::Uint16 => MavParamType::MAV_PARAM_TYPE_UINT16,
            WireType::Int32 => MavParamType::MAV_PARAM_TYPE_INT32,
            WireType::Uint32 => MavParamType::MAV_PARAM_TYPE_UINT32,
            WireType::Real32 => MavParamType::MAV_PARAM_TYPE_REAL32,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, WireType::Real32)
    }

    /// Inclusive value bounds for integer kinds, capped to the float32
    /// exact-integer range for the 32-bit kinds. `None` for REAL32.
    pub fn integer_bounds(self) -> Option<(f64, f64)> {
        match self {
            WireType::Int8 => Some((i8::MIN as f64, i8::MAX as f64)),
            WireType::Uint8 => Some((0.0, u8::MAX as f64)),
            WireType::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            WireType::Uint16 => Some((0.0, u16::MAX as f64)),
            WireType::Int32 => Some((-F32_EXACT_INT_MAX, F32_EXACT_INT_MAX)),
            WireType::Uint32 => Some((0.0, F32_EXACT_INT_MAX)),
            WireType::Real32 => None,
        }
    }
}

/// A value that cannot be encoded for its wire type. Carries the allowed
/// bounds and the nearest encodable value so callers can report a suggestion.
#[derive(Debug, Clone, Copy)]
pub struct ValueRangeError {
    pub min: f64,
    pub max: f64,
    pub suggested: f64,
}

/// Encode a parameter name into the fixed 16-byte wire field.
pub fn encode_param_id(name: &str) -> [u8; PARAM_ID_LEN] {
    let mut id = [0u8; PARAM_ID_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(PARAM_ID_LEN);
    id[..len].copy_from_slice(&bytes[..len]);
    id
}

/// Decode a 16-byte wire field back into a name, trimming trailing NULs.
pub fn decode_param_id(id: &[u8; PARAM_ID_LEN]) -> String {
    let end = id.iter().position(|&b| b == 0).unwrap_or(PARAM_ID_LEN);
    String::from_utf8_lossy(&id[..end]).into_owned()
}

/// Encode a logical value into the float32 wire field for the given type.
/// Integer kinds must hold the value exactly; out-of-range or fractional
/// values fail without anything being sent.
pub fn encode_value(wire_type: WireType, value: f64) -> Result<f32, ValueRangeError> {
    if !value.is_finite() {
        return Err(ValueRangeError {
            min: -F32_EXACT_INT_MAX,
            max: F32_EXACT_INT_MAX,
            suggested: 0.0,
        });
    }
    match wire_type.integer_bounds() {
        Some((min, max)) => {
            let rounded = value.round();
            if value != rounded || value < min || value > max {
                return Err(ValueRangeError {
                    min,
                    max,
                    suggested: rounded.clamp(min, max),
                });
            }
            Ok(value as f32)
        }
        None => Ok(value as f32),
    }
}

/// Decode a float32 wire value into the logical value for the given type.
/// Integer kinds are rounded to absorb any accumulated float fuzz.
pub fn decode_value(wire_type: WireType, raw: f32) -> f64 {
    if wire_type.is_integer() {
        (raw as f64).round()
    } else {
        raw as f64
    }
}

/// Compare a requested and an applied value under the type's equality rule:
/// exact for integer kinds, `FLOAT_TOLERANCE` for REAL32.
pub fn values_match(wire_type: WireType, requested: f64, actual: f64) -> bool {
    if wire_type.is_integer() {
        requested.round() == actual.round()
    } else {
        (requested - actual).abs() <= FLOAT_TOLERANCE
    }
}

/// Whether the parameter name marks a bitmask (shown in decimal and hex).
pub fn is_bitmask_name(name: &str) -> bool {
    MASK_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Human-readable rendering of a value: integers without a fraction, masks
/// with a hex companion, floats with trailing zeros trimmed.
pub fn format_value(name: &str, wire_type: WireType, value: f64) -> String {
    if wire_type.is_integer() {
        let v = value.round() as i64;
        if is_bitmask_name(name) {
            format!("{} (0x{:X})", v, v)
        } else {
            format!("{}", v)
        }
    } else {
        let s = format!("{:.6}", value);
        let trimmed = s.trim_end_matches('0').trim_end_matches('.');
        trimmed.to_string()
    }
}
