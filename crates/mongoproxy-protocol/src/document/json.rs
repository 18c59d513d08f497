//! Extended-JSON rendering of decoded documents
//!
//! Relaxed conventions: plain numbers for int32/int64/finite doubles,
//! `$`-prefixed wrapper objects for everything JSON has no native type for.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Number, Value as Json};

use super::element::Value;
use super::Document;

impl Document {
    /// Render as a JSON object; on duplicated names the last one wins
    pub fn to_json(&self) -> Json {
        let mut map = Map::with_capacity(self.len());
        for element in self {
            map.insert(element.name().to_string(), element.value().to_json());
        }
        Json::Object(map)
    }
}

impl Value {
    pub fn to_json(&self) -> Json {
        match self {
            Value::Double(v) => match Number::from_f64(*v) {
                Some(n) => Json::Number(n),
                None => json!({ "$numberDouble": non_finite(*v) }),
            },
            Value::String(s) => Json::String(s.clone()),
            Value::Document(doc) => doc.to_json(),
            Value::Array(doc) => Json::Array(doc.iter().map(|e| e.value().to_json()).collect()),
            Value::Binary { subtype, bytes } => json!({
                "$binary": { "base64": STANDARD.encode(bytes), "subType": format!("{subtype:02x}") }
            }),
            Value::Undefined => json!({ "$undefined": true }),
            Value::ObjectId(id) => json!({ "$oid": hex::encode(id) }),
            Value::Boolean(v) => Json::Bool(*v),
            Value::DateTime(ms) => json!({ "$date": { "$numberLong": ms.to_string() } }),
            Value::Null => Json::Null,
            Value::Regex { pattern, options } => json!({
                "$regularExpression": { "pattern": pattern, "options": options }
            }),
            Value::DbPointer { namespace, id } => json!({
                "$dbPointer": { "$ref": namespace, "$id": { "$oid": hex::encode(id) } }
            }),
            Value::JavaScript(code) => json!({ "$code": code }),
            Value::Symbol(s) => json!({ "$symbol": s }),
            Value::JavaScriptWithScope { code, scope } => json!({
                "$code": code,
                "$scope": scope.to_json()
            }),
            Value::Int32(v) => Json::from(*v),
            Value::Timestamp(v) => json!({ "$timestamp": { "t": v >> 32, "i": v & 0xFFFF_FFFF } }),
            Value::Int64(v) => Json::from(*v),
            Value::Decimal128(bytes) => json!({ "$numberDecimal": decimal128_string(bytes) }),
            Value::MaxKey => json!({ "$maxKey": 1 }),
            Value::MinKey => json!({ "$minKey": 1 }),
        }
    }
}

fn non_finite(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

const DECIMAL128_EXPONENT_BIAS: i64 = 6176;

/// IEEE 754-2008 decimal128 (binary integer decimal) to its scientific string
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn decimal128_string(bytes: &[u8; 16]) -> String {
    let bits = u128::from_le_bytes(*bytes);
    let sign = if bits >> 127 == 1 { "-" } else { "" };

    match (bits >> 122) & 0x1F {
        0x1F => return "NaN".to_string(),
        0x1E => return format!("{sign}Infinity"),
        _ => {}
    }

    let (exponent_bits, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
        // the implied coefficient would exceed 34 digits; such values read as zero
        ((bits >> 111) & 0x3FFF, 0u128)
    } else {
        ((bits >> 113) & 0x3FFF, bits & ((1u128 << 113) - 1))
    };

    let exponent = exponent_bits as i64 - DECIMAL128_EXPONENT_BIAS;
    let digits = coefficient.to_string();
    let adjusted = exponent + digits.len() as i64 - 1;

    if exponent <= 0 && adjusted >= -6 {
        if exponent == 0 {
            return format!("{sign}{digits}");
        }
        let point = digits.len() as i64 + exponent;
        if point > 0 {
            let (int, frac) = digits.split_at(point as usize);
            format!("{sign}{int}.{frac}")
        } else {
            format!("{sign}0.{}{digits}", "0".repeat((-point) as usize))
        }
    } else {
        let (first, rest) = digits.split_at(1);
        let point = if rest.is_empty() { "" } else { "." };
        let exp_sign = if adjusted >= 0 { "+" } else { "" };
        format!("{sign}{first}{point}{rest}E{exp_sign}{adjusted}")
    }
}
