//! Semantic equality for field groups.
//!
//! Object keys compare order-insensitively. `null`, empty objects and empty
//! arrays inside an object are treated as absent, so a field the store omits
//! and a field it serializes empty compare equal. Array order is significant.

use serde_json::Value;

fn is_unset(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.values().all(is_unset),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

pub fn semantic_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(ao), Value::Object(bo)) => {
            ao.iter().all(|(k, av)| match bo.get(k) {
                Some(bv) => semantic_eq(av, bv),
                None => is_unset(av),
            }) && bo.iter().filter(|(k, _)| !ao.contains_key(*k)).all(|(_, bv)| is_unset(bv))
        }
        (Value::Array(aa), Value::Array(ba)) => {
            aa.len() == ba.len() && aa.iter().zip(ba.iter()).all(|(x, y)| semantic_eq(x, y))
        }
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ if is_unset(a) && is_unset(b) => true,
        _ => a == b,
    }
}
