/// Defensive field-by-field readers for classifier replies.
///
/// Nothing here fails: a missing key, a wrong type or an unparsable value reads
/// as the empty/zero default so the caller's fallback logic can take over.
use serde::Serialize;
use serde_json::Value;

use crate::perception::types::Point;

/// Integer view of one raw value: integers as-is, finite floats truncated,
/// trimmed integer strings parsed (`"2.0"` is not an integer string).
/// Booleans, nulls, arrays and objects are `None`.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Elements of a raw list; anything that is not an array is empty.
pub fn as_list(value: Option<&Value>) -> &[Value] {
    match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

/// Trimmed string field; non-strings read as empty.
pub fn str_field(obj: &Value, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).map(|s| s.trim().to_string()).unwrap_or_default()
}

/// String items of a list field.
pub fn str_list_field(obj: &Value, key: &str) -> Vec<String> {
    as_list(obj.get(key))
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Numeric field, accepting numbers and numeric strings. Non-finite reads as `None`.
pub fn f64_field(obj: &Value, key: &str) -> Option<f64> {
    let v = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    v.is_finite().then_some(v)
}

/// Truthiness of a flag field: `true`, non-zero numbers, "true"/"yes"/"1".
pub fn bool_field(obj: &Value, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

// ── Reply shapes ─────────────────────────────────────────────────────────────

/// Shape (b): a short tile label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TileLabel {
    pub label: String,
    pub confidence: f64,
}

impl TileLabel {
    pub fn from_value(v: &Value) -> Self {
        let confidence = f64_field(v, "confidence")
            .or_else(|| f64_field(v, "conf"))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Self {
            label: str_field(v, "label").to_lowercase(),
            confidence,
        }
    }
}

/// Shape (c): the parsed task panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskParse {
    pub task_text: String,
    pub selection_criteria: String,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub example_container: String,
    pub example_container_for_creature: String,
    pub target_creature_category: String,
    pub exclude_creature_category: String,
}

impl TaskParse {
    pub fn from_value(v: &Value) -> Self {
        Self {
            task_text: str_field(v, "task_text"),
            selection_criteria: str_field(v, "selection_criteria"),
            positive_keywords: str_list_field(v, "positive_keywords"),
            negative_keywords: str_list_field(v, "negative_keywords"),
            example_container: str_field(v, "example_container"),
            example_container_for_creature: str_field(v, "example_container_for_creature"),
            target_creature_category: str_field(v, "target_creature_category"),
            exclude_creature_category: str_field(v, "exclude_creature_category"),
        }
    }
}

/// Shape (d), selection variant. `indexes` is kept raw for the selection engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReply {
    pub indexes: Value,
    pub reason: String,
}

impl SelectionReply {
    pub fn from_value(v: &Value) -> Self {
        Self {
            indexes: v.get("indexes").cloned().unwrap_or(Value::Null),
            reason: str_field(v, "reason"),
        }
    }

    pub fn empty() -> Self {
        Self { indexes: Value::Array(Vec::new()), reason: String::new() }
    }
}

/// Shape (d), verification variant. Index lists stay raw until sanitized
/// against the round's index order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReply {
    pub correct_indexes: Value,
    pub selected_indexes: Value,
    pub ok: bool,
    pub reason: String,
}

impl VerifyReply {
    pub fn from_value(v: &Value) -> Self {
        let correct = v.get("correct_indexes").or_else(|| v.get("indexes"));
        Self {
            correct_indexes: correct.cloned().unwrap_or(Value::Null),
            selected_indexes: v.get("selected_indexes").cloned().unwrap_or(Value::Null),
            ok: bool_field(v, "ok"),
            reason: str_field(v, "reason"),
        }
    }
}

/// Shape (a): a single located point. Negative coordinates mean "not found".
pub fn point_from_value(v: &Value) -> Option<Point> {
    let x = v.get("x").and_then(coerce_int)?;
    let y = v.get("y").and_then(coerce_int)?;
    if x < 0 || y < 0 || x > i32::MAX as i64 || y > i32::MAX as i64 {
        return None;
    }
    Some(Point::new(x as i32, y as i32))
}
