use serde_json::Value as JsonValue;

/// Best-effort numeric view of a reported value. Numbers and numeric strings
/// qualify; everything else (bools, nulls, "N/A", NaN) is skipped.
pub fn as_finite_f64(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numbers_and_numeric_strings() {
        assert_eq!(as_finite_f64(&json!(21.5)), Some(21.5));
        assert_eq!(as_finite_f64(&json!(-3)), Some(-3.0));
        assert_eq!(as_finite_f64(&json!(" 1013.2 ")), Some(1013.2));
    }

    #[test]
    fn skips_everything_else() {
        assert_eq!(as_finite_f64(&json!("N/A")), None);
        assert_eq!(as_finite_f64(&json!("nan")), None);
        assert_eq!(as_finite_f64(&json!("inf")), None);
        assert_eq!(as_finite_f64(&json!(true)), None);
        assert_eq!(as_finite_f64(&JsonValue::Null), None);
        assert_eq!(as_finite_f64(&json!({"v": 1})), None);
    }
}
