//! PII mask: deterministic post-processing of result columns.
//!
//! Every function here is input-only. Masking is column-scoped through
//! the [`FieldClassification`] registry and never changes row count or
//! row order; it only rewrites cell values in place.

use insight_types::{FieldClassification, MaskKind, QueryResult};
use serde_json::{Map, Value};

/// Mask an email address, keeping two characters of the local part and
/// the full domain: `john.doe@example.com` -> `jo***@example.com`.
/// A local part shorter than two characters is padded with `*`.
pub fn mask_email(value: &str) -> String {
    let Some((local, domain)) = value.split_once('@') else {
        return generic_mask(value);
    };
    let mut prefix: String = local.chars().take(2).collect();
    while prefix.chars().count() < 2 {
        prefix.push('*');
    }
    format!("{prefix}***@{domain}")
}

/// Mask a phone number, keeping the first three and last two significant
/// characters: `+66-81-234-5678` -> `+66****78`. Separators are stripped
/// before masking; very short values mask entirely.
pub fn mask_phone(value: &str) -> String {
    let clean: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();
    let n = clean.chars().count();
    if n <= 5 {
        return "*".repeat(n);
    }
    let head: String = clean.chars().take(3).collect();
    let tail: String = clean.chars().skip(n - 2).collect();
    format!("{head}****{tail}")
}

/// Mask a national identifier, keeping the first two significant
/// characters: `1-2345-67890-12-3` -> `12-****-****`.
pub fn mask_national_id(value: &str) -> String {
    let clean: String = value.chars().filter(|c| c.is_alphanumeric()).collect();
    if clean.chars().count() <= 2 {
        return "*".repeat(value.chars().count());
    }
    let head: String = clean.chars().take(2).collect();
    format!("{head}-****-****")
}

/// Mask a personal name, keeping the first whitespace-delimited token:
/// `John Doe Smith` -> `John ***`. A single-token name keeps only its
/// first character so the full value is never revealed.
pub fn mask_name(value: &str) -> String {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(first), Some(_)) => format!("{first} ***"),
        (Some(only), None) => {
            let head: String = only.chars().take(1).collect();
            format!("{head}***")
        }
        (None, _) => value.to_string(),
    }
}

fn generic_mask(value: &str) -> String {
    let head: String = value.chars().take(1).collect();
    format!("{head}***")
}

/// Mask a single JSON value according to its column classification.
/// Null passes through; non-string scalars are stringified first, the
/// way the cell would render to the caller.
pub fn mask_value(value: &Value, kind: MaskKind) -> Value {
    if kind == MaskKind::Public || value.is_null() {
        return value.clone();
    }
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let masked = match kind {
        MaskKind::Email => mask_email(&text),
        MaskKind::Phone => mask_phone(&text),
        MaskKind::NationalId => mask_national_id(&text),
        MaskKind::Name => mask_name(&text),
        MaskKind::Public => unreachable!(),
    };
    Value::String(masked)
}

/// Redact every classified column of a query result in place.
pub fn apply(result: &mut QueryResult, registry: &FieldClassification) {
    let sensitive: Vec<(String, MaskKind)> = result
        .columns
        .iter()
        .filter_map(|col| {
            let kind = registry.kind_of(col);
            (kind != MaskKind::Public).then(|| (col.clone(), kind))
        })
        .collect();
    if sensitive.is_empty() {
        return;
    }
    for row in &mut result.rows {
        for (col, kind) in &sensitive {
            if let Some(cell) = row.get_mut(col) {
                *cell = mask_value(cell, *kind);
            }
        }
    }
}

/// Sanitize invocation parameters before they reach the audit trail, so
/// the trail cannot become a leak vector. Classified top-level keys are
/// masked; everything else passes through.
pub fn sanitize_parameters(params: &Map<String, Value>, registry: &FieldClassification) -> Value {
    let sanitized: Map<String, Value> = params
        .iter()
        .map(|(key, value)| (key.clone(), mask_value(value, registry.kind_of(key))))
        .collect();
    Value::Object(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn masks_email() {
        assert_eq!(mask_email("john.doe@example.com"), "jo***@example.com");
        assert_eq!(mask_email("a@test.com"), "a****@test.com");
        assert_eq!(mask_email("not-an-email"), "n***");
    }

    #[test]
    fn masks_phone() {
        assert_eq!(mask_phone("+66-81-234-5678"), "+66****78");
        assert_eq!(mask_phone("0812345678"), "081****78");
        assert_eq!(mask_phone("12345"), "*****");
    }

    #[test]
    fn masks_national_id() {
        assert_eq!(mask_national_id("1-2345-67890-12-3"), "12-****-****");
        assert_eq!(mask_national_id("9876543210"), "98-****-****");
        assert_eq!(mask_national_id("12"), "**");
    }

    #[test]
    fn masks_name() {
        assert_eq!(mask_name("John Doe Smith"), "John ***");
        assert_eq!(mask_name("Jane Smith"), "Jane ***");
        assert_eq!(mask_name("Cher"), "C***");
    }

    #[test]
    fn null_and_public_pass_through() {
        assert_eq!(mask_value(&Value::Null, MaskKind::Email), Value::Null);
        assert_eq!(mask_value(&json!(42), MaskKind::Public), json!(42));
    }

    #[test]
    fn numeric_phone_cell_is_stringified_then_masked() {
        assert_eq!(mask_value(&json!(66812345678u64), MaskKind::Phone), json!("668****78"));
    }

    #[test]
    fn apply_preserves_row_count_and_order() {
        let mut result = QueryResult {
            columns: vec!["customer_id".into(), "email".into()],
            rows: vec![
                json!({"customer_id": 1, "email": "john.doe@example.com"})
                    .as_object()
                    .unwrap()
                    .clone(),
                json!({"customer_id": 2, "email": "jane@test.com"})
                    .as_object()
                    .unwrap()
                    .clone(),
            ],
            row_count: 2,
            truncated: false,
        };
        apply(&mut result, &FieldClassification::builtin());
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["customer_id"], json!(1));
        assert_eq!(result.rows[0]["email"], json!("jo***@example.com"));
        assert_eq!(result.rows[1]["email"], json!("ja***@test.com"));
    }

    #[test]
    fn unclassified_columns_pass_through() {
        let mut result = QueryResult {
            columns: vec!["note".into()],
            rows: vec![json!({"note": "hello"}).as_object().unwrap().clone()],
            row_count: 1,
            truncated: false,
        };
        apply(&mut result, &FieldClassification::builtin());
        assert_eq!(result.rows[0]["note"], json!("hello"));
    }

    #[test]
    fn sanitizes_classified_parameter_keys() {
        let params = json!({"email": "john.doe@example.com", "limit": 10})
            .as_object()
            .unwrap()
            .clone();
        let sanitized = sanitize_parameters(&params, &FieldClassification::builtin());
        assert_eq!(sanitized["email"], json!("jo***@example.com"));
        assert_eq!(sanitized["limit"], json!(10));
    }

    proptest! {
        /// Masking is a pure function: equal inputs give equal outputs.
        #[test]
        fn masking_is_deterministic(value in ".{0,64}") {
            prop_assert_eq!(mask_email(&value), mask_email(&value));
            prop_assert_eq!(mask_phone(&value), mask_phone(&value));
            prop_assert_eq!(mask_national_id(&value), mask_national_id(&value));
            prop_assert_eq!(mask_name(&value), mask_name(&value));
        }

        /// A masked email never exposes more than two local-part
        /// characters before the `@`.
        #[test]
        fn masked_email_hides_local_part(local in "[a-z]{3,20}", domain in "[a-z]{1,10}\\.com") {
            let masked = mask_email(&format!("{local}@{domain}"));
            let shown = masked.split('@').next().unwrap();
            prop_assert!(shown.len() <= 5); // two kept chars + "***"
            prop_assert!(shown.ends_with("***"));
        }
    }
}
