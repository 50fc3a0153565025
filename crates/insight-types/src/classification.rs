//! Field classification registry consumed by the PII mask.
//!
//! The registry maps result column names to a masking kind. It is loaded
//! once at startup (built-in defaults, optionally overridden from a TOML
//! file) and never mutated afterwards.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a classified column is redacted before results leave the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskKind {
    /// No redaction.
    Public,
    /// Keep the first two characters of the local part and the domain.
    Email,
    /// Keep the first three and last two significant characters.
    Phone,
    /// Keep the first two significant characters.
    NationalId,
    /// Keep the first whitespace-delimited token.
    Name,
}

/// Column aliases shipped with the gateway. Mirrors the upstream
/// classification registry; column matching is case-insensitive.
static BUILTIN: Lazy<HashMap<&'static str, MaskKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for col in ["email", "email_address", "user_email"] {
        m.insert(col, MaskKind::Email);
    }
    for col in ["phone", "phone_number", "mobile", "telephone"] {
        m.insert(col, MaskKind::Phone);
    }
    for col in ["national_id", "ssn", "id_number", "citizen_id"] {
        m.insert(col, MaskKind::NationalId);
    }
    for col in ["full_name", "customer_name", "user_name"] {
        m.insert(col, MaskKind::Name);
    }
    m
});

/// Static mapping of column name to masking kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldClassification {
    columns: HashMap<String, MaskKind>,
}

impl FieldClassification {
    /// Registry with the built-in column aliases only.
    pub fn builtin() -> Self {
        let columns = BUILTIN
            .iter()
            .map(|(col, kind)| (col.to_string(), *kind))
            .collect();
        Self { columns }
    }

    /// Registry from explicit entries, merged over the built-ins.
    /// Explicit entries win, so a column can be reclassified `Public`.
    pub fn with_overrides(overrides: HashMap<String, MaskKind>) -> Self {
        let mut base = Self::builtin();
        for (col, kind) in overrides {
            base.columns.insert(col.to_lowercase(), kind);
        }
        base
    }

    /// Classification for a column, `Public` when unclassified.
    pub fn kind_of(&self, column: &str) -> MaskKind {
        self.columns
            .get(&column.to_lowercase())
            .copied()
            .unwrap_or(MaskKind::Public)
    }

    /// True if the column requires redaction.
    pub fn is_sensitive(&self, column: &str) -> bool {
        self.kind_of(column) != MaskKind::Public
    }
}
