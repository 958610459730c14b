//! Study record model shared by the server and the table engine.
//!
//! A study arrives as a JSON object keyed by German field names
//! (`"Modalität"`, `"Anfragender Arzt"`, ...). The store and the table bind
//! columns by a canonical identifier derived from those names, see
//! [`column_id`].

pub mod validation;

use serde_json::Value;

pub use validation::{ValidationError, validate_batch};

/// Upload field names in storage column order.
pub const FIELDS: [&str; 13] = [
    "Modalität",
    "Studiendatum",
    "Studienbeschreibung",
    "Anfragename",
    "Institution",
    "Anfragende Abteilung",
    "Anfragender Arzt",
    "Überweiser",
    "Befundverfasser",
    "Patientengeschlecht",
    "Patientenalter",
    "Diagnose",
    "Untersuchungsstatus",
];

/// Fields the store refuses to persist as NULL.
pub const MANDATORY_FIELDS: [&str; 6] = [
    "Modalität",
    "Studiendatum",
    "Institution",
    "Patientengeschlecht",
    "Patientenalter",
    "Untersuchungsstatus",
];

/// Column holding the study date (`DD-MM-YYYY`).
pub const DATE_COLUMN: &str = "studiendatum";

/// Column holding the patient age (`<n>Y`).
pub const AGE_COLUMN: &str = "patientenalter";

/// Accepted values of `Patientengeschlecht`.
pub const SEX_VALUES: [&str; 3] = ["M", "F", "D"];

/// One uploaded study, values in [`FIELDS`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyRecord {
    pub values: [Option<String>; 13],
}

impl StudyRecord {
    /// Value of a field by its upload name.
    pub fn get(&self, field: &str) -> Option<&str> {
        let idx = FIELDS.iter().position(|f| *f == field)?;
        self.values[idx].as_deref()
    }
}

/// Canonical column identifier for a field or JSON key.
///
/// Lowercases, replaces whitespace runs with `_` and transliterates umlauts:
/// `"Anfragender Arzt"` → `"anfragender_arzt"`, `"Überweiser"` → `"ueberweiser"`.
/// Already canonical keys are returned unchanged.
pub fn column_id(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut in_space = false;
    for ch in key.trim().chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        for lower in ch.to_lowercase() {
            match lower {
                'ä' => out.push_str("ae"),
                'ö' => out.push_str("oe"),
                'ü' => out.push_str("ue"),
                other => out.push(other),
            }
        }
    }
    out
}

/// Human-readable header label for a column identifier.
///
/// Known study columns map back to their German field names; anything else
/// is shown as-is.
pub fn column_label(column: &str) -> String {
    FIELDS
        .iter()
        .find(|field| column_id(field) == column)
        .map(|field| field.to_string())
        .unwrap_or_else(|| column.to_string())
}

/// Text shown in a table cell for a JSON value.
///
/// Strings are shown verbatim, `null` as empty text, everything else as its
/// JSON rendering.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
