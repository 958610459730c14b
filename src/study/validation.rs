//! Upload validation: file-level checks before queueing, content checks
//! after the file has been read.
//!
//! Both the upload queue of the table engine and the server's upload
//! endpoint run the same rules, so a file that passes on the client is
//! accepted by the server and vice versa.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::{FIELDS, MANDATORY_FIELDS, SEX_VALUES, StudyRecord, display_value};

/// The only content type accepted for study uploads.
pub const ALLOWED_CONTENT_TYPE: &str = "application/json";

/// `DD-MM-YYYY` at the start of the value; a time suffix is allowed.
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}-\d{2}-\d{4}").expect("date regex must compile"));

/// Age in whole years, e.g. `45Y`.
static AGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+Y$").expect("age regex must compile"));

/// Reasons a study file is rejected. Record numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported file type '{0}', only application/json is accepted")]
    UnsupportedType(String),
    #[error("file is too large ({size} bytes, max. {max} bytes)")]
    TooLarge { size: u64, max: u64 },
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("JSON must be an array of studies")]
    NotAnArray,
    #[error("record {record} is not an object")]
    NotAnObject { record: usize },
    #[error("missing required field \"{field}\" in record {record}")]
    MissingField { field: &'static str, record: usize },
    #[error("field \"{field}\" must not be empty in record {record}")]
    EmptyField { field: &'static str, record: usize },
    #[error("invalid date format in record {record} (expected DD-MM-YYYY)")]
    InvalidDate { record: usize },
    #[error("invalid age format in record {record} (expected e.g. 45Y)")]
    InvalidAge { record: usize },
    #[error("invalid sex in record {record} (expected M, F or D)")]
    InvalidSex { record: usize },
}

/// Check a file's declared type and size before it is read.
///
/// A declared type is accepted when its essence is `application/json`
/// (parameters such as `; charset=utf-8` are ignored).
pub fn check_file(content_type: &str, size: u64, max_size: u64) -> Result<(), ValidationError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if essence != ALLOWED_CONTENT_TYPE {
        return Err(ValidationError::UnsupportedType(content_type.to_string()));
    }
    if size > max_size {
        return Err(ValidationError::TooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

/// Parse and validate the content of a study file.
///
/// The content must be a JSON array of objects, each carrying every field
/// of [`FIELDS`]. Optional fields may be `null`; mandatory ones must hold a
/// non-empty value. Validation stops at the first offending record.
pub fn validate_batch(content: &str) -> Result<Vec<StudyRecord>, ValidationError> {
    let data: Value =
        serde_json::from_str(content).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    let Value::Array(items) = data else {
        return Err(ValidationError::NotAnArray);
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| validate_record(item, idx + 1))
        .collect()
}

fn validate_record(item: &Value, record: usize) -> Result<StudyRecord, ValidationError> {
    let Value::Object(map) = item else {
        return Err(ValidationError::NotAnObject { record });
    };

    let mut values: [Option<String>; 13] = Default::default();
    for (slot, field) in values.iter_mut().zip(FIELDS) {
        let value = map
            .get(field)
            .ok_or(ValidationError::MissingField { field, record })?;
        let text = display_value(value);
        if text.trim().is_empty() {
            if MANDATORY_FIELDS.contains(&field) {
                return Err(ValidationError::EmptyField { field, record });
            }
            continue;
        }
        *slot = Some(text);
    }

    let study = StudyRecord { values };

    let date = study.get("Studiendatum").unwrap_or_default();
    if !DATE_RE.is_match(date) {
        return Err(ValidationError::InvalidDate { record });
    }
    let age = study.get("Patientenalter").unwrap_or_default();
    if !AGE_RE.is_match(age) {
        return Err(ValidationError::InvalidAge { record });
    }
    let sex = study.get("Patientengeschlecht").unwrap_or_default();
    if !SEX_VALUES.contains(&sex) {
        return Err(ValidationError::InvalidSex { record });
    }

    Ok(study)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn study() -> Value {
        json!({
            "Modalität": "CT",
            "Studiendatum": "12-03-2024 10:15",
            "Studienbeschreibung": "CT Thorax",
            "Anfragename": null,
            "Institution": "Klinikum Nord",
            "Anfragende Abteilung": "Innere",
            "Anfragender Arzt": "Dr. Weber",
            "Überweiser": null,
            "Befundverfasser": "Dr. Roth",
            "Patientengeschlecht": "F",
            "Patientenalter": "54Y",
            "Diagnose": null,
            "Untersuchungsstatus": "befundet"
        })
    }

    #[test]
    fn accepts_valid_batch() {
        let content = json!([study(), study()]).to_string();
        let records = validate_batch(&content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("Modalität"), Some("CT"));
        assert_eq!(records[0].get("Anfragename"), None);
    }

    #[test]
    fn rejects_non_array() {
        let content = study().to_string();
        assert_eq!(validate_batch(&content), Err(ValidationError::NotAnArray));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            validate_batch("[{"),
            Err(ValidationError::InvalidJson(_))
        ));
    }

    #[test]
    fn reports_missing_field_with_record_number() {
        let mut second = study();
        second.as_object_mut().unwrap().remove("Befundverfasser");
        let content = json!([study(), second]).to_string();
        assert_eq!(
            validate_batch(&content),
            Err(ValidationError::MissingField {
                field: "Befundverfasser",
                record: 2
            })
        );
    }

    #[test]
    fn rejects_null_mandatory_field() {
        let mut item = study();
        item["Institution"] = Value::Null;
        let content = json!([item]).to_string();
        assert_eq!(
            validate_batch(&content),
            Err(ValidationError::EmptyField {
                field: "Institution",
                record: 1
            })
        );
    }

    #[test]
    fn rejects_bad_date_age_and_sex() {
        let mut bad_date = study();
        bad_date["Studiendatum"] = json!("2024-03-12");
        assert_eq!(
            validate_batch(&json!([bad_date]).to_string()),
            Err(ValidationError::InvalidDate { record: 1 })
        );

        let mut bad_age = study();
        bad_age["Patientenalter"] = json!("54 Jahre");
        assert_eq!(
            validate_batch(&json!([bad_age]).to_string()),
            Err(ValidationError::InvalidAge { record: 1 })
        );

        let mut bad_sex = study();
        bad_sex["Patientengeschlecht"] = json!("X");
        assert_eq!(
            validate_batch(&json!([bad_sex]).to_string()),
            Err(ValidationError::InvalidSex { record: 1 })
        );
    }

    #[test]
    fn check_file_enforces_type_and_size() {
        assert!(check_file("application/json", 10, 100).is_ok());
        assert!(check_file("application/json; charset=utf-8", 10, 100).is_ok());
        assert_eq!(
            check_file("text/plain", 10, 100),
            Err(ValidationError::UnsupportedType("text/plain".to_string()))
        );
        assert_eq!(
            check_file("application/json", 101, 100),
            Err(ValidationError::TooLarge { size: 101, max: 100 })
        );
    }

    #[test]
    fn error_messages_name_the_record() {
        let err = ValidationError::MissingField {
            field: "Diagnose",
            record: 3,
        };
        assert_eq!(
            err.to_string(),
            "missing required field \"Diagnose\" in record 3"
        );
    }
}
