use chrono::NaiveDate;
use serde::Serialize;

use super::draft::Answers;
use super::schema::{FieldKind, FormField, FormSection};

/// A single rejected answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Raised when a section submission fails the renderer's checks; blocks `advance`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("section '{section}' has {} invalid field(s)", .violations.len())]
pub struct ValidationError {
    pub section: String,
    pub violations: Vec<FieldViolation>,
}

/// Check a section's answers against required flags, bounds, options, and formats.
///
/// Every field is inspected so the caller can surface all problems at once. Keys
/// that do not belong to the section are ignored, mirroring the merge rule.
pub fn validate_section(section: &FormSection, answers: &Answers) -> Result<(), ValidationError> {
    let violations: Vec<FieldViolation> = section
        .fields
        .iter()
        .filter_map(|field| check_field(field, answers.get(&field.name).map(String::as_str)))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            section: section.id.clone(),
            violations,
        })
    }
}

fn check_field(field: &FormField, value: Option<&str>) -> Option<FieldViolation> {
    let value = value.map(str::trim).filter(|value| !value.is_empty());
    let Some(value) = value else {
        return field
            .required
            .then(|| violation(field, format!("{} is required", field.label)));
    };

    match &field.kind {
        FieldKind::ShortText | FieldKind::LongText => None,
        FieldKind::Email => (!looks_like_email(value))
            .then(|| violation(field, "enter a valid email address".to_string())),
        FieldKind::Phone => (!looks_like_phone(value))
            .then(|| violation(field, "enter a valid phone number".to_string())),
        FieldKind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .err()
            .map(|_| violation(field, "dates must use YYYY-MM-DD".to_string())),
        FieldKind::Number { min, max } => match value.parse::<f64>() {
            Ok(number) if !number.is_finite() => {
                Some(violation(field, "must be a number".to_string()))
            }
            Ok(number) => {
                if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
                    Some(violation(field, bounds_message(*min, *max)))
                } else {
                    None
                }
            }
            Err(_) => Some(violation(field, "must be a number".to_string())),
        },
        FieldKind::Select { options } => (!options.iter().any(|option| option.value == value))
            .then(|| violation(field, format!("'{value}' is not one of the listed options"))),
    }
}

fn violation(field: &FormField, message: String) -> FieldViolation {
    FieldViolation {
        field: field.name.clone(),
        message,
    }
}

fn bounds_message(min: Option<f64>, max: Option<f64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("must be between {min} and {max}"),
        (Some(min), None) => format!("must be at least {min}"),
        (None, Some(max)) => format!("must be at most {max}"),
        (None, None) => "out of range".to_string(),
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn looks_like_phone(value: &str) -> bool {
    let digits = value.chars().filter(char::is_ascii_digit).count();
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '+' | '.'));
    allowed && (7..=15).contains(&digits)
}
