//! Participant name validation.

use crate::registry::Registry;
use thiserror::Error;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 20;

/// Names that could be mistaken for the facilitator or the server itself.
pub const RESERVED_NAMES: &[&str] = &[
    "master",
    "admin",
    "system",
    "server",
    "scrum",
    "poker",
    "facilitator",
    "showdown",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name must be at least {} characters", MIN_NAME_LENGTH)]
    TooShort,

    #[error("name must be at most {} characters", MAX_NAME_LENGTH)]
    TooLong,

    #[error("name contains control characters")]
    ControlCharacter,

    #[error("name contains invalid characters (use only letters, numbers, spaces, - or _)")]
    InvalidCharacter,

    #[error("name '{0}' is reserved")]
    Reserved(String),

    #[error("name already taken")]
    Taken,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_')
}

/// Check the shape of `candidate` and return it trimmed.
pub fn validate_name_format(candidate: &str) -> Result<&str, NameError> {
    let name = candidate.trim();
    let length = name.chars().count();
    if length < MIN_NAME_LENGTH {
        return Err(NameError::TooShort);
    }
    if length > MAX_NAME_LENGTH {
        return Err(NameError::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(NameError::ControlCharacter);
    }
    if !name.chars().all(is_allowed) {
        return Err(NameError::InvalidCharacter);
    }
    if RESERVED_NAMES
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
    {
        return Err(NameError::Reserved(name.to_string()));
    }
    Ok(name)
}

/// Full validation including the uniqueness check.
///
/// The uniqueness check is advisory: registration re-checks under the write
/// lock, so two connections racing for the same free name cannot both win.
pub fn validate_name<'a>(candidate: &'a str, registry: &Registry) -> Result<&'a str, NameError> {
    let name = validate_name_format(candidate)?;
    if registry.contains(name) {
        return Err(NameError::Taken);
    }
    Ok(name)
}
