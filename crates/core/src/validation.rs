// JSON Schema validation for untrusted JSON
//
// Gateway response bodies and tool arguments both come from outside the
// process. They are checked with the same helper before use.

use serde_json::Value;

/// Outcome of validating a JSON value against a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// One human-readable entry per violation
    Invalid(Vec<String>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Violations joined for logging
    pub fn describe(&self) -> String {
        match self {
            Validation::Valid => "valid".to_string(),
            Validation::Invalid(errors) => errors.join("; "),
        }
    }
}

/// Validate `instance` against `schema`
///
/// A schema that does not compile is reported as a single violation.
pub fn validate(schema: &Value, instance: &Value) -> Validation {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => return Validation::Invalid(vec![format!("invalid JSON Schema document: {e}")]),
    };

    if validator.is_valid(instance) {
        return Validation::Valid;
    }

    Validation::Invalid(
        validator
            .iter_errors(instance)
            .map(|error| format!("at '{}': {}", error.instance_path, error))
            .collect(),
    )
}
