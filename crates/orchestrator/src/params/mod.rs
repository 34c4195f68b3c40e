//! JSON-Schema (Draft-07) validation of run parameters.
//!
//! Failures carry the full schema so an AI caller can self-correct, plus
//! one issue per violated path.

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One violated schema path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Instance path in `$.a.b` form.
    pub path: String,
    pub message: String,
    /// Path into the schema that rejected the value.
    pub schema_path: String,
}

/// The full validation failure surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub schema: Value,
    pub validation_errors: Vec<ValidationIssue>,
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("parameters do not satisfy the agent's schema")]
    Invalid(Box<ValidationFailure>),

    /// The blueprint itself carries a broken schema.
    #[error("invalid parameters schema: {0}")]
    BadSchema(String),
}

/// Validate `params` against a Draft-07 `schema`.
pub fn validate_params(schema: &Value, params: &Value) -> Result<(), ParamsError> {
    let validator = jsonschema::options()
        .with_draft(Draft::Draft7)
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| ParamsError::BadSchema(e.to_string()))?;

    let issues: Vec<ValidationIssue> = validator
        .iter_errors(params)
        .map(|error| ValidationIssue {
            path: jsonpath_of(&error.instance_path.to_string()),
            message: error.to_string(),
            schema_path: error.schema_path.to_string(),
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ParamsError::Invalid(Box::new(ValidationFailure {
            schema: schema.clone(),
            validation_errors: issues,
        })))
    }
}

/// `/url/0` → `$.url.0`; the root pointer maps to `$`.
fn jsonpath_of(pointer: &str) -> String {
    if pointer.is_empty() {
        "$".to_string()
    } else {
        format!("${}", pointer.replace('/', "."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_protocol::agents::implicit_prompt_schema;
    use serde_json::json;

    #[test]
    fn test_implicit_prompt_schema_accepts_prompt() {
        let schema = implicit_prompt_schema();
        assert!(validate_params(&schema, &json!({"prompt": "Hello"})).is_ok());
    }

    #[test]
    fn test_missing_prompt_rejected() {
        let schema = implicit_prompt_schema();
        let err = validate_params(&schema, &json!({})).unwrap_err();
        let ParamsError::Invalid(failure) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(failure.validation_errors.len(), 1);
        assert_eq!(failure.validation_errors[0].path, "$");
        assert_eq!(failure.schema, schema);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        let schema = implicit_prompt_schema();
        assert!(validate_params(&schema, &json!({"prompt": ""})).is_err());
    }

    #[test]
    fn test_uri_format_enforced() {
        let schema = json!({
            "type": "object",
            "required": ["url"],
            "properties": {"url": {"type": "string", "format": "uri"}}
        });
        assert!(validate_params(&schema, &json!({"url": "https://example.com"})).is_ok());

        let err = validate_params(&schema, &json!({"url": "not-a-url"})).unwrap_err();
        let ParamsError::Invalid(failure) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(failure.validation_errors[0].path, "$.url");
    }

    #[test]
    fn test_broken_schema_surfaces() {
        let schema = json!({"type": 42});
        assert!(matches!(
            validate_params(&schema, &json!({})),
            Err(ParamsError::BadSchema(_))
        ));
    }
}
