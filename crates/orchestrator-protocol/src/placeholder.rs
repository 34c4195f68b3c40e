//! Two-stage `${...}` placeholder resolution.
//!
//! Blueprints and parameters may carry `${namespace.key}` tokens. Stage 1
//! runs on the coordinator at run creation and substitutes `runtime`,
//! `params`, `scope`, and `env` values, leaving `${runner.*}` tokens
//! verbatim. Stage 2 runs on the runner immediately before executor spawn
//! and substitutes only `${runner.orchestrator_mcp_url}`.
//!
//! Each stage is a single pass: the walk descends into objects and arrays
//! but never rescans resolved text. Substitution is textual within string
//! values; non-string scalars in the tree are left untouched.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z0-9_.\-]+)\}").expect("placeholder pattern")
});

/// Namespace reserved for stage-2 resolution on the runner.
pub const RUNNER_NAMESPACE: &str = "runner";

/// The single token the runner resolves.
pub const RUNNER_MCP_URL_KEY: &str = "orchestrator_mcp_url";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
    #[error("unresolved placeholder `{token}`")]
    Unresolved { token: String },

    #[error("unknown placeholder namespace in `{token}`")]
    UnknownNamespace { token: String },
}

/// Values available to stage-1 resolution.
#[derive(Debug, Clone, Default)]
pub struct StageOneVars {
    /// Backs `${runtime.session_id}`.
    pub session_id: String,
    /// Validated run parameters, backs `${params.<name>}`.
    pub params: Value,
    /// Caller-supplied scope, backs `${scope.<key>}`.
    pub scope: HashMap<String, String>,
    /// Coordinator environment snapshot, backs `${env.<NAME>}`.
    pub env: HashMap<String, String>,
}

/// Resolve every non-`runner` placeholder in `value` in place.
///
/// `${runner.*}` tokens are left verbatim for stage 2. Any other token
/// that cannot be resolved is an error.
pub fn resolve_stage_one(value: &mut Value, vars: &StageOneVars) -> Result<(), PlaceholderError> {
    walk(value, &mut |namespace, key, token| match namespace {
        RUNNER_NAMESPACE => Ok(None),
        "runtime" => {
            if key == "session_id" {
                Ok(Some(vars.session_id.clone()))
            } else {
                Err(PlaceholderError::Unresolved {
                    token: token.to_string(),
                })
            }
        }
        "params" => match vars.params.get(key) {
            Some(v) => Ok(Some(value_as_text(v))),
            None => Err(PlaceholderError::Unresolved {
                token: token.to_string(),
            }),
        },
        "scope" => match vars.scope.get(key) {
            Some(v) => Ok(Some(v.clone())),
            None => Err(PlaceholderError::Unresolved {
                token: token.to_string(),
            }),
        },
        "env" => match vars.env.get(key) {
            Some(v) => Ok(Some(v.clone())),
            None => Err(PlaceholderError::Unresolved {
                token: token.to_string(),
            }),
        },
        _ => Err(PlaceholderError::UnknownNamespace {
            token: token.to_string(),
        }),
    })
}

/// Resolve `${runner.orchestrator_mcp_url}` in `value` in place.
///
/// Every other token still present at this point is an error: stage 1 must
/// have made the rest of the tree concrete.
pub fn resolve_stage_two(
    value: &mut Value,
    orchestrator_mcp_url: &str,
) -> Result<(), PlaceholderError> {
    walk(value, &mut |namespace, key, token| {
        if namespace == RUNNER_NAMESPACE && key == RUNNER_MCP_URL_KEY {
            Ok(Some(orchestrator_mcp_url.to_string()))
        } else {
            Err(PlaceholderError::Unresolved {
                token: token.to_string(),
            })
        }
    })
}

/// Textual rendering of a parameter value for substitution.
///
/// Strings are inserted raw; everything else uses its compact JSON form.
fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

type Lookup<'a> = dyn FnMut(&str, &str, &str) -> Result<Option<String>, PlaceholderError> + 'a;

fn walk(value: &mut Value, lookup: &mut Lookup<'_>) -> Result<(), PlaceholderError> {
    match value {
        Value::String(s) => {
            if let Some(resolved) = resolve_string(s, lookup)? {
                *s = resolved;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                walk(item, lookup)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                walk(item, lookup)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Substitute every token in one string. Returns `None` when nothing
/// changed. The output is never rescanned.
fn resolve_string(
    input: &str,
    lookup: &mut Lookup<'_>,
) -> Result<Option<String>, PlaceholderError> {
    let mut output = String::new();
    let mut cursor = 0;
    let mut changed = false;

    for caps in PLACEHOLDER.captures_iter(input) {
        let full = caps.get(0).expect("capture 0");
        let namespace = &caps[1];
        let key = &caps[2];

        match lookup(namespace, key, full.as_str())? {
            Some(replacement) => {
                output.push_str(&input[cursor..full.start()]);
                output.push_str(&replacement);
                cursor = full.end();
                changed = true;
            }
            // Reserved for a later stage: keep the token verbatim.
            None => {}
        }
    }

    if !changed {
        return Ok(None);
    }
    output.push_str(&input[cursor..]);
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> StageOneVars {
        StageOneVars {
            session_id: "ses_0011223344556677".to_string(),
            params: json!({"url": "https://example.com", "depth": 3}),
            scope: HashMap::from([("project_dir".to_string(), "/srv/proj".to_string())]),
            env: HashMap::from([("REGION".to_string(), "eu-west-1".to_string())]),
        }
    }

    #[test]
    fn test_stage_one_substitutes_all_namespaces() {
        let mut value = json!({
            "args": ["--session", "${runtime.session_id}", "--url", "${params.url}"],
            "env": {
                "PROJECT": "${scope.project_dir}",
                "REGION": "${env.REGION}",
                "DEPTH": "depth=${params.depth}"
            }
        });
        resolve_stage_one(&mut value, &vars()).unwrap();
        assert_eq!(value["args"][1], "ses_0011223344556677");
        assert_eq!(value["args"][3], "https://example.com");
        assert_eq!(value["env"]["PROJECT"], "/srv/proj");
        assert_eq!(value["env"]["REGION"], "eu-west-1");
        assert_eq!(value["env"]["DEPTH"], "depth=3");
    }

    #[test]
    fn test_stage_one_leaves_runner_tokens_verbatim() {
        let mut value = json!({"url": "${runner.orchestrator_mcp_url}/mcp"});
        resolve_stage_one(&mut value, &vars()).unwrap();
        assert_eq!(value["url"], "${runner.orchestrator_mcp_url}/mcp");
    }

    #[test]
    fn test_stage_one_rejects_unknown_param() {
        let mut value = json!({"x": "${params.missing}"});
        let err = resolve_stage_one(&mut value, &vars()).unwrap_err();
        assert_eq!(
            err,
            PlaceholderError::Unresolved {
                token: "${params.missing}".to_string()
            }
        );
    }

    #[test]
    fn test_stage_one_rejects_unknown_namespace() {
        let mut value = json!("${secrets.token}");
        let err = resolve_stage_one(&mut value, &vars()).unwrap_err();
        assert!(matches!(err, PlaceholderError::UnknownNamespace { .. }));
    }

    #[test]
    fn test_stage_one_does_not_touch_non_string_scalars() {
        let mut value = json!({"n": 42, "b": true, "null": null});
        let before = value.clone();
        resolve_stage_one(&mut value, &vars()).unwrap();
        assert_eq!(value, before);
    }

    #[test]
    fn test_stage_one_does_not_rescan_resolved_text() {
        // A param whose value looks like a placeholder must not be expanded.
        let mut vars = vars();
        vars.params = json!({"tricky": "${env.REGION}"});
        let mut value = json!("${params.tricky}");
        resolve_stage_one(&mut value, &vars).unwrap();
        assert_eq!(value, "${env.REGION}");
    }

    #[test]
    fn test_stage_two_substitutes_mcp_url() {
        let mut value = json!({"url": "${runner.orchestrator_mcp_url}/mcp"});
        resolve_stage_two(&mut value, "http://127.0.0.1:39211").unwrap();
        assert_eq!(value["url"], "http://127.0.0.1:39211/mcp");
    }

    #[test]
    fn test_stage_two_rejects_any_other_token() {
        let mut value = json!("${runner.port}");
        assert!(resolve_stage_two(&mut value, "http://x").is_err());

        let mut leftover = json!("${params.url}");
        assert!(resolve_stage_two(&mut leftover, "http://x").is_err());
    }
}
