use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidValue,
    ConfigInvalidJson,
    ConfigInvalidYaml,
    ConfigInvalidToml,
    ConfigIdCollision,
    ConfigRoleUnresolved,

    EngineUnsupported,
    EngineAmbiguous,

    StepUnsupportedBackend,
    PermissionInvalidLevel,

    ValidationInvalidArgument,

    InternalIoError,
    InternalJsonError,
    InternalYamlError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigIdCollision => "config.id_collision",
            ErrorCode::ConfigRoleUnresolved => "config.role_unresolved",

            ErrorCode::EngineUnsupported => "engine.unsupported",
            ErrorCode::EngineAmbiguous => "engine.ambiguous",

            ErrorCode::StepUnsupportedBackend => "step.unsupported_backend",
            ErrorCode::PermissionInvalidLevel => "permission.invalid_level",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalYamlError => "internal.yaml_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// True for errors caused by the pipeline configuration rather than the environment.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            ErrorCode::InternalIoError
                | ErrorCode::InternalJsonError
                | ErrorCode::InternalYamlError
                | ErrorCode::InternalUnexpected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigIdCollisionDetails {
    pub id: String,
    pub requested_type: String,
    pub existing_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUnresolvedDetails {
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub tried: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSelectionDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    pub candidates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepUnsupportedDetails {
    pub step: String,
    pub backend: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionInvalidLevelDetails {
    pub scope: String,
    pub value: String,
    pub allowed: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        let details = to_details(ConfigMissingKeyDetails {
            key: key.clone(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key '{}'", key),
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.clone(),
            value,
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", key, problem),
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::config_parse(ErrorCode::ConfigInvalidJson, "JSON", path, err.to_string())
    }

    pub fn config_invalid_yaml(path: impl Into<String>, err: serde_yml::Error) -> Self {
        Self::config_parse(ErrorCode::ConfigInvalidYaml, "YAML", path, err.to_string())
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: toml::de::Error) -> Self {
        Self::config_parse(ErrorCode::ConfigInvalidToml, "TOML", path, err.to_string())
    }

    fn config_parse(code: ErrorCode, format: &str, path: impl Into<String>, error: String) -> Self {
        let path = path.into();
        let details = to_details(ConfigParseDetails {
            path: path.clone(),
            error,
        });

        Self::new(
            code,
            format!("Invalid {} in pipeline configuration {}", format, path),
            details,
        )
    }

    pub fn config_id_collision(
        id: impl Into<String>,
        requested_type: impl Into<String>,
        existing_type: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let existing = existing_type.into();
        let details = to_details(ConfigIdCollisionDetails {
            id: id.clone(),
            requested_type: requested_type.into(),
            existing_type: existing.clone(),
        });

        Self::new(
            ErrorCode::ConfigIdCollision,
            format!("Stage name '{}' is already used by {}", id, existing),
            details,
        )
        .with_hint("Stage names must be unique across stages and independentStages")
    }

    pub fn config_role_unresolved(
        purpose: impl Into<String>,
        stage: Option<String>,
        tried: Vec<String>,
    ) -> Self {
        let purpose = purpose.into();
        let message = match &stage {
            Some(stage) => format!("No IAM role configured for {} of stage '{}'", purpose, stage),
            None => format!("No IAM role configured for {}", purpose),
        };
        let details = to_details(RoleUnresolvedDetails {
            purpose,
            stage,
            tried,
        });

        Self::new(ErrorCode::ConfigRoleUnresolved, message, details)
            .with_hint("Set iamRoleArns.default or a purpose-specific override")
            .with_hint("Set roleFallback: ambient to run without assuming a role")
    }

    pub fn engine_unsupported(requested: impl Into<String>) -> Self {
        let requested = requested.into();
        let details = to_details(EngineSelectionDetails {
            requested: Some(requested.clone()),
            candidates: Backend::ALL.iter().map(|b| b.as_str().to_string()).collect(),
        });

        Self::new(
            ErrorCode::EngineUnsupported,
            format!("Unsupported pipeline engine '{}'", requested),
            details,
        )
    }

    pub fn engine_ambiguous(requested: Option<String>, candidates: Vec<String>) -> Self {
        let message = format!(
            "Pipeline engine selection is ambiguous between {}",
            candidates.join(", ")
        );
        let details = to_details(EngineSelectionDetails {
            requested,
            candidates,
        });

        Self::new(ErrorCode::EngineAmbiguous, message, details)
            .with_hint("Set 'engine' and keep only the options block for that engine")
    }

    pub fn step_unsupported_backend(step: impl Into<String>, backend: Backend) -> Self {
        let step = step.into();
        let details = to_details(StepUnsupportedDetails {
            step: step.clone(),
            backend: backend.as_str().to_string(),
        });

        Self::new(
            ErrorCode::StepUnsupportedBackend,
            format!(
                "Step '{}' cannot be rendered for the {} engine",
                step,
                backend.as_str()
            ),
            details,
        )
    }

    pub fn permission_invalid_level(scope: impl Into<String>, value: impl Into<String>) -> Self {
        let scope = scope.into();
        let value = value.into();
        let details = to_details(PermissionInvalidLevelDetails {
            scope: scope.clone(),
            value: value.clone(),
            allowed: vec!["none".to_string(), "read".to_string(), "write".to_string()],
        });

        Self::new(
            ErrorCode::PermissionInvalidLevel,
            format!("Invalid access level '{}' for permission '{}'", value, scope),
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_yaml(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalYamlError, "YAML error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_collision_names_both_sides() {
        let err = Error::config_id_collision("dev", "independent stage", "stage");
        assert_eq!(err.code, ErrorCode::ConfigIdCollision);
        assert!(err.message.contains("'dev'"));
        assert_eq!(err.details["existingType"], "stage");
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn role_unresolved_mentions_stage() {
        let err = Error::config_role_unresolved(
            "deployment",
            Some("prod".to_string()),
            vec!["deployment.prod".to_string(), "default".to_string()],
        );
        assert!(err.message.contains("'prod'"));
        assert_eq!(err.details["tried"][1], "default");
    }

    #[test]
    fn unsupported_engine_lists_candidates() {
        let err = Error::engine_unsupported("jenkins");
        assert_eq!(err.code.as_str(), "engine.unsupported");
        assert_eq!(err.details["candidates"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn internal_codes_are_not_configuration_errors() {
        assert!(ErrorCode::PermissionInvalidLevel.is_configuration());
        assert!(!ErrorCode::InternalIoError.is_configuration());
    }
}
