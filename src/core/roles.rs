//! IAM role resolution.
//!
//! Each purpose walks from its most specific override to `default`. What
//! happens when nothing matches is decided by [`RoleFallback`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamRoleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_publishing: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub asset_publishing_per_stage: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diff: BTreeMap<String, String>,
}

/// Policy when no override and no `default` role applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleFallback {
    /// Missing roles are configuration errors.
    #[default]
    Require,
    /// Missing roles mean the job runs with ambient credentials.
    Ambient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePurpose<'a> {
    Synth,
    AssetPublishing,
    AssetPublishingForStage(&'a str),
    Deployment(&'a str),
    Diff(&'a str),
}

impl RolePurpose<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            RolePurpose::Synth => "synth",
            RolePurpose::AssetPublishing | RolePurpose::AssetPublishingForStage(_) => {
                "asset publishing"
            }
            RolePurpose::Deployment(_) => "deployment",
            RolePurpose::Diff(_) => "diff",
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            RolePurpose::Synth | RolePurpose::AssetPublishing => None,
            RolePurpose::AssetPublishingForStage(stage)
            | RolePurpose::Deployment(stage)
            | RolePurpose::Diff(stage) => Some(stage),
        }
    }
}

impl IamRoleConfig {
    /// Candidate keys for `purpose`, most specific first, each with its value.
    fn chain(&self, purpose: RolePurpose<'_>) -> Vec<(String, Option<&String>)> {
        let default = ("default".to_string(), self.default.as_ref());
        match purpose {
            RolePurpose::Synth => vec![("synth".to_string(), self.synth.as_ref())],
            RolePurpose::AssetPublishing => vec![
                ("assetPublishing".to_string(), self.asset_publishing.as_ref()),
                default,
            ],
            RolePurpose::AssetPublishingForStage(stage) => vec![
                (
                    format!("assetPublishingPerStage.{}", stage),
                    self.asset_publishing_per_stage.get(stage),
                ),
                ("assetPublishing".to_string(), self.asset_publishing.as_ref()),
                default,
            ],
            RolePurpose::Deployment(stage) => vec![
                (format!("deployment.{}", stage), self.deployment.get(stage)),
                default,
            ],
            RolePurpose::Diff(stage) => vec![
                (format!("diff.{}", stage), self.diff.get(stage)),
                (format!("deployment.{}", stage), self.deployment.get(stage)),
                default,
            ],
        }
    }

    /// Resolve the role for `purpose`.
    ///
    /// The synth role never falls back to `default` and is never required.
    pub fn resolve(&self, purpose: RolePurpose<'_>, fallback: RoleFallback) -> Result<Option<String>> {
        let chain = self.chain(purpose);
        if let Some(role) = chain.iter().find_map(|(_, value)| value.cloned()) {
            return Ok(Some(role));
        }

        if purpose == RolePurpose::Synth {
            return Ok(None);
        }

        match fallback {
            RoleFallback::Ambient => {
                log::debug!(
                    "No role for {} ({:?}), using ambient credentials",
                    purpose.label(),
                    purpose.stage()
                );
                Ok(None)
            }
            RoleFallback::Require => Err(Error::config_role_unresolved(
                purpose.label(),
                purpose.stage().map(str::to_string),
                chain.into_iter().map(|(key, _)| key).collect(),
            )),
        }
    }

    pub fn has_per_stage_publishing(&self) -> bool {
        !self.asset_publishing_per_stage.is_empty()
    }

    /// Every stage name referenced by a per-stage override.
    pub(crate) fn referenced_stages(&self) -> impl Iterator<Item = (&'static str, &String)> {
        self.asset_publishing_per_stage
            .keys()
            .map(|k| ("assetPublishingPerStage", k))
            .chain(self.deployment.keys().map(|k| ("deployment", k)))
            .chain(self.diff.keys().map(|k| ("diff", k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn roles() -> IamRoleConfig {
        IamRoleConfig {
            default: Some("arn:default".to_string()),
            synth: None,
            asset_publishing: Some("arn:assets".to_string()),
            asset_publishing_per_stage: BTreeMap::from([(
                "prod".to_string(),
                "arn:assets-prod".to_string(),
            )]),
            deployment: BTreeMap::from([("prod".to_string(), "arn:deploy-prod".to_string())]),
            diff: BTreeMap::from([("dev".to_string(), "arn:diff-dev".to_string())]),
        }
    }

    #[test]
    fn most_specific_override_wins() {
        let r = roles();
        let resolve = |p| r.resolve(p, RoleFallback::Require).unwrap();
        assert_eq!(resolve(RolePurpose::Deployment("prod")).as_deref(), Some("arn:deploy-prod"));
        assert_eq!(
            resolve(RolePurpose::AssetPublishingForStage("prod")).as_deref(),
            Some("arn:assets-prod")
        );
        assert_eq!(resolve(RolePurpose::Diff("dev")).as_deref(), Some("arn:diff-dev"));
    }

    #[test]
    fn broader_override_before_default() {
        let r = roles();
        assert_eq!(
            r.resolve(RolePurpose::AssetPublishingForStage("dev"), RoleFallback::Require)
                .unwrap()
                .as_deref(),
            Some("arn:assets")
        );
        assert_eq!(
            r.resolve(RolePurpose::Diff("prod"), RoleFallback::Require)
                .unwrap()
                .as_deref(),
            Some("arn:deploy-prod")
        );
    }

    #[test]
    fn falls_back_to_default() {
        let r = roles();
        assert_eq!(
            r.resolve(RolePurpose::Deployment("dev"), RoleFallback::Require)
                .unwrap()
                .as_deref(),
            Some("arn:default")
        );
    }

    #[test]
    fn synth_never_uses_default() {
        let r = roles();
        assert_eq!(r.resolve(RolePurpose::Synth, RoleFallback::Require).unwrap(), None);
    }

    #[test]
    fn missing_default_is_error_when_required() {
        let r = IamRoleConfig::default();
        let err = r
            .resolve(RolePurpose::Deployment("dev"), RoleFallback::Require)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigRoleUnresolved);
        assert_eq!(err.details["stage"], "dev");
        assert_eq!(err.details["tried"][0], "deployment.dev");
    }

    #[test]
    fn missing_default_is_ambient_when_allowed() {
        let r = IamRoleConfig::default();
        assert_eq!(
            r.resolve(RolePurpose::AssetPublishing, RoleFallback::Ambient).unwrap(),
            None
        );
    }
}
