//! HelmRelease Custom Resource Definition
//!
//! A HelmRelease declares that a named Helm release should run a given chart
//! version with a given set of values. The controller owns only the status
//! subresource; everything under `spec` is user input.

use std::time::Duration;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{Condition, ConditionType};
use super::duration::parse_duration;
use super::phase::Phase;
use super::values::Values;
use crate::error::{Error, Result};

/// Finalizer guarding deletion until the release has been uninstalled.
pub const FINALIZER: &str = "helmsync.io/finalizer";

/// Values key read from ConfigMaps and Secrets when none is given.
pub const DEFAULT_VALUES_KEY: &str = "values.yaml";

/// Desired state of a Helm release
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "helmsync.io",
    version = "v1alpha1",
    kind = "HelmRelease",
    plural = "helmreleases",
    shortname = "hr",
    status = "HelmReleaseStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Revision","type":"string","jsonPath":".status.revision"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseSpec {
    pub chart: ChartSpec,

    /// Helm release name; defaults to `<targetNamespace>-<metadata.name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Namespace the release is installed into; defaults to the record's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Inline values, merged last
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "values_schema")]
    pub values: Option<serde_json::Value>,

    /// External values sources, merged in order before `values`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesReference>,

    /// Timeout for install, upgrade and uninstall (e.g. "300s", "5m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,

    #[serde(default)]
    pub force_upgrade: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_values: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_values: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<u32>,

    #[serde(default, rename = "skipCRDs")]
    pub skip_crds: bool,

    /// Suspend reconciliation of this record
    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub test: TestPolicy,

    #[serde(default)]
    pub rollback: RollbackPolicy,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub name: String,
    pub version: String,
    /// Chart repository URL
    pub repository: String,
    /// Secret holding repository credentials (`username`/`password`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum ValuesSourceKind {
    #[default]
    ConfigMap,
    Secret,
    #[serde(rename = "ExternalURL")]
    ExternalUrl,
    ChartFile,
}

impl std::fmt::Display for ValuesSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "ConfigMap"),
            Self::Secret => write!(f, "Secret"),
            Self::ExternalUrl => write!(f, "ExternalURL"),
            Self::ChartFile => write!(f, "ChartFile"),
        }
    }
}

/// One external values source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesReference {
    pub kind: ValuesSourceKind,

    /// Object name, URL (`ExternalURL`) or chart-relative path (`ChartFile`)
    pub name: String,

    /// Namespace of a ConfigMap or Secret; defaults to the record's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_key: Option<String>,

    /// Dotted path to set the raw content at, instead of merging a document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,

    #[serde(default)]
    pub optional: bool,
}

impl ValuesReference {
    pub fn values_key(&self) -> &str {
        self.values_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_VALUES_KEY)
    }

    /// Target path, treating an empty string as absent.
    pub fn target_path(&self) -> Option<&str> {
        self.target_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestPolicy {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_failures: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,
}

impl TestPolicy {
    pub fn ignore_failures(&self) -> bool {
        self.ignore_failures.unwrap_or(false)
    }

    pub fn cleanup(&self) -> bool {
        self.cleanup.unwrap_or(true)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPolicy {
    #[serde(default)]
    pub enable: bool,
    /// Retry the upgrade after a rollback
    #[serde(default)]
    pub retry: bool,
    /// Upper bound on upgrade retries after rollbacks; 0 means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub disable_hooks: bool,
    #[serde(default)]
    pub recreate: bool,
    #[serde(default)]
    pub force: bool,
}

impl RollbackPolicy {
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }
}

/// Observed state of a HelmRelease
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Chart version of the last successful release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Chart version of the last install or upgrade attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_revision: Option<String>,

    /// Revision number of the live release at the end of the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_release_revision: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Status reported by the release store for the live release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_status: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub rollback_count: u32,
}

impl HelmReleaseStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Fallbacks for optional spec fields, supplied by the controller config.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseDefaults {
    pub timeout: Duration,
    pub max_history: u32,
    pub wait: bool,
}

impl Default for ReleaseDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_history: 10,
            wait: true,
        }
    }
}

/// Whether an upgrade keeps the values of the previous release or starts
/// from the chart defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValuesPolicy {
    pub reuse_values: bool,
    pub reset_values: bool,
}

impl HelmRelease {
    pub fn target_namespace(&self) -> String {
        self.spec
            .target_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.namespace())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn release_name(&self) -> String {
        match self.spec.release_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}-{}", self.target_namespace(), self.name_any()),
        }
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    pub fn has_deletion_marker(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn status_or_default(&self) -> HelmReleaseStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn timeout(&self, defaults: &ReleaseDefaults) -> Duration {
        duration_or(self.spec.timeout.as_deref(), defaults.timeout)
    }

    pub fn test_timeout(&self, defaults: &ReleaseDefaults) -> Duration {
        duration_or(self.spec.test.timeout.as_deref(), self.timeout(defaults))
    }

    pub fn rollback_timeout(&self, defaults: &ReleaseDefaults) -> Duration {
        duration_or(self.spec.rollback.timeout.as_deref(), self.timeout(defaults))
    }

    pub fn wait(&self, defaults: &ReleaseDefaults) -> bool {
        self.spec.wait.unwrap_or(defaults.wait)
    }

    pub fn max_history(&self, defaults: &ReleaseDefaults) -> u32 {
        self.spec.max_history.unwrap_or(defaults.max_history)
    }

    /// An explicit `resetValues: true` wins; otherwise `reuseValues` decides,
    /// and the default is to reset to the chart's values.
    pub fn values_policy(&self) -> ValuesPolicy {
        if self.spec.reset_values == Some(true) {
            return ValuesPolicy {
                reuse_values: false,
                reset_values: true,
            };
        }
        let reuse = self.spec.reuse_values.unwrap_or(false);
        ValuesPolicy {
            reuse_values: reuse,
            reset_values: !reuse,
        }
    }

    /// Inline values as a document. Absent values are an empty map.
    pub fn inline_values(&self) -> Result<Values> {
        match &self.spec.values {
            None | Some(serde_json::Value::Null) => Ok(Values::empty_map()),
            Some(v @ serde_json::Value::Object(_)) => Ok(Values::from(v.clone())),
            Some(_) => Err(Error::validation("spec.values must be a map")),
        }
    }

    /// Admission-style checks on the spec. All problems are reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let chart = &self.spec.chart;
        if chart.name.trim().is_empty() {
            problems.push("spec.chart.name must be populated".to_string());
        }
        if chart.version.trim().is_empty() {
            problems.push("spec.chart.version must be populated".to_string());
        }
        if chart.repository.trim().is_empty() {
            problems.push("spec.chart.repository must be populated".to_string());
        } else if url::Url::parse(&chart.repository).is_err() {
            problems.push(format!(
                "spec.chart.repository {:?} is not a valid URL",
                chart.repository
            ));
        }

        for (field, value) in [
            ("spec.timeout", &self.spec.timeout),
            ("spec.test.timeout", &self.spec.test.timeout),
            ("spec.rollback.timeout", &self.spec.rollback.timeout),
        ] {
            if let Some(v) = value {
                if parse_duration(v).is_err() {
                    problems.push(format!("{} {:?} is not a valid duration", field, v));
                }
            }
        }

        if let Some(v) = &self.spec.values {
            if !(v.is_object() || v.is_null()) {
                problems.push("spec.values must be a map".to_string());
            }
        }

        for (i, reference) in self.spec.values_from.iter().enumerate() {
            if reference.name.trim().is_empty() {
                problems.push(format!("spec.valuesFrom[{}].name must be populated", i));
            }
            if let Some(path) = &reference.target_path {
                if path.trim().is_empty() {
                    problems.push(format!("spec.valuesFrom[{}].targetPath is empty", i));
                }
            }
            if reference.kind == ValuesSourceKind::ExternalUrl {
                let scheme_ok = url::Url::parse(&reference.name)
                    .map(|u| matches!(u.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !scheme_ok {
                    problems.push(format!(
                        "spec.valuesFrom[{}].name {:?} must be an http(s) URL",
                        i, reference.name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(problems.join("; ")))
        }
    }
}

fn duration_or(value: Option<&str>, fallback: Duration) -> Duration {
    value
        .and_then(|v| parse_duration(v).ok())
        .unwrap_or(fallback)
}

fn values_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn release(spec: HelmReleaseSpec) -> HelmRelease {
        let mut hr = HelmRelease::new("web", spec);
        hr.metadata = ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("apps".to_string()),
            generation: Some(3),
            ..Default::default()
        };
        hr
    }

    fn chart() -> ChartSpec {
        ChartSpec {
            name: "nginx".to_string(),
            version: "1.2.3".to_string(),
            repository: "https://charts.example.com".to_string(),
            secret_ref: None,
        }
    }

    #[test]
    fn test_names_default_from_metadata() {
        let hr = release(HelmReleaseSpec {
            chart: chart(),
            ..Default::default()
        });
        assert_eq!(hr.target_namespace(), "apps");
        assert_eq!(hr.release_name(), "apps-web");

        let hr = release(HelmReleaseSpec {
            chart: chart(),
            target_namespace: Some("prod".to_string()),
            ..Default::default()
        });
        assert_eq!(hr.release_name(), "prod-web");
    }

    #[test]
    fn test_timeouts_fall_back_through_release_timeout() {
        let defaults = ReleaseDefaults::default();
        let mut spec = HelmReleaseSpec {
            chart: chart(),
            ..Default::default()
        };
        assert_eq!(release(spec.clone()).timeout(&defaults), Duration::from_secs(300));

        spec.timeout = Some("2m".to_string());
        spec.rollback.timeout = Some("30s".to_string());
        let hr = release(spec);
        assert_eq!(hr.timeout(&defaults), Duration::from_secs(120));
        assert_eq!(hr.test_timeout(&defaults), Duration::from_secs(120));
        assert_eq!(hr.rollback_timeout(&defaults), Duration::from_secs(30));
        assert_eq!(hr.max_history(&defaults), 10);
        assert!(hr.wait(&defaults));
    }

    #[test]
    fn test_values_policy() {
        let mut spec = HelmReleaseSpec {
            chart: chart(),
            ..Default::default()
        };
        let p = release(spec.clone()).values_policy();
        assert!(p.reset_values && !p.reuse_values);

        spec.reuse_values = Some(true);
        let p = release(spec.clone()).values_policy();
        assert!(p.reuse_values && !p.reset_values);

        spec.reset_values = Some(true);
        let p = release(spec).values_policy();
        assert!(p.reset_values && !p.reuse_values);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let hr = release(HelmReleaseSpec {
            timeout: Some("soon".to_string()),
            values_from: vec![ValuesReference {
                kind: ValuesSourceKind::ExternalUrl,
                name: "ftp://example.com/values.yaml".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });

        let err = hr.validate().unwrap_err().to_string();
        assert!(err.contains("spec.chart.name"));
        assert!(err.contains("spec.chart.version"));
        assert!(err.contains("spec.chart.repository"));
        assert!(err.contains("spec.timeout"));
        assert!(err.contains("http(s) URL"));
    }

    #[test]
    fn test_validate_accepts_complete_spec() {
        let hr = release(HelmReleaseSpec {
            chart: chart(),
            values: Some(serde_json::json!({"replicaCount": 2})),
            ..Default::default()
        });
        assert!(hr.validate().is_ok());
        assert_eq!(
            hr.inline_values().unwrap().lookup("replicaCount"),
            Some(&Values::Number(2.into()))
        );
    }

    #[test]
    fn test_values_reference_defaults() {
        let r = ValuesReference {
            kind: ValuesSourceKind::ConfigMap,
            name: "base".to_string(),
            target_path: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(r.values_key(), "values.yaml");
        assert_eq!(r.target_path(), None);
    }

    #[test]
    fn test_spec_deserializes_from_yaml() {
        let spec: HelmReleaseSpec = serde_yaml::from_str(
            r#"
chart:
  name: nginx
  version: 1.2.3
  repository: https://charts.example.com
valuesFrom:
  - kind: ExternalURL
    name: https://example.com/values.yaml
    optional: true
  - kind: Secret
    name: creds
    valuesKey: override.yaml
    targetPath: auth.password
skipCRDs: true
rollback:
  enable: true
  retry: true
  maxRetries: 2
"#,
        )
        .unwrap();

        assert!(spec.skip_crds);
        assert_eq!(spec.values_from[0].kind, ValuesSourceKind::ExternalUrl);
        assert_eq!(spec.values_from[1].target_path(), Some("auth.password"));
        assert_eq!(spec.rollback.max_retries(), 2);
        assert!(!spec.test.enable);
    }
}
