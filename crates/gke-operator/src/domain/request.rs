//! Cluster request model and pre-submission validation.
//!
//! A cluster body arrives either as a typed [`ClusterSpec`] or as a loose
//! mapping read from YAML/JSON. Both shapes go through the same field accessor
//! ([`ClusterBody::field`]) for validation and are normalized into one
//! [`ClusterSpec`] before anything is submitted.

use api_types::ClusterLocation;
use error_stack::Report;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tracing::error;
use tracing::warn;

use crate::domain::error::LifecycleError;

/// Body fields that still work but have a replacement.
const DEPRECATED_BODY_FIELDS: [(&str, &str); 4] = [
    ("initial_node_count", "node_pool.initial_node_count"),
    ("node_config", "node_pool.config"),
    ("zone", "location"),
    ("instance_group_urls", "node_pools.instance_group_urls"),
];

/// Typed cluster definition, serialized in the control plane's camelCase form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        alias = "initial_node_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_node_count: Option<u32>,
    #[serde(default, alias = "node_config", skip_serializing_if = "Option::is_none")]
    pub node_config: Option<Value>,
    #[serde(default, alias = "node_pools", skip_serializing_if = "Option::is_none")]
    pub node_pools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(
        default,
        alias = "instance_group_urls",
        skip_serializing_if = "Option::is_none"
    )]
    pub instance_group_urls: Option<Vec<String>>,
    /// Everything else is passed to the control plane untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_initial_node_count(mut self, count: u32) -> Self {
        self.initial_node_count = Some(count);
        self
    }

    pub fn with_node_config(mut self, config: Value) -> Self {
        self.node_config = Some(config);
        self
    }

    pub fn with_node_pools(mut self, pools: Vec<Value>) -> Self {
        self.node_pools = Some(pools);
        self
    }
}

/// A cluster body as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterBody {
    Typed(ClusterSpec),
    Mapping(Map<String, Value>),
}

impl From<ClusterSpec> for ClusterBody {
    fn from(spec: ClusterSpec) -> Self {
        Self::Typed(spec)
    }
}

impl From<Map<String, Value>> for ClusterBody {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl ClusterBody {
    /// Reads a body field by its snake_case name.
    ///
    /// Typed bodies are read from the struct field first, then from the
    /// pass-through map. Mappings accept either the snake_case or camelCase
    /// key. Empty values (null, zero, empty string/list/map) count as unset.
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match self {
            Self::Typed(spec) => typed_field(spec, name).or_else(|| lookup(&spec.extra, name)),
            Self::Mapping(map) => lookup(map, name),
        };
        value.filter(is_set)
    }

    fn has(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Validates the body and converts it into the canonical [`ClusterSpec`].
    ///
    /// Every problem found is logged; a single validation error is returned.
    pub fn validate(self) -> Result<ClusterSpec, Report<LifecycleError>> {
        self.warn_deprecated_fields();

        let mut problems = Vec::new();
        if !self.has("name") {
            problems.push("Field body['name'] is missing or incorrect".to_string());
        }

        let legacy = self.has("initial_node_count") || self.has("node_config");
        let pools = self.has("node_pools");

        if self.has("initial_node_count") && pools {
            problems.push(
                "Do not use field body['initial_node_count'] and body['node_pools'] at the same time."
                    .to_string(),
            );
        }
        if self.has("node_config") && pools {
            problems.push(
                "Do not use field body['node_config'] and body['node_pools'] at the same time."
                    .to_string(),
            );
        }
        if !legacy && !pools {
            problems.push(
                "Field body['node_pools'] is required if none of fields body['initial_node_count'] \
                 or body['node_config'] are specified."
                    .to_string(),
            );
        }

        if !problems.is_empty() {
            for problem in &problems {
                error!("{problem}");
            }
            let mut report = Report::new(LifecycleError::Validation {
                message: "cluster body has incorrect or missing input".to_string(),
            });
            for problem in problems {
                report = report.attach_printable(problem);
            }
            return Err(report);
        }

        self.into_spec()
    }

    fn warn_deprecated_fields(&self) {
        for (field, replacement) in DEPRECATED_BODY_FIELDS {
            if self.has(field) {
                warn!("The body field '{field}' is deprecated. Use '{replacement}' instead.");
            }
        }
    }

    fn into_spec(self) -> Result<ClusterSpec, Report<LifecycleError>> {
        match self {
            Self::Typed(spec) => Ok(spec),
            Self::Mapping(map) => serde_json::from_value(Value::Object(map)).map_err(|e| {
                Report::new(LifecycleError::Validation {
                    message: format!("cluster body does not match the cluster schema: {e}"),
                })
            }),
        }
    }
}

fn typed_field(spec: &ClusterSpec, name: &str) -> Option<Value> {
    match name {
        "name" => Some(Value::from(spec.name.clone())),
        "initial_node_count" => spec.initial_node_count.map(Value::from),
        "node_config" => spec.node_config.clone(),
        "node_pools" => spec.node_pools.clone().map(Value::from),
        "zone" => spec.zone.clone().map(Value::from),
        "instance_group_urls" => spec.instance_group_urls.clone().map(Value::from),
        _ => None,
    }
}

fn lookup(map: &Map<String, Value>, name: &str) -> Option<Value> {
    map.get(name)
        .or_else(|| map.get(&to_camel_case(name)))
        .cloned()
}

fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Request to create a cluster.
#[derive(Debug, Clone)]
pub struct CreateClusterRequest {
    pub location: ClusterLocation,
    pub body: ClusterBody,
    /// Defaults to the cluster name, so a retried create converges on the same cluster
    pub idempotency_key: Option<String>,
}

impl CreateClusterRequest {
    pub fn new(location: ClusterLocation, body: impl Into<ClusterBody>) -> Self {
        Self {
            location,
            body: body.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn validate(self) -> Result<OperationRequest, Report<LifecycleError>> {
        let spec = self.body.validate()?;
        let idempotency_key = self.idempotency_key.unwrap_or_else(|| spec.name.clone());
        Ok(OperationRequest::Create {
            location: self.location,
            spec,
            idempotency_key,
        })
    }
}

/// Request to delete a cluster.
#[derive(Debug, Clone)]
pub struct DeleteClusterRequest {
    pub location: ClusterLocation,
    pub name: String,
}

impl DeleteClusterRequest {
    pub fn new(location: ClusterLocation, name: impl Into<String>) -> Self {
        Self {
            location,
            name: name.into(),
        }
    }

    pub fn validate(self) -> Result<OperationRequest, Report<LifecycleError>> {
        if self.location.project_id.is_empty()
            || self.location.location.is_empty()
            || self.name.is_empty()
        {
            error!("One of (project_id, name, location) is missing or incorrect");
            return Err(Report::new(LifecycleError::Validation {
                message: "One of (project_id, name, location) is missing or incorrect".to_string(),
            }));
        }

        Ok(OperationRequest::Delete {
            idempotency_key: self.name.clone(),
            location: self.location,
            cluster_name: self.name,
        })
    }
}

/// A validated request, ready to submit. Never modified after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationRequest {
    Create {
        location: ClusterLocation,
        spec: ClusterSpec,
        idempotency_key: String,
    },
    Delete {
        location: ClusterLocation,
        cluster_name: String,
        idempotency_key: String,
    },
}

impl OperationRequest {
    pub fn location(&self) -> &ClusterLocation {
        match self {
            Self::Create { location, .. } | Self::Delete { location, .. } => location,
        }
    }

    pub fn cluster_name(&self) -> &str {
        match self {
            Self::Create { spec, .. } => &spec.name,
            Self::Delete { cluster_name, .. } => cluster_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn mapping(value: Value) -> ClusterBody {
        match value {
            Value::Object(map) => ClusterBody::Mapping(map),
            other => panic!("expected object, got {other}"),
        }
    }

    fn validation_problems(report: &Report<LifecycleError>) -> Vec<String> {
        report
            .frames()
            .filter_map(|frame| frame.downcast_ref::<String>().cloned())
            .collect()
    }

    #[test]
    fn legacy_pair_is_accepted() {
        let spec = mapping(json!({"name": "c1", "initial_node_count": 1}))
            .validate()
            .expect("legacy body should validate");

        assert_eq!(spec.name, "c1");
        assert_eq!(spec.initial_node_count, Some(1));
    }

    #[test]
    fn node_pools_are_accepted() {
        let body = ClusterSpec::new("c1").with_node_pools(vec![json!({"name": "pool", "initialNodeCount": 3})]);
        let spec = ClusterBody::from(body.clone())
            .validate()
            .expect("node pool body should validate");
        assert_eq!(spec, body);
    }

    #[test]
    fn node_pools_with_initial_node_count_is_rejected() {
        let err = mapping(json!({"name": "c1", "initial_node_count": 2, "node_pools": [{"name": "p"}]}))
            .validate()
            .expect_err("mixed body should fail");

        assert!(matches!(
            err.current_context(),
            LifecycleError::Validation { .. }
        ));
        let problems = validation_problems(&err);
        assert!(problems
            .iter()
            .any(|p| p.contains("body['initial_node_count'] and body['node_pools']")));
    }

    #[test]
    fn node_config_with_node_pools_is_rejected_for_typed_body() {
        let body = ClusterSpec::new("c1")
            .with_node_config(json!({"machineType": "e2-medium"}))
            .with_node_pools(vec![json!({"name": "p"})]);
        let err = ClusterBody::from(body)
            .validate()
            .expect_err("mixed body should fail");

        let problems = validation_problems(&err);
        assert!(problems
            .iter()
            .any(|p| p.contains("body['node_config'] and body['node_pools']")));
    }

    #[test]
    fn missing_name_and_nodes_report_every_problem() {
        let err = mapping(json!({}))
            .validate()
            .expect_err("empty body should fail");

        let problems = validation_problems(&err);
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn zero_node_count_counts_as_unset() {
        let err = mapping(json!({"name": "c1", "initialNodeCount": 0}))
            .validate()
            .expect_err("zero nodes and no pools should fail");
        assert!(matches!(
            err.current_context(),
            LifecycleError::Validation { .. }
        ));
    }

    #[test]
    fn camel_case_mapping_keys_are_read() {
        let body = mapping(json!({"name": "c1", "nodePools": [{"name": "p"}], "network": "vpc"}));
        assert!(body.field("node_pools").is_some());

        let spec = body.validate().expect("camelCase body should validate");
        assert_eq!(spec.extra.get("network"), Some(&json!("vpc")));
    }

    #[test]
    fn typed_field_falls_back_to_extra() {
        let mut spec = ClusterSpec::new("c1").with_initial_node_count(1);
        spec.extra.insert("network".to_string(), json!("vpc"));
        let body = ClusterBody::from(spec);

        assert_eq!(body.field("network"), Some(json!("vpc")));
        assert_eq!(body.field("initial_node_count"), Some(json!(1)));
        assert_eq!(body.field("node_pools"), None);
    }

    #[test]
    fn create_request_defaults_idempotency_key_to_name() {
        let location = ClusterLocation::new("p", "us-central1");
        let request = CreateClusterRequest::new(location.clone(), ClusterSpec::new("c1").with_initial_node_count(1))
            .validate()
            .expect("request should validate");

        match request {
            OperationRequest::Create {
                idempotency_key, ..
            } => assert_eq!(idempotency_key, "c1"),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn delete_request_requires_all_fields() {
        let err = DeleteClusterRequest::new(ClusterLocation::new("", "us-central1"), "c1")
            .validate()
            .expect_err("missing project should fail");
        assert!(matches!(
            err.current_context(),
            LifecycleError::Validation { .. }
        ));

        let ok = DeleteClusterRequest::new(ClusterLocation::new("p", "us-central1"), "c1")
            .validate()
            .expect("complete request should validate");
        assert_eq!(ok.cluster_name(), "c1");
    }

    #[test]
    fn camel_case_conversion() {
        assert_eq!(to_camel_case("instance_group_urls"), "instanceGroupUrls");
        assert_eq!(to_camel_case("name"), "name");
    }
}
