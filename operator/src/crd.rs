use std::collections::BTreeMap;
use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "operator.ibm.com",
    version = "v1alpha1",
    kind = "OperandRequest",
    plural = "operandrequests",
    derive = "Default",
    status = "OperandRequestStatus",
    shortname = "opreq",
    namespaced
)]
pub struct OperandRequestSpec {
    pub requests: Vec<RequestEntry>,
}

/// A group of operands served by one OperandRegistry.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    pub registry: String,

    #[serde(default)]
    pub registry_namespace: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub operands: Vec<Operand>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operand {
    pub name: String,
}

/// Namespace/name pair of a registry or config object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl RequestEntry {
    /// Registry referenced by this entry; an empty namespace means the request's own.
    pub fn registry_key(&self, request_ns: &str) -> ObjectKey {
        let ns = self
            .registry_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(request_ns);
        ObjectKey::new(ns, &self.registry)
    }

    /// The OperandConfig shares its registry's name and namespace.
    pub fn config_key(&self, request_ns: &str) -> ObjectKey {
        self.registry_key(request_ns)
    }
}

impl OperandRequest {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn phase(&self) -> Option<RequestPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Whether any entry of the spec names `operand`.
    pub fn references_operand(&self, operand: &str) -> bool {
        self.spec
            .requests
            .iter()
            .any(|r| r.operands.iter().any(|o| o.name == operand))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
pub enum RequestPhase {
    Initializing,
    Installing,
    Creating,
    Running,
    Deleting,
    Failed,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestPhase::Initializing => "Initializing",
            RequestPhase::Installing => "Installing",
            RequestPhase::Creating => "Creating",
            RequestPhase::Running => "Running",
            RequestPhase::Deleting => "Deleting",
            RequestPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestStatus {
    pub phase: Option<RequestPhase>,

    #[serde(default)]
    pub members: Vec<MemberStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub name: String,
    pub phase: MemberPhase,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberPhase {
    pub operator_phase: Option<OperatorPhase>,
    pub operand_phase: Option<OperandPhase>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
pub enum OperatorPhase {
    Installing,
    Running,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, JsonSchema, PartialEq, Eq)]
pub enum OperandPhase {
    Creating,
    Running,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "operator.ibm.com",
    version = "v1alpha1",
    kind = "OperandRegistry",
    plural = "operandregistries",
    derive = "Default",
    status = "OperandRegistryStatus",
    shortname = "opreg",
    namespaced
)]
pub struct OperandRegistrySpec {
    #[serde(default)]
    pub operators: Vec<OperatorEntry>,
}

/// An installable operator as listed in a registry.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorEntry {
    pub name: String,
    pub namespace: String,
    pub source_name: String,
    pub source_namespace: String,
    pub package_name: String,
    pub channel: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub install_plan_approval: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandRegistryStatus {
    pub phase: Option<String>,
}

impl OperandRegistry {
    pub fn operator(&self, name: &str) -> Option<&OperatorEntry> {
        self.spec.operators.iter().find(|o| o.name == name)
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "operator.ibm.com",
    version = "v1alpha1",
    kind = "OperandConfig",
    plural = "operandconfigs",
    derive = "Default",
    status = "OperandConfigStatus",
    shortname = "opcon",
    namespaced
)]
pub struct OperandConfigSpec {
    #[serde(default)]
    pub services: Vec<ConfigService>,
}

/// Operand parameters for one operator. Each `spec` key is the lowerCamel
/// kind of a custom resource served by that operator.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigService {
    pub name: String,

    #[serde(default)]
    pub api_version: Option<String>,

    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_map")]
    pub spec: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandConfigStatus {
    pub phase: Option<String>,
}

impl OperandConfig {
    pub fn service(&self, name: &str) -> Option<&ConfigService> {
        self.spec.services.iter().find(|s| s.name == name)
    }
}

fn preserve_unknown_map(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "additionalProperties": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}
