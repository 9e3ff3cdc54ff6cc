//! Operator Lifecycle Manager kinds this operator reads or writes.
//!
//! Only the fields the reconciler touches are modelled; OLM owns the rest.

use kube::api::{ApiResource, GroupVersionKind};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subscription state reported once the installed CSV is the newest in its channel.
pub const STATE_AT_LATEST: &str = "AtLatestKnown";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    derive = "Default",
    status = "SubscriptionStatus",
    shortname = "sub",
    namespaced
)]
pub struct SubscriptionSpec {
    pub channel: String,
    /// Package name in the catalog.
    pub name: String,
    pub source: String,
    pub source_namespace: String,

    #[serde(default)]
    pub install_plan_approval: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub state: Option<String>,
    #[serde(rename = "installedCSV")]
    pub installed_csv: Option<String>,
    #[serde(rename = "currentCSV")]
    pub current_csv: Option<String>,
}

impl Subscription {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .map(|state| state == STATE_AT_LATEST)
            .unwrap_or(false)
    }

    pub fn installed_csv(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.installed_csv.as_deref())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    plural = "catalogsources",
    derive = "Default",
    shortname = "catsrc",
    namespaced
)]
pub struct CatalogSourceSpec {
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    derive = "Default",
    shortname = "og",
    namespaced
)]
pub struct OperatorGroupSpec {
    #[serde(default)]
    pub target_namespaces: Option<Vec<String>>,
}

pub fn csv_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("operators.coreos.com", "v1alpha1", "ClusterServiceVersion"),
        "clusterserviceversions",
    )
}
