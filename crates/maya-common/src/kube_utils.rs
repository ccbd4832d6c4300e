//! Kubernetes helpers shared by the upgrade crates

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, PatchParams};
use kube::Client;
use tokio::sync::OnceCell;

use crate::{Error, FIELD_MANAGER};

/// Cluster client created on first use and shared afterwards
///
/// Callers that already hold a client (tests, or a binary that built one
/// up front) inject it with [`LazyClient::with_client`].
#[derive(Default)]
pub struct LazyClient {
    cell: OnceCell<Client>,
}

impl LazyClient {
    /// A client that connects on first use using the in-cluster
    /// service-account (or local kubeconfig) conventions
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle pre-loaded with the given client
    pub fn with_client(client: Client) -> Self {
        Self {
            cell: OnceCell::from(client),
        }
    }

    /// Get the client, connecting if this is the first call
    pub async fn get(&self) -> Result<Client, Error> {
        self.cell
            .get_or_try_init(|| async {
                tracing::debug!("initializing kubernetes client");
                Client::try_default().await.map_err(Error::from)
            })
            .await
            .cloned()
    }
}

/// Whether a kube error is an HTTP 404 from the API server
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Params for a JSON merge patch attributed to this tool
///
/// Server-side apply params are not used since merge patches ignore `force`.
pub fn merge_patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Build a label selector string (`k1=v1,k2=v2`) from a label map
///
/// Keys are emitted in sorted order so the selector is stable.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Turn an existing owner reference into a controlling one
///
/// The resulting reference blocks deletion of the owner until the dependent
/// is gone and marks the owner as the managing controller.
pub fn controller_owner_reference(owner: &OwnerReference) -> OwnerReference {
    OwnerReference {
        api_version: owner.api_version.clone(),
        kind: owner.kind.clone(),
        name: owner.name.clone(),
        uid: owner.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Parse an apiVersion into (group, version)
///
/// Core resources have no group: `v1` parses to `("", "v1")`.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Kinds whose plural does not follow the simple English rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("storageclass", "storageclasses"),
    ("ingress", "ingresses"),
    ("cstorpoolcluster", "cstorpoolclusters"),
    ("cstorpoolinstance", "cstorpoolinstances"),
    ("cstorvolumepolicy", "cstorvolumepolicies"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
