//! Remediation collaborator: deployment rollback.
//!
//! Invoked explicitly by an operator (`vigil rollback`), never by the
//! pipeline. Failures are surfaced to the caller and not retried.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use thiserror::Error;
use tracing::{info, warn};

/// Annotation stamped on the pod template to trigger a fresh rollout.
const ROLLBACK_ANNOTATION: &str = "vigil.io/rollback-requested-at";

/// Errors surfaced by the remediation collaborator.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// No cluster credentials were available at startup.
    #[error("cluster access is not configured")]
    Disabled,

    /// The Kubernetes API call failed.
    #[error(transparent)]
    Api(#[from] kube::Error),
}

/// Client for cluster-side remediation actions.
pub struct RemediationClient {
    client: Option<Client>,
}

impl RemediationClient {
    #[must_use]
    pub fn new(client: Option<Client>) -> Self {
        Self { client }
    }

    /// Roll the workload's deployment.
    ///
    /// Returns `Ok(false)` when the deployment does not exist. Patching the
    /// pod-template annotation triggers a fresh rollout, the same mechanism
    /// `kubectl rollout restart` uses.
    pub async fn rollback(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<bool, RemediationError> {
        let Some(client) = self.client.clone() else {
            return Err(RemediationError::Disabled);
        };

        let api: Api<Deployment> = Api::namespaced(client, namespace);

        if api.get_opt(workload).await?.is_none() {
            warn!(
                namespace = %namespace,
                workload = %workload,
                "Rollback requested for unknown deployment"
            );
            return Ok(false);
        }

        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            ROLLBACK_ANNOTATION: Utc::now().to_rfc3339(),
                        }
                    }
                }
            }
        });

        api.patch(workload, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        info!(
            namespace = %namespace,
            workload = %workload,
            "Rollback triggered"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_without_cluster_access() {
        let client = RemediationClient::new(None);
        let result = client.rollback("payments", "billing-api").await;
        assert!(matches!(result, Err(RemediationError::Disabled)));
    }
}
