//! Global configuration shared by every instance
//!
//! Filled once at startup by the binary and passed to the orchestrator and
//! the descriptor builder. Nothing in here is per-instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Google Cloud project settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleConfig {
    /// Project id (e.g. "nais-management-1234")
    pub project_id: String,
    /// Numeric project number, used in the IAP audience
    pub project_number: String,
    /// Backend service id fronted by Identity-Aware Proxy
    pub iap_backend_service_id: String,
}

/// Settings applied to every Unleash instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnleashSettings {
    /// Namespace holding the servers, secrets and policies
    pub instance_namespace: String,
    /// ServiceAccount the server pods run as
    pub instance_service_account: String,
    /// Suffix of the web ingress host (`{name}-{suffix}`)
    pub web_ingress_host: String,
    /// Ingress class of the web ingress
    pub web_ingress_class: String,
    /// Suffix of the API ingress host (`{name}-{suffix}`)
    pub api_ingress_host: String,
    /// Ingress class of the API ingress
    pub api_ingress_class: String,
    /// Cloud SQL instance id
    pub sql_instance_id: String,
    /// Cloud SQL instance region
    pub sql_instance_region: String,
    /// Private IP of the Cloud SQL instance
    pub sql_instance_address: String,
    /// Teams API base URL handed to the servers
    pub teams_api_url: String,
    /// Secret holding the Teams API token
    pub teams_api_secret_name: String,
    /// Key of the token in that secret
    pub teams_api_secret_token_key: String,
}

/// Global configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Google project settings
    pub google: GoogleConfig,
    /// Instance settings
    pub unleash: UnleashSettings,
    /// Image of the Cloud SQL auth proxy sidecar
    pub cloud_connector_proxy_image: String,
}

impl Config {
    /// Audience the servers expect in IAP-signed headers
    pub fn iap_audience(&self) -> String {
        format!(
            "/projects/{}/global/backendServices/{}",
            self.google.project_number, self.google.iap_backend_service_id
        )
    }

    /// Cloud SQL connection name (`{project}:{region}:{instance}`)
    pub fn sql_connection_name(&self) -> String {
        format!(
            "{}:{}:{}",
            self.google.project_id, self.unleash.sql_instance_region, self.unleash.sql_instance_id
        )
    }

    /// Link into the Google Cloud console for this project
    pub fn google_project_url(&self, path: &str) -> String {
        format!(
            "https://console.cloud.google.com/{}?project={}",
            path.trim_start_matches('/'),
            self.google.project_id
        )
    }
}

/// Tuning for the orchestrator itself
#[derive(Clone, Debug, Default)]
pub struct OrchestratorConfig {
    /// Upper bound for one operation; `None` waits as long as the control planes do
    pub deadline: Option<Duration>,
}

impl OrchestratorConfig {
    /// Config with a per-operation deadline
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            google: GoogleConfig {
                project_id: "my-project".to_string(),
                project_number: "1234".to_string(),
                iap_backend_service_id: "5678".to_string(),
            },
            unleash: UnleashSettings {
                sql_instance_id: "my-instance".to_string(),
                sql_instance_region: "europe-north1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn iap_audience_uses_project_number_and_backend() {
        assert_eq!(
            config().iap_audience(),
            "/projects/1234/global/backendServices/5678"
        );
    }

    #[test]
    fn sql_connection_name_joins_project_region_instance() {
        assert_eq!(
            config().sql_connection_name(),
            "my-project:europe-north1:my-instance"
        );
    }

    #[test]
    fn google_project_url_appends_project() {
        assert_eq!(
            config().google_project_url("/sql/instances"),
            "https://console.cloud.google.com/sql/instances?project=my-project"
        );
    }
}
