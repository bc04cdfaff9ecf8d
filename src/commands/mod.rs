//! CLI commands
//!
//! Global flags become the shared [`Config`]; every command that talks to a
//! control plane goes through [`GlobalArgs::connect`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use flagship_common::kube_utils::create_client;
use flagship_instance::credentials::KubeSecretClient;
use flagship_instance::network_policy::KubeNetworkPolicyClient;
use flagship_instance::server::KubeServerClient;
use flagship_instance::sql_admin::SqlAdminClient;
use flagship_instance::versions::GithubVersionSource;
use flagship_instance::{
    Clients, Config, GoogleConfig, Orchestrator, OrchestratorConfig, UnleashSettings,
};
use tracing::debug;

use crate::{Error, Result};

pub mod catalog;
pub mod instances;

/// Flags shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to kubeconfig file (default: in-cluster, $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "FLAGSHIP_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Give up on an operation after this many seconds
    #[arg(long, env = "FLAGSHIP_TIMEOUT_SECS", global = true)]
    pub timeout_secs: Option<u64>,

    /// Google Cloud project id
    #[arg(long, env = "FLAGSHIP_GOOGLE_PROJECT_ID", global = true, default_value = "")]
    pub google_project_id: String,

    /// Google Cloud project number
    #[arg(long, env = "FLAGSHIP_GOOGLE_PROJECT_NUMBER", global = true, default_value = "")]
    pub google_project_number: String,

    /// Backend service id behind Identity-Aware Proxy
    #[arg(long, env = "FLAGSHIP_GOOGLE_IAP_BACKEND_SERVICE_ID", global = true, default_value = "")]
    pub google_iap_backend_service_id: String,

    /// Bearer token for the Cloud SQL Admin API
    #[arg(long, env = "FLAGSHIP_GOOGLE_ACCESS_TOKEN", global = true, hide_env_values = true)]
    pub google_access_token: Option<String>,

    /// Namespace holding the instances
    #[arg(long, env = "FLAGSHIP_UNLEASH_NAMESPACE", global = true, default_value = "unleash")]
    pub namespace: String,

    /// ServiceAccount the servers run as
    #[arg(long, env = "FLAGSHIP_UNLEASH_SERVICE_ACCOUNT", global = true, default_value = "")]
    pub service_account: String,

    /// Suffix of the web ingress host
    #[arg(long, env = "FLAGSHIP_UNLEASH_WEB_INGRESS_HOST", global = true, default_value = "")]
    pub web_ingress_host: String,

    /// Ingress class of the web ingress
    #[arg(long, env = "FLAGSHIP_UNLEASH_WEB_INGRESS_CLASS", global = true, default_value = "")]
    pub web_ingress_class: String,

    /// Suffix of the API ingress host
    #[arg(long, env = "FLAGSHIP_UNLEASH_API_INGRESS_HOST", global = true, default_value = "")]
    pub api_ingress_host: String,

    /// Ingress class of the API ingress
    #[arg(long, env = "FLAGSHIP_UNLEASH_API_INGRESS_CLASS", global = true, default_value = "")]
    pub api_ingress_class: String,

    /// Cloud SQL instance id
    #[arg(long, env = "FLAGSHIP_UNLEASH_SQL_INSTANCE_ID", global = true, default_value = "")]
    pub sql_instance_id: String,

    /// Cloud SQL instance region
    #[arg(
        long,
        env = "FLAGSHIP_UNLEASH_SQL_INSTANCE_REGION",
        global = true,
        default_value = "europe-north1"
    )]
    pub sql_instance_region: String,

    /// Private address of the Cloud SQL instance
    #[arg(long, env = "FLAGSHIP_UNLEASH_SQL_INSTANCE_ADDRESS", global = true, default_value = "")]
    pub sql_instance_address: String,

    /// Teams API base URL handed to the servers
    #[arg(long, env = "FLAGSHIP_UNLEASH_TEAMS_API_URL", global = true, default_value = "")]
    pub teams_api_url: String,

    /// Secret holding the Teams API token
    #[arg(long, env = "FLAGSHIP_UNLEASH_TEAMS_API_SECRET_NAME", global = true, default_value = "")]
    pub teams_api_secret_name: String,

    /// Key of the token in the Teams API secret
    #[arg(
        long,
        env = "FLAGSHIP_UNLEASH_TEAMS_API_SECRET_TOKEN_KEY",
        global = true,
        default_value = "token"
    )]
    pub teams_api_secret_token_key: String,

    /// Image of the Cloud SQL auth proxy sidecar
    #[arg(
        long,
        env = "FLAGSHIP_CLOUD_CONNECTOR_PROXY_IMAGE",
        global = true,
        default_value = "gcr.io/cloud-sql-connectors/cloud-sql-proxy:2.8.2"
    )]
    pub cloud_connector_proxy_image: String,
}

impl GlobalArgs {
    /// Global configuration from the flags
    pub fn config(&self) -> Config {
        Config {
            google: GoogleConfig {
                project_id: self.google_project_id.clone(),
                project_number: self.google_project_number.clone(),
                iap_backend_service_id: self.google_iap_backend_service_id.clone(),
            },
            unleash: UnleashSettings {
                instance_namespace: self.namespace.clone(),
                instance_service_account: self.service_account.clone(),
                web_ingress_host: self.web_ingress_host.clone(),
                web_ingress_class: self.web_ingress_class.clone(),
                api_ingress_host: self.api_ingress_host.clone(),
                api_ingress_class: self.api_ingress_class.clone(),
                sql_instance_id: self.sql_instance_id.clone(),
                sql_instance_region: self.sql_instance_region.clone(),
                sql_instance_address: self.sql_instance_address.clone(),
                teams_api_url: self.teams_api_url.clone(),
                teams_api_secret_name: self.teams_api_secret_name.clone(),
                teams_api_secret_token_key: self.teams_api_secret_token_key.clone(),
            },
            cloud_connector_proxy_image: self.cloud_connector_proxy_image.clone(),
        }
    }

    /// Orchestrator tuning from the flags
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        match self.timeout_secs {
            Some(secs) => OrchestratorConfig::with_deadline(Duration::from_secs(secs)),
            None => OrchestratorConfig::default(),
        }
    }

    /// Release version source; needs no credentials
    pub fn version_source(&self) -> Result<GithubVersionSource> {
        Ok(GithubVersionSource::new(http_client()?))
    }

    /// Wire an orchestrator against the real control planes
    pub async fn connect(&self) -> Result<Orchestrator> {
        self.require("--google-project-id", &self.google_project_id)?;
        self.require("--sql-instance-id", &self.sql_instance_id)?;
        let token = match self.google_access_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => return Err(Error::config("FLAGSHIP_GOOGLE_ACCESS_TOKEN is not set")),
        };

        let kube = create_client(self.kubeconfig.as_deref()).await?;
        let http = http_client()?;
        let sql = Arc::new(SqlAdminClient::new(
            http.clone(),
            self.google_project_id.clone(),
            self.sql_instance_id.clone(),
            token,
        ));

        let clients = Clients {
            databases: sql.clone(),
            users: sql,
            secrets: Arc::new(KubeSecretClient::new(kube.clone())),
            policies: Arc::new(KubeNetworkPolicyClient::new(kube.clone())),
            servers: Arc::new(KubeServerClient::new(kube)),
            versions: Arc::new(GithubVersionSource::new(http)),
        };
        debug!(namespace = %self.namespace, "connected to control planes");

        Ok(Orchestrator::new(
            self.config(),
            clients,
            self.orchestrator_config(),
        ))
    }

    fn require(&self, flag: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::config(format!("{} is required", flag)));
        }
        Ok(())
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Render rows as a column-aligned table under a header line
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(headers.to_vec())];
    out.extend(rows.iter().map(|row| line(row.iter().map(String::as_str).collect())));
    out.join("\n")
}
