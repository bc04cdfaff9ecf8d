//! Runtime view of a provisioned instance

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::credentials::{Database, DatabaseUser};
use crate::crd::Unleash;
use crate::descriptor::version_from_image;
use crate::normalize::InstanceConfig;

const CONDITION_RECONCILED: &str = "Reconciled";
const CONDITION_CONNECTED: &str = "Connected";

/// Readiness derived from the operator-reported server status
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Reconciled and reachable
    Ready,
    /// Operator has not finished yet
    Provisioning,
    /// Operator reported a failure
    Failed(String),
    /// No status reported
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Ready => write!(f, "ready"),
            InstanceStatus::Provisioning => write!(f, "provisioning"),
            InstanceStatus::Failed(msg) => write!(f, "failed: {}", msg),
            InstanceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One instance as currently stored in the cluster.
///
/// Built fresh from the server descriptor on every read.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionedInstance {
    /// Instance name
    pub name: String,
    /// Namespace holding the server
    pub namespace: String,
    /// Creation time of the server
    pub created_at: Option<DateTime<Utc>>,
    /// Last-applied server descriptor
    pub server: Option<Unleash>,
}

impl ProvisionedInstance {
    /// Wrap a fetched server
    pub fn from_server(server: Unleash) -> Self {
        Self {
            name: server.metadata.name.clone().unwrap_or_default(),
            namespace: server.metadata.namespace.clone().unwrap_or_default(),
            created_at: server.metadata.creation_timestamp.as_ref().map(|t| t.0),
            server: Some(server),
        }
    }

    /// Readiness from the server's `Reconciled` and `Connected` conditions
    pub fn status(&self) -> InstanceStatus {
        let Some(status) = self.server.as_ref().and_then(|s| s.status.as_ref()) else {
            return InstanceStatus::Unknown;
        };

        for type_ in [CONDITION_RECONCILED, CONDITION_CONNECTED] {
            if let Some(c) = status.condition(type_) {
                if c.status == "False" {
                    let message = c
                        .message
                        .clone()
                        .or_else(|| c.reason.clone())
                        .unwrap_or_else(|| format!("{} is false", type_));
                    return InstanceStatus::Failed(message);
                }
            }
        }

        if status.reconciled && status.connected {
            InstanceStatus::Ready
        } else {
            InstanceStatus::Provisioning
        }
    }

    /// Running version, else the pinned version, if any
    pub fn version(&self) -> Option<String> {
        let server = self.server.as_ref()?;
        server
            .status
            .as_ref()
            .and_then(|s| s.version.clone())
            .or_else(|| version_from_image(&server.spec.custom_image).map(str::to_string))
    }

    /// URL of the web UI
    pub fn web_url(&self) -> Option<String> {
        let ingress = &self.server.as_ref()?.spec.web_ingress;
        ingress
            .enabled
            .then(|| format!("https://{}{}", ingress.host, ingress.path.trim_end_matches('/')))
    }

    /// URL of the API
    pub fn api_url(&self) -> Option<String> {
        let ingress = &self.server.as_ref()?.spec.api_ingress;
        ingress.enabled.then(|| {
            format!(
                "https://{}{}/api",
                ingress.host,
                ingress.path.trim_end_matches('/')
            )
        })
    }

    /// Configuration read back from the server, with defaults for unset values
    pub fn config(&self) -> Option<InstanceConfig> {
        self.server
            .as_ref()
            .map(|s| InstanceConfig::from_server(s, true))
    }

    /// Human-readable age ("less than a day", "3 weeks", ...)
    pub fn age(&self) -> Option<String> {
        self.created_at.map(|t| human_readable_age(Utc::now() - t))
    }
}

/// Display-only view of an instance's credential chain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialStatus {
    /// The database, if it exists
    pub database: Option<Database>,
    /// The database user, if it exists
    pub user: Option<DatabaseUser>,
}

impl CredentialStatus {
    /// Whether both database and user exist
    pub fn is_complete(&self) -> bool {
        self.database.is_some() && self.user.is_some()
    }
}

/// Render an age in the coarsest unit that fits
pub fn human_readable_age(age: Duration) -> String {
    let days = age.num_days();
    let (count, unit) = match days {
        d if d < 1 => return "less than a day".to_string(),
        d if d < 7 => (d, "day"),
        d if d < 30 => (d / 7, "week"),
        d if d < 365 => (d / 30, "month"),
        d => (d / 365, "year"),
    };

    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
