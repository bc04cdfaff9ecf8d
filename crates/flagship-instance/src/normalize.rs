//! Instance configuration: validation, defaulting and access-list merging
//!
//! Everything in an [`InstanceConfig`] comes from an untrusted caller. The
//! orchestrator only ever builds descriptors from a config that went through
//! [`InstanceConfig::prepare_for_create`] or [`InstanceConfig::prepare_for_update`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use flagship_common::ValidationErrors;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::versions::ReleaseVersion;

/// Log level used when none is given
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Warn;
/// Database pool size used when none is given
pub const DEFAULT_DB_POOL_MAX: u32 = 3;
/// Database pool idle timeout used when none is given
pub const DEFAULT_DB_POOL_IDLE_TIMEOUT_MS: u64 = 1000;
/// Upper bound for the database pool size
pub const MAX_DB_POOL_MAX: u32 = 10;
/// Length of a generated federation nonce
pub const FEDERATION_NONCE_LEN: usize = 8;
/// Clusters allowed to federate when federation is on but none are listed
pub const DEFAULT_FEDERATION_CLUSTERS: &[&str] = &["dev-gcp", "prod-gcp"];
/// System database of the SQL instance; never an instance name
pub const RESERVED_NAME: &str = "postgres";

const NONCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Server log level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// debug
    Debug,
    /// info
    Info,
    /// warn
    Warn,
    /// error
    Error,
    /// fatal
    Fatal,
    /// panic
    Panic,
}

impl LogLevel {
    /// Every accepted level
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
        LogLevel::Panic,
    ];

    /// Level as written into the server environment
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Panic => "panic",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| format!("unknown log level: {}", s))
    }
}

/// User-supplied configuration of one instance.
///
/// `name` is the identity of every resource owned by the instance. List
/// fields are comma-joined strings as typed by the user.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    /// Instance name
    pub name: String,
    /// Image tag to run; empty means the latest release
    #[serde(default)]
    pub version_pin: String,
    /// Whether edge proxies may federate against this instance
    #[serde(default)]
    pub federation_enabled: bool,
    /// Token shared with federation consumers; generated once, never edited
    #[serde(skip)]
    pub federation_nonce: String,
    /// Teams allowed to log in
    #[serde(default)]
    pub allowed_principals: String,
    /// Namespaces allowed to federate
    #[serde(default)]
    pub allowed_namespaces: String,
    /// Clusters allowed to federate
    #[serde(default)]
    pub allowed_clusters: String,
    /// Server log level; empty means the default
    #[serde(default)]
    pub log_level: String,
    /// Database pool size; zero means the default
    #[serde(default)]
    pub db_pool_max: u32,
    /// Database pool idle timeout; zero means the default
    #[serde(default)]
    pub db_pool_idle_timeout_ms: u64,
}

impl InstanceConfig {
    /// Config for `name` with federation on and everything else defaulted later
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            federation_enabled: true,
            ..Default::default()
        }
    }

    /// Check every field, collecting all failures
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        check_name(&mut errors, &self.name);

        if !self.version_pin.chars().all(is_version_char) {
            errors.push(
                "versionPin",
                "must contain only letters, digits and '-', '_', '.', '+'",
            );
        }

        for (field, value) in [
            ("allowedPrincipals", &self.allowed_principals),
            ("allowedNamespaces", &self.allowed_namespaces),
            ("allowedClusters", &self.allowed_clusters),
        ] {
            if !value.chars().all(is_list_char) {
                errors.push(field, "must be a comma-separated list of names");
            }
        }

        if self.log_level.is_empty() {
            errors.push("logLevel", "required");
        } else if self.log_level.parse::<LogLevel>().is_err() {
            errors.push("logLevel", "must be one of debug, info, warn, error, fatal, panic");
        }

        match self.db_pool_max {
            0 => errors.push("dbPoolMax", "required"),
            n if n > MAX_DB_POOL_MAX => {
                errors.push("dbPoolMax", format!("must be at most {}", MAX_DB_POOL_MAX))
            }
            _ => {}
        }

        if self.db_pool_idle_timeout_ms == 0 {
            errors.push("dbPoolIdleTimeoutMs", "required");
        }

        errors.into_result()
    }

    /// Fill every empty field with its default.
    ///
    /// The nonce is only generated when missing, so applying defaults twice
    /// changes nothing the second time.
    pub fn set_defaults(&mut self, versions: &[ReleaseVersion]) {
        if self.log_level.is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
        if self.db_pool_max == 0 {
            self.db_pool_max = DEFAULT_DB_POOL_MAX;
        }
        if self.db_pool_idle_timeout_ms == 0 {
            self.db_pool_idle_timeout_ms = DEFAULT_DB_POOL_IDLE_TIMEOUT_MS;
        }
        if self.version_pin.is_empty() {
            if let Some(latest) = versions.first() {
                self.version_pin = latest.git_tag.clone();
            }
        }
        if self.federation_nonce.is_empty() {
            self.federation_nonce = generate_nonce();
        }
    }

    /// Collapse principals and namespaces into one sorted, deduplicated list
    /// assigned to both fields
    pub fn merge_access_lists(&mut self) {
        let merged: BTreeSet<&str> = split_list(&self.allowed_principals)
            .chain(split_list(&self.allowed_namespaces))
            .collect();
        let joined = merged.into_iter().collect::<Vec<_>>().join(",");

        self.allowed_principals = joined.clone();
        self.allowed_namespaces = joined;
    }

    /// Default, merge and validate a config for a new instance
    pub fn prepare_for_create(&mut self, versions: &[ReleaseVersion]) -> Result<(), ValidationErrors> {
        self.set_defaults(versions);
        self.merge_access_lists();
        self.validate()
    }

    /// Merge and validate a config for an existing instance.
    ///
    /// No defaults are applied: the version pin and nonce of the running
    /// instance are kept unless the caller sets them.
    pub fn prepare_for_update(&mut self) -> Result<(), ValidationErrors> {
        self.merge_access_lists();
        self.validate()
    }

    /// Principals as a list
    pub fn principals(&self) -> Vec<String> {
        split_list(&self.allowed_principals).map(str::to_string).collect()
    }

    /// Namespaces as a list
    pub fn namespaces(&self) -> Vec<String> {
        split_list(&self.allowed_namespaces).map(str::to_string).collect()
    }

    /// Clusters as a list
    pub fn clusters(&self) -> Vec<String> {
        split_list(&self.allowed_clusters).map(str::to_string).collect()
    }
}

/// Check an instance name on its own.
///
/// Every owned resource is named from it, so it has to hold before any
/// control plane sees it, on reads and deletes too.
pub fn validate_name(name: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_name(&mut errors, name);
    errors.into_result()
}

fn check_name(errors: &mut ValidationErrors, name: &str) {
    if name.is_empty() {
        errors.push("name", "required");
    } else if !name.chars().all(is_name_char) {
        errors.push("name", "must contain only letters, digits and '-'");
    } else if name == RESERVED_NAME {
        errors.push("name", "is reserved");
    }
}

/// Split a comma-joined list, trimming items and dropping empty ones
pub fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Random 8-character token from `[a-z0-9]`
pub fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..FEDERATION_NONCE_LEN)
        .map(|_| NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())] as char)
        .collect()
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+')
}

fn is_list_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | ',')
}
