//! Instance lifecycle commands: list, get, create, update and delete

use clap::Args;
use flagship_instance::{InstanceConfig, LogLevel, ProvisionedInstance};
use tracing::info;

use super::{format_table, GlobalArgs};
use crate::{Error, Result};

/// Show one instance
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Instance name
    pub name: String,
}

/// Instance settings; unset flags keep the default on create and the stored
/// value on update
#[derive(Args, Debug, Clone)]
pub struct InstanceArgs {
    /// Instance name
    pub name: String,

    /// Release tag to pin (default: latest release)
    #[arg(long = "version", value_name = "TAG")]
    pub version_pin: Option<String>,

    /// Comma-separated extra principals allowed to use the instance
    #[arg(long)]
    pub principals: Option<String>,

    /// Comma-separated namespaces (teams) allowed to use the instance
    #[arg(long)]
    pub namespaces: Option<String>,

    /// Comma-separated clusters federated with the instance
    #[arg(long)]
    pub clusters: Option<String>,

    /// Server log level
    #[arg(long)]
    pub log_level: Option<LogLevel>,

    /// Maximum database connections
    #[arg(long)]
    pub pool_max: Option<u32>,

    /// Idle timeout of pooled database connections, in milliseconds
    #[arg(long)]
    pub pool_idle_timeout_ms: Option<u64>,

    /// Turn federation off
    #[arg(long)]
    pub no_federation: bool,
}

impl InstanceArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut InstanceConfig) {
        if let Some(pin) = &self.version_pin {
            config.version_pin = pin.clone();
        }
        if let Some(principals) = &self.principals {
            config.allowed_principals = principals.clone();
        }
        if let Some(namespaces) = &self.namespaces {
            config.allowed_namespaces = namespaces.clone();
        }
        if let Some(clusters) = &self.clusters {
            config.allowed_clusters = clusters.clone();
        }
        if let Some(level) = self.log_level {
            config.log_level = level.to_string();
        }
        if let Some(max) = self.pool_max {
            config.db_pool_max = max;
        }
        if let Some(timeout) = self.pool_idle_timeout_ms {
            config.db_pool_idle_timeout_ms = timeout;
        }
        if self.no_federation {
            config.federation_enabled = false;
        }
    }

    /// A fresh config for `create` and `render`
    pub fn to_new_config(&self) -> InstanceConfig {
        let mut config = InstanceConfig::new(self.name.clone());
        self.apply(&mut config);
        config
    }
}

/// Delete an instance
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Instance name
    pub name: String,

    /// The instance name again, to confirm
    #[arg(long)]
    pub confirm: String,
}

impl DeleteArgs {
    /// The re-typed name must match exactly
    pub fn check_confirmation(&self) -> Result<()> {
        if self.confirm != self.name {
            return Err(Error::ConfirmationMismatch {
                expected: self.name.clone(),
                got: self.confirm.clone(),
            });
        }
        Ok(())
    }
}

pub async fn list(global: &GlobalArgs) -> Result<()> {
    let orchestrator = global.connect().await?;
    let instances = orchestrator.list().await?;

    let rows: Vec<Vec<String>> = instances.iter().map(summary_row).collect();
    println!(
        "{}",
        format_table(&["NAME", "VERSION", "STATUS", "AGE", "URL"], &rows)
    );
    Ok(())
}

pub async fn get(global: &GlobalArgs, args: GetArgs) -> Result<()> {
    let orchestrator = global.connect().await?;
    let instance = orchestrator.get(&args.name).await?;
    let credentials = orchestrator.credentials(&args.name).await?;

    println!("{}", describe(&instance));
    println!(
        "Database:    {}",
        presence(credentials.database.as_ref().map(|d| d.name.as_str()))
    );
    println!(
        "User:        {}",
        presence(credentials.user.as_ref().map(|u| u.name.as_str()))
    );
    Ok(())
}

pub async fn create(global: &GlobalArgs, args: InstanceArgs) -> Result<()> {
    let orchestrator = global.connect().await?;
    orchestrator.create(args.to_new_config()).await?;

    info!(instance = %args.name, "instance created");
    println!("Created {}", args.name);
    Ok(())
}

pub async fn update(global: &GlobalArgs, args: InstanceArgs) -> Result<()> {
    let orchestrator = global.connect().await?;

    // Start from what is stored so unset flags keep their values
    let mut config = orchestrator
        .get(&args.name)
        .await?
        .config()
        .unwrap_or_else(|| InstanceConfig::new(args.name.clone()));
    args.apply(&mut config);
    orchestrator.update(config).await?;

    info!(instance = %args.name, "instance updated");
    println!("Updated {}", args.name);
    Ok(())
}

pub async fn delete(global: &GlobalArgs, args: DeleteArgs) -> Result<()> {
    args.check_confirmation()?;

    let orchestrator = global.connect().await?;
    orchestrator.delete(&args.name).await?;

    info!(instance = %args.name, "instance deleted");
    println!("Deleted {}", args.name);
    Ok(())
}

fn summary_row(instance: &ProvisionedInstance) -> Vec<String> {
    vec![
        instance.name.clone(),
        instance.version().unwrap_or_default(),
        instance.status().to_string(),
        instance.age().unwrap_or_default(),
        instance.web_url().unwrap_or_default(),
    ]
}

fn describe(instance: &ProvisionedInstance) -> String {
    let mut lines = vec![
        format!("Name:        {}", instance.name),
        format!("Namespace:   {}", instance.namespace),
        format!("Status:      {}", instance.status()),
        format!("Version:     {}", instance.version().unwrap_or_default()),
        format!("Age:         {}", instance.age().unwrap_or_default()),
        format!("Web:         {}", instance.web_url().unwrap_or_default()),
        format!("API:         {}", instance.api_url().unwrap_or_default()),
    ];

    if let Some(config) = instance.config() {
        lines.push(format!("Log level:   {}", config.log_level));
        lines.push(format!(
            "DB pool:     max {}, idle timeout {}ms",
            config.db_pool_max, config.db_pool_idle_timeout_ms
        ));
        lines.push(format!("Teams:       {}", config.namespaces().join(", ")));
        if config.federation_enabled {
            lines.push(format!("Federation:  {}", config.clusters().join(", ")));
        } else {
            lines.push("Federation:  disabled".to_string());
        }
    }

    lines.join("\n")
}

fn presence(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("{} (present)", name),
        None => "missing".to_string(),
    }
}
