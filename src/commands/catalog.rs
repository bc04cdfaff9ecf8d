//! Read-only commands: release versions, databases and descriptor rendering

use flagship_instance::orchestrator::render as render_server;
use flagship_instance::versions::available_versions;

use super::instances::InstanceArgs;
use super::{format_table, GlobalArgs};
use crate::Result;

/// Release tags usable with `--version`, most recent first
pub async fn versions(global: &GlobalArgs) -> Result<()> {
    let source = global.version_source()?;
    let versions = available_versions(&source).await;

    let rows: Vec<Vec<String>> = versions
        .iter()
        .map(|v| {
            vec![
                v.git_tag.clone(),
                v.version_number.clone(),
                v.release_time.format("%Y-%m-%d %H:%M").to_string(),
                v.commit_hash.clone(),
            ]
        })
        .collect();
    println!(
        "{}",
        format_table(&["TAG", "VERSION", "RELEASED", "COMMIT"], &rows)
    );
    Ok(())
}

/// Print the descriptor `create` would write. Only the version registry is
/// consulted, and only when no version is pinned.
pub async fn render(global: &GlobalArgs, args: InstanceArgs) -> Result<()> {
    let source = global.version_source()?;
    let server = render_server(&global.config(), &source, args.to_new_config()).await?;
    print!("{}", serde_yaml::to_string(&server)?);
    Ok(())
}

/// Databases on the SQL instance, the system database excluded
pub async fn databases(global: &GlobalArgs) -> Result<()> {
    let orchestrator = global.connect().await?;
    let databases = orchestrator.databases().await?;

    let rows: Vec<Vec<String>> = databases
        .into_iter()
        .map(|d| {
            vec![
                d.name,
                d.charset.unwrap_or_default(),
                d.collation.unwrap_or_default(),
            ]
        })
        .collect();
    println!(
        "{}",
        format_table(&["NAME", "CHARSET", "COLLATION"], &rows)
    );
    Ok(())
}
