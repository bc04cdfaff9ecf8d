//! flagship CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

/// flagship - provision and tear down Unleash instances
#[derive(Parser, Debug)]
#[command(name = "flagship")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every instance
    List,
    /// Show one instance with its credential chain
    Get(commands::instances::GetArgs),
    /// Provision a new instance
    Create(commands::instances::InstanceArgs),
    /// Rewrite the server and network policy of an instance
    Update(commands::instances::InstanceArgs),
    /// Delete an instance and everything it owns
    Delete(commands::instances::DeleteArgs),
    /// List release versions available for pinning
    Versions,
    /// Print the server descriptor `create` would write, as YAML
    Render(commands::instances::InstanceArgs),
    /// List databases on the SQL instance
    Databases,
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let global = self.global;
        match self.command {
            Commands::List => commands::instances::list(&global).await,
            Commands::Get(args) => commands::instances::get(&global, args).await,
            Commands::Create(args) => commands::instances::create(&global, args).await,
            Commands::Update(args) => commands::instances::update(&global, args).await,
            Commands::Delete(args) => commands::instances::delete(&global, args).await,
            Commands::Versions => commands::catalog::versions(&global).await,
            Commands::Render(args) => commands::catalog::render(&global, args).await,
            Commands::Databases => commands::catalog::databases(&global).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_delete_with_confirmation() {
        let cli = Cli::try_parse_from(["flagship", "delete", "team-a", "--confirm", "team-a"])
            .expect("parse");
        match cli.command {
            Commands::Delete(args) => {
                assert_eq!(args.name, "team-a");
                assert_eq!(args.confirm, "team-a");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn delete_requires_confirmation() {
        assert!(Cli::try_parse_from(["flagship", "delete", "team-a"]).is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "flagship",
            "list",
            "--google-project-id",
            "nais-management",
            "--timeout-secs",
            "30",
        ])
        .expect("parse");
        assert_eq!(cli.global.google_project_id, "nais-management");
        assert_eq!(cli.global.timeout_secs, Some(30));
    }
}
