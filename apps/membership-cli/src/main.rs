//! membership - answer group membership questions against Active Directory
//! and a local group store.
//!
//! Every subcommand prints the result envelope as JSON and exits non-zero
//! when the envelope reports a failure.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use membership_core::{InMemoryLocalStore, MembershipService, ResultEnvelope, SidCache};
use membership_directory::LdapDirectory;

mod config;

use config::CliConfig;

/// Membership resolution over Active Directory and a local group store
#[derive(Parser)]
#[command(name = "membership")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all local groups
    LocalGroups,

    /// Check whether a user belongs to a local group
    InLocalGroup {
        /// User login (claims-encoded, DOMAIN\account or SID)
        login: String,
        /// Local group name
        group: String,
    },

    /// List the members of a local group
    LocalGroupMembers {
        /// Local group name
        group: String,
    },

    /// List the users of a directory group
    DirectoryGroupMembers {
        /// Directory group login
        group: String,
    },

    /// Check whether a user belongs to a directory group
    InDirectoryGroup {
        /// User login
        login: String,
        /// Directory group login
        group: String,
    },

    /// List the directory groups of a user, including nested groups
    DirectoryGroups {
        /// User login
        login: String,
    },

    /// List the local groups of a user, including through directory groups
    LocalGroupsOf {
        /// User login
        login: String,
    },

    /// Expand a directory group with its resolution log
    ResolveGroup {
        /// Directory group login
        group: String,
    },

    /// Check that the domain controller is reachable with the configured account
    TestConnection,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,membership_core=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match CliConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let directory = match LdapDirectory::new(config.directory.clone()) {
        Ok(directory) => Arc::new(directory),
        Err(e) => {
            eprintln!("Directory configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::debug!(config = ?config, "loaded configuration");

    let code = if let Commands::TestConnection = cli.command {
        match directory.test_connection().await {
            Ok(()) => {
                println!("Connection to {} succeeded.", config.directory.url());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Connection to {} failed: {e}", config.directory.url());
                ExitCode::FAILURE
            }
        }
    } else {
        let store = match InMemoryLocalStore::from_path(&config.local_store_path) {
            Ok(store) => Arc::new(store.with_directory(directory.clone())),
            Err(e) => {
                eprintln!(
                    "Local store error ({}): {e}",
                    config.local_store_path.display()
                );
                return ExitCode::FAILURE;
            }
        };
        let service = MembershipService::new(directory.clone(), store, Arc::new(SidCache::new()));
        run(&service, cli.command).await
    };

    directory.dispose().await;
    code
}

async fn run(service: &MembershipService, command: Commands) -> ExitCode {
    match command {
        Commands::LocalGroups => print(service.all_local_groups().await),
        Commands::InLocalGroup { login, group } => {
            print(service.is_user_in_local_group(&login, &group).await)
        }
        Commands::LocalGroupMembers { group } => print(service.local_group_members(&group).await),
        Commands::DirectoryGroupMembers { group } => {
            print(service.directory_group_members(&group).await)
        }
        Commands::InDirectoryGroup { login, group } => {
            print(service.is_user_in_directory_group(&login, &group).await)
        }
        Commands::DirectoryGroups { login } => {
            print(service.directory_groups_of_user(&login).await)
        }
        Commands::LocalGroupsOf { login } => print(service.local_groups_of_user(&login).await),
        Commands::ResolveGroup { group } => print(service.resolve_directory_group(&group).await),
        Commands::TestConnection => ExitCode::SUCCESS,
    }
}

fn print<T: Serialize>(envelope: ResultEnvelope<T>) -> ExitCode {
    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize result: {e}");
            return ExitCode::FAILURE;
        }
    }

    if envelope.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
