//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Parenchym administration
#[derive(Parser, Debug)]
#[command(name = "pym", author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Directory data file (JSON)
    #[arg(short, long, global = true, env = "PYM_DATA")]
    pub data: Option<PathBuf>,

    /// Answer all prompts with yes
    #[arg(long, global = true)]
    pub yes: bool,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or edit the configuration file
    Config {
        /// Config action
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create the data file with built-in permissions, the anonymous
    /// account, and the superuser group
    Init {
        /// Replace an existing data file
        #[arg(long)]
        force: bool,
    },

    /// List all records of an entity
    Ls {
        /// Entity
        entity: Entity,
    },

    /// Show the permission tree
    PermissionTree,

    /// Show the transitive groups of a user
    Groups {
        /// Principal of the user
        principal: String,
    },

    /// Create an entity from JSON data
    Create {
        /// Entity
        entity: Entity,
        /// Data as JSON, e.g. '{"name": "editors"}'
        #[arg(id = "json_data", value_name = "DATA")]
        data: String,
    },

    /// Delete an entity
    Delete {
        /// Entity
        entity: Entity,
        /// ID, or name/principal where the entity has one
        id: String,
    },

    /// Allow a permission on a resource
    Allow(GrantArgs),

    /// Deny a permission on a resource
    Deny(GrantArgs),

    /// Evaluate the ACL of a resource for a user
    Check {
        /// Resource ID
        resource_id: i64,
        /// Permission name
        permission: String,
        /// Principal of the user
        principal: String,
    },
}

/// Arguments of `allow` and `deny`.
#[derive(clap::Args, Debug)]
pub struct GrantArgs {
    /// Resource ID
    pub resource_id: i64,
    /// Permission name
    pub permission: String,
    /// Group ("g:<id or name>") or user ("u:<id or principal>")
    pub who: String,
    /// Sort index; lower is evaluated first
    #[arg(long)]
    pub sortix: Option<i32>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved config file path
    Path,
    /// Get a value by dotted key, e.g. `cache.backend`
    Get {
        /// Dotted key
        key: String,
    },
    /// Set a value by dotted key
    Set {
        /// Dotted key
        key: String,
        /// New value
        value: String,
    },
    /// Write a default config file
    Init {
        /// Target file instead of the default location
        #[arg(long)]
        file: Option<String>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration as environment variables
    Export {
        /// Format as docker `--env` flags
        #[arg(long)]
        docker_env: bool,
    },
}

/// Entities known to `ls`, `create`, and `delete`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entity {
    /// User accounts
    User,
    /// Groups
    Group,
    /// Group memberships
    GroupMember,
    /// Permissions
    Permission,
    /// Access control entries
    Ace,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_allow() {
        let cli = Cli::try_parse_from([
            "pym", "--data", "/tmp/d.json", "allow", "7", "write", "g:editors", "--sortix", "10",
        ])
        .unwrap();
        match cli.command {
            Command::Allow(args) => {
                assert_eq!(args.resource_id, 7);
                assert_eq!(args.who, "g:editors");
                assert_eq!(args.sortix, Some(10));
            }
            other => unreachable!("{other:?}"),
        }
    }

    #[test]
    fn test_parse_entity_names() {
        let cli = Cli::try_parse_from(["pym", "ls", "group-member"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Ls {
                entity: Entity::GroupMember
            }
        ));
    }
}
