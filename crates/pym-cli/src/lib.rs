//! # pym-cli
//!
//! Admin CLI for Parenchym's authorization directory:
//! - Configuration file management (`pym config ...`)
//! - Users, groups, memberships, and the permission tree
//! - Access control entries and ACL checks
//!
//! The directory is kept in a JSON data file; every mutating command
//! loads it, applies the change through the managers of `pym-acl`, and
//! writes it back.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config_handlers;
pub mod context;
pub mod error;

use std::path::PathBuf;

use pym_core::PymConfig;

pub use cli::{Cli, Command};
pub use context::App;
pub use error::{Error, Result};

/// Run a parsed command line against a loaded configuration and return the
/// text to print.
pub async fn run(cli: Cli, config: PymConfig) -> Result<String> {
    let data_path = match cli.data.clone().or_else(App::default_data_path) {
        Some(path) => path,
        None if matches!(cli.command, Command::Config { .. }) => PathBuf::new(),
        None => {
            return Err(Error::invalid(
                "data path",
                "no platform data directory, pass --data",
            ));
        }
    };

    match cli.command {
        Command::Config { action } => Ok(config_handlers::handle_config_command(
            cli.config.as_deref(),
            action,
        )?),
        Command::Init { force } => {
            if data_path.exists() && !force {
                return Err(Error::invalid(
                    "data path",
                    format!("{} exists, pass --force to reinitialize", data_path.display()),
                ));
            }
            let app = App::empty(config, data_path).await?;
            let out = commands::init(&app).await?;
            app.save().await?;
            Ok(out)
        }
        Command::Ls { entity } => commands::ls(&App::open(config, data_path).await?, entity).await,
        Command::PermissionTree => {
            commands::permission_tree(&App::open(config, data_path).await?).await
        }
        Command::Groups { principal } => {
            commands::groups(&App::open(config, data_path).await?, &principal).await
        }
        Command::Check {
            resource_id,
            permission,
            principal,
        } => {
            let app = App::open(config, data_path).await?;
            commands::check(&app, resource_id, &permission, &principal).await
        }
        Command::Create { entity, data } => {
            let app = App::open(config, data_path).await?;
            let out = commands::create(&app, entity, &data).await?;
            app.save().await?;
            Ok(out)
        }
        Command::Delete { entity, id } => {
            let app = App::open(config, data_path).await?;
            commands::confirm(&format!("Delete {entity:?} {id}"), cli.yes)?;
            let out = commands::delete(&app, entity, &id).await?;
            app.save().await?;
            Ok(out)
        }
        Command::Allow(args) => {
            let app = App::open(config, data_path).await?;
            let out = commands::grant(&app, &args, true).await?;
            app.save().await?;
            Ok(out)
        }
        Command::Deny(args) => {
            let app = App::open(config, data_path).await?;
            let out = commands::grant(&app, &args, false).await?;
            app.save().await?;
            Ok(out)
        }
    }
}
