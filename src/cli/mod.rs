pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::config;
use crate::database::DatabaseManager;

#[derive(Parser)]
#[command(name = "handover")]
#[command(about = "Handover CLI - administration of the handover protocol API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Issue a signed access token for local testing")]
    Token {
        #[arg(long, help = "User id (UUID)")]
        user: uuid::Uuid,
        #[arg(long, help = "E-mail placed in the token")]
        email: Option<String>,
    },

    #[command(about = "User role management")]
    Role {
        #[command(subcommand)]
        cmd: commands::role::RoleCommands,
    },

    #[command(about = "Protocol inspection and workflow")]
    Protocol {
        #[command(subcommand)]
        cmd: commands::protocol::ProtocolCommands,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Pool for commands that talk to the database directly
pub(crate) fn pool() -> anyhow::Result<PgPool> {
    Ok(DatabaseManager::connect(&config().database)?)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Migrate => commands::migrate::handle(output_format).await,
        Commands::Token { user, email } => commands::token::handle(user, email, output_format),
        Commands::Role { cmd } => commands::role::handle(cmd, output_format).await,
        Commands::Protocol { cmd } => commands::protocol::handle(cmd, output_format).await,
    }
}
