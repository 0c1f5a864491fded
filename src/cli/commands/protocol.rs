use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::cli::utils::{format_table, output_empty_collection, output_success};
use crate::cli::{pool, OutputFormat};
use crate::database::models::protocol::ProtocolStatus;
use crate::database::models::user::Role;
use crate::filter::FilterData;
use crate::services::ProtocolService;

#[derive(Subcommand)]
pub enum ProtocolCommands {
    #[command(about = "List protocols, newest first")]
    List {
        #[arg(long, help = "Only protocols in this status (draft, sent, completed)")]
        status: Option<ProtocolStatus>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    #[command(about = "Mark a sent protocol as completed")]
    Complete {
        #[arg(help = "Protocol id (UUID)")]
        id: Uuid,
    },
}

/// Actor for workflow changes made from the command line
fn operator() -> AuthUser {
    AuthUser { id: Uuid::nil(), email: None, role: Role::Admin }
}

pub async fn handle(cmd: ProtocolCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let service = ProtocolService::new(pool()?);

    match cmd {
        ProtocolCommands::List { status, limit } => {
            let mut filter = FilterData { limit: Some(limit), ..Default::default() };
            if let Some(status) = status {
                filter = filter.and_eq("status", json!(status));
            }
            let protocols = service.select_any(filter).await?;
            if protocols.is_empty() {
                return output_empty_collection(output_format, "protocols", "No protocols found");
            }

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "protocols": protocols }))?);
                }
                OutputFormat::Text => {
                    let rows: Vec<Vec<String>> = protocols
                        .iter()
                        .map(|p| {
                            vec![
                                p.number.clone(),
                                p.status.to_string(),
                                p.id.to_string(),
                                p.created_at.format("%Y-%m-%d %H:%M").to_string(),
                            ]
                        })
                        .collect();
                    println!("{}", format_table(&["NUMBER", "STATUS", "ID", "CREATED"], &rows));
                }
            }
            Ok(())
        }
        ProtocolCommands::Complete { id } => {
            let protocol = service.complete(&operator(), id).await?;
            output_success(
                output_format,
                &format!("Protocol {} completed", protocol.number),
                Some(json!({ "protocol": protocol })),
            )
        }
    }
}
