use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::cli::{pool, utils::output_success, OutputFormat};
use crate::database::models::user::Role;
use crate::services::UserService;

#[derive(Subcommand)]
pub enum RoleCommands {
    #[command(about = "Assign a role to an existing user")]
    Set {
        #[arg(help = "User id (UUID)")]
        user: Uuid,
        #[arg(help = "admin, manager or worker")]
        role: Role,
    },
}

pub async fn handle(cmd: RoleCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        RoleCommands::Set { user, role } => {
            let updated = UserService::new(pool()?).assign_role(user, role).await?;
            output_success(
                output_format,
                &format!("User {} is now {}", user, updated.role),
                Some(json!({ "user": updated })),
            )
        }
    }
}
