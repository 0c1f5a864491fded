use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::cli::OutputFormat;

/// Prints a token signed with the configured JWT_SECRET
pub fn handle(user: Uuid, email: Option<String>, output_format: OutputFormat) -> anyhow::Result<()> {
    let claims = Claims::new(user, email);
    let token = generate_jwt(&claims)?;

    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "success": true,
                    "token": token,
                    "user_id": claims.sub,
                    "expires_at": claims.exp
                }))?
            );
        }
        OutputFormat::Text => println!("{}", token),
    }
    Ok(())
}
