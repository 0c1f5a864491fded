use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    DispatchStatus: "dispatch status" {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
    }
}

/// One idempotent send attempt of a protocol document
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProtocolDispatch {
    pub idempotency_key: String,
    pub protocol_id: Uuid,
    pub status: DispatchStatus,
    pub response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Key derived from everything that makes two send requests "the same send".
/// `document_fingerprint` covers the rendered inputs (content and signatures);
/// status and timestamps are left out so a replay after success still matches.
pub fn derive_idempotency_key(
    protocol_id: Uuid,
    recipient: &str,
    subject: &str,
    body: &str,
    document_fingerprint: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        protocol_id.to_string().as_str(),
        recipient.trim().to_ascii_lowercase().as_str(),
        subject,
        body,
        document_fingerprint,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_stable_and_discriminating() {
        let id = Uuid::new_v4();
        let a = derive_idempotency_key(id, "Jan@Example.com", "Protokół", "body", "{\"items\":[]}");
        let b = derive_idempotency_key(id, "jan@example.com ", "Protokół", "body", "{\"items\":[]}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = derive_idempotency_key(id, "jan@example.com", "Protokół", "other body", "{\"items\":[]}");
        assert_ne!(a, c);
        let d = derive_idempotency_key(id, "jan@example.com", "Protokół", "body", "{\"items\":[1]}");
        assert_ne!(a, d);
        // field boundaries matter
        let e = derive_idempotency_key(id, "jan@example.com", "Protokółbody", "", "{\"items\":[]}");
        assert_ne!(a, e);
    }
}
