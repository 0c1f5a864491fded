pub mod client;
pub mod dispatch;
pub mod email_log;
pub mod protocol;
pub mod settings;
pub mod template;
pub mod user;

use thiserror::Error;

/// A text column held a value outside its CHECK constraint set
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a lowercase text-backed enum that round-trips through
/// serde, `FromStr`, and Postgres `TEXT` columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident : $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::database::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::database::models::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <&str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(text.parse()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub(crate) use text_enum;

#[cfg(test)]
mod tests {
    use super::client::ClientStatus;
    use super::protocol::ProtocolStatus;

    #[test]
    fn text_enums_parse_and_display() {
        assert_eq!("sent".parse::<ProtocolStatus>().unwrap(), ProtocolStatus::Sent);
        assert_eq!(ClientStatus::Inactive.to_string(), "inactive");
        let err = "archived".parse::<ClientStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown client status 'archived'");
    }

    #[test]
    fn text_enums_serialize_lowercase() {
        assert_eq!(serde_json::to_value(ProtocolStatus::Completed).unwrap(), "completed");
        let parsed: ClientStatus = serde_json::from_value(serde_json::json!("active")).unwrap();
        assert_eq!(parsed, ClientStatus::Active);
    }
}
