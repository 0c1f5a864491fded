use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub email: EmailConfig,
    pub documents: DocumentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub run_migrations: bool,
    pub max_list_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_expiry_hours: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Supabase,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Base URL of the hosted project, e.g. https://xyz.supabase.co
    pub base_url: String,
    #[serde(skip_serializing)]
    pub service_key: String,
    pub local_root: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    Resend,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub max_signature_bytes: usize,
    pub max_upload_bytes: usize,
    /// Ceiling on the decompressed size of an uploaded DOCX package
    pub max_unpacked_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_RUN_MIGRATIONS") {
            self.database.run_migrations = v.parse().unwrap_or(self.database.run_migrations);
        }
        if let Ok(v) = env::var("DATABASE_MAX_LIST_LIMIT") {
            self.database.max_list_limit = v.parse().unwrap_or(self.database.max_list_limit);
        }

        // API overrides
        if let Some(port) = env::var("HANDOVER_API_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse().ok())
        {
            self.api.port = port;
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_AUDIENCE") {
            self.security.jwt_audience = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }

        // Storage overrides
        if let Ok(v) = env::var("STORAGE_BACKEND") {
            match v.to_ascii_lowercase().as_str() {
                "supabase" => self.storage.backend = StorageBackend::Supabase,
                "local" => self.storage.backend = StorageBackend::Local,
                other => tracing::warn!("Unknown STORAGE_BACKEND '{}', keeping {:?}", other, self.storage.backend),
            }
        }
        if let Ok(v) = env::var("STORAGE_BASE_URL") {
            self.storage.base_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("STORAGE_SERVICE_KEY") {
            self.storage.service_key = v;
        }
        if let Ok(v) = env::var("STORAGE_LOCAL_ROOT") {
            self.storage.local_root = v;
        }
        if let Ok(v) = env::var("STORAGE_PUBLIC_BASE_URL") {
            self.storage.public_base_url = v.trim_end_matches('/').to_string();
        }

        // Email overrides
        if let Ok(v) = env::var("EMAIL_PROVIDER") {
            match v.to_ascii_lowercase().as_str() {
                "resend" => self.email.provider = EmailProvider::Resend,
                "log" => self.email.provider = EmailProvider::Log,
                other => tracing::warn!("Unknown EMAIL_PROVIDER '{}', keeping {:?}", other, self.email.provider),
            }
        }
        if let Ok(v) = env::var("EMAIL_API_URL") {
            self.email.api_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("EMAIL_API_KEY") {
            self.email.api_key = v;
        }
        if let Ok(v) = env::var("EMAIL_FROM_ADDRESS") {
            self.email.from_address = v;
        }

        // Document overrides
        if let Ok(v) = env::var("DOCUMENT_MAX_SIGNATURE_BYTES") {
            self.documents.max_signature_bytes = v.parse().unwrap_or(self.documents.max_signature_bytes);
        }
        if let Ok(v) = env::var("DOCUMENT_MAX_UPLOAD_BYTES") {
            self.documents.max_upload_bytes = v.parse().unwrap_or(self.documents.max_upload_bytes);
        }
        if let Ok(v) = env::var("DOCUMENT_MAX_UNPACKED_BYTES") {
            self.documents.max_unpacked_bytes = v.parse().unwrap_or(self.documents.max_unpacked_bytes);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                run_migrations: true,
                max_list_limit: 1000,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_audience: "authenticated".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                base_url: String::new(),
                service_key: String::new(),
                local_root: "data/storage".to_string(),
                public_base_url: "http://localhost:3000/storage".to_string(),
            },
            email: EmailConfig {
                provider: EmailProvider::Log,
                api_url: "https://api.resend.com".to_string(),
                api_key: String::new(),
                from_address: "Protocols <protocols@localhost>".to_string(),
            },
            documents: DocumentConfig {
                max_signature_bytes: 512 * 1024,
                max_upload_bytes: 10 * 1024 * 1024,
                max_unpacked_bytes: 64 * 1024 * 1024,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                run_migrations: true,
                max_list_limit: 500,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_audience: "authenticated".to_string(),
                jwt_expiry_hours: 24,
            },
            storage: StorageConfig {
                backend: StorageBackend::Supabase,
                base_url: String::new(),
                service_key: String::new(),
                local_root: "data/storage".to_string(),
                public_base_url: String::new(),
            },
            email: EmailConfig {
                provider: EmailProvider::Resend,
                api_url: "https://api.resend.com".to_string(),
                api_key: String::new(),
                from_address: "Protocols <protocols@staging.example.com>".to_string(),
            },
            documents: DocumentConfig {
                max_signature_bytes: 512 * 1024,
                max_upload_bytes: 10 * 1024 * 1024,
                max_unpacked_bytes: 64 * 1024 * 1024,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                run_migrations: false,
                max_list_limit: 200,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: false,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                jwt_secret: String::new(),
                jwt_audience: "authenticated".to_string(),
                jwt_expiry_hours: 4,
            },
            storage: StorageConfig {
                backend: StorageBackend::Supabase,
                base_url: String::new(),
                service_key: String::new(),
                local_root: "data/storage".to_string(),
                public_base_url: String::new(),
            },
            email: EmailConfig {
                provider: EmailProvider::Resend,
                api_url: "https://api.resend.com".to_string(),
                api_key: String::new(),
                from_address: "Protocols <protocols@example.com>".to_string(),
            },
            documents: DocumentConfig {
                max_signature_bytes: 256 * 1024,
                max_upload_bytes: 5 * 1024 * 1024,
                max_unpacked_bytes: 32 * 1024 * 1024,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.database.run_migrations);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.email.provider, EmailProvider::Log);
        assert!(!config.security.jwt_secret.is_empty());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.database.run_migrations);
        assert_eq!(config.database.max_list_limit, 200);
        assert_eq!(config.storage.backend, StorageBackend::Supabase);
        assert!(config.security.jwt_secret.is_empty(), "production secret must come from env");
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let config = AppConfig::development();
        let value = serde_json::to_value(&config).unwrap();
        assert!(value["security"].get("jwt_secret").is_none());
        assert!(value["email"].get("api_key").is_none());
        assert!(value["storage"].get("service_key").is_none());
    }
}
