use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
    pub plans: PlanConfig,
    pub blob: BlobConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

/// Knobs for resolution and writes, handed to the identity layer explicitly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// How many fallback matches to fetch when probing for duplicates
    pub ambiguity_probe_limit: usize,
    /// Full resolve/authorize/apply re-runs after a write conflict
    pub write_retries: u32,
    /// Guard snapshot replacements with the snapshot itself
    pub compare_and_swap: bool,
    pub slug_max_attempts: u32,
    pub migration_concurrency: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            ambiguity_probe_limit: 5,
            write_retries: 3,
            compare_and_swap: true,
            slug_max_attempts: 5,
            migration_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// YAML or JSON plan catalog; the built-in catalog is used when unset
    pub catalog_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub upload_dir: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub enable_audit_logging: bool,
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
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }

        // Identity overrides
        if let Ok(v) = env::var("IDENTITY_AMBIGUITY_PROBE") {
            self.identity.ambiguity_probe_limit = v.parse().unwrap_or(self.identity.ambiguity_probe_limit);
        }
        if let Ok(v) = env::var("IDENTITY_WRITE_RETRIES") {
            self.identity.write_retries = v.parse().unwrap_or(self.identity.write_retries);
        }
        if let Ok(v) = env::var("IDENTITY_COMPARE_AND_SWAP") {
            self.identity.compare_and_swap = v.parse().unwrap_or(self.identity.compare_and_swap);
        }
        if let Ok(v) = env::var("IDENTITY_SLUG_MAX_ATTEMPTS") {
            self.identity.slug_max_attempts = v.parse().unwrap_or(self.identity.slug_max_attempts);
        }
        if let Ok(v) = env::var("MIGRATION_CONCURRENCY") {
            self.identity.migration_concurrency = v.parse().unwrap_or(self.identity.migration_concurrency);
        }

        // Plan catalog
        if let Ok(v) = env::var("PLAN_CATALOG_PATH") {
            self.plans.catalog_path = Some(v).filter(|p| !p.trim().is_empty());
        }

        // Blob storage
        if let Ok(v) = env::var("BLOB_UPLOAD_DIR") {
            self.blob.upload_dir = v;
        }
        if let Ok(v) = env::var("BLOB_PUBLIC_BASE_URL") {
            self.blob.public_base_url = v;
        }

        // API overrides
        if let Ok(v) = env::var("API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
            },
            identity: IdentityConfig::default(),
            plans: PlanConfig { catalog_path: None },
            blob: BlobConfig {
                upload_dir: "./uploads".to_string(),
                public_base_url: "http://localhost:3000/uploads/".to_string(),
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                jwt_secret: "development-secret".to_string(),
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                enable_audit_logging: false,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
            },
            identity: IdentityConfig::default(),
            plans: PlanConfig { catalog_path: None },
            blob: BlobConfig {
                upload_dir: "/var/lib/encarte/uploads".to_string(),
                public_base_url: "https://cdn.staging.example.com/uploads/".to_string(),
            },
            api: ApiConfig {
                port: 8080,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
                enable_audit_logging: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
            },
            identity: IdentityConfig {
                ambiguity_probe_limit: 2,
                ..IdentityConfig::default()
            },
            plans: PlanConfig { catalog_path: None },
            blob: BlobConfig {
                upload_dir: "/var/lib/encarte/uploads".to_string(),
                public_base_url: "https://cdn.example.com/uploads/".to_string(),
            },
            api: ApiConfig {
                port: 8080,
                enable_request_logging: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
                enable_audit_logging: true,
            },
        }
    }
}

// Global singleton config - read by the binaries at startup only
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.identity.compare_and_swap);
        assert_eq!(config.identity.ambiguity_probe_limit, 5);
        assert!(!config.security.jwt_secret.is_empty());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.identity.ambiguity_probe_limit, 2);
        assert!(config.security.jwt_secret.is_empty());
        assert!(config.security.enable_audit_logging);
    }
}
