use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string
    pub redis_url: String,

    /// How long a processed change event id is remembered, in seconds (default: 3600)
    pub event_dedup_ttl_seconds: u64,

    /// Firebase project that owns the FCM sender
    pub fcm_project_id: String,

    /// OAuth2 bearer token used for FCM and the identity provider
    pub fcm_access_token: String,

    /// FCM base URL (overridable for tests and emulators)
    pub fcm_endpoint: String,

    /// Identity Toolkit base URL
    pub identity_endpoint: String,

    /// Total push attempts per dispatch call (default: 3)
    pub push_max_attempts: u32,

    /// Base backoff delay in milliseconds (default: 300)
    pub push_base_delay_ms: u64,

    /// Deadline of a single FCM or identity provider request in milliseconds (default: 10000)
    pub push_request_timeout_ms: u64,

    /// JWT secret for API authentication
    pub jwt_secret: String,

    /// JWT token expiry in hours
    pub jwt_expiry_hours: u64,

    /// Domain of the synthetic email given to created users (default: gmail.com)
    pub user_email_domain: String,

    /// API listen port (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            event_dedup_ttl_seconds: std::env::var("EVENT_DEDUP_TTL_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("EVENT_DEDUP_TTL_SECONDS must be a valid u64"))?,
            fcm_project_id: std::env::var("FCM_PROJECT_ID")
                .map_err(|_| anyhow::anyhow!("FCM_PROJECT_ID environment variable is required"))?,
            fcm_access_token: std::env::var("FCM_ACCESS_TOKEN").map_err(|_| {
                anyhow::anyhow!("FCM_ACCESS_TOKEN environment variable is required")
            })?,
            fcm_endpoint: std::env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            identity_endpoint: std::env::var("IDENTITY_ENDPOINT")
                .unwrap_or_else(|_| "https://identitytoolkit.googleapis.com".to_string()),
            push_max_attempts: std::env::var("PUSH_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_MAX_ATTEMPTS must be a valid u32"))?,
            push_base_delay_ms: std::env::var("PUSH_BASE_DELAY_MS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_BASE_DELAY_MS must be a valid u64"))?,
            push_request_timeout_ms: std::env::var("PUSH_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_REQUEST_TIMEOUT_MS must be a valid u64"))?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_expiry_hours: std::env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("JWT_EXPIRY_HOURS must be a valid u64"))?,
            user_email_domain: std::env::var("USER_EMAIL_DOMAIN")
                .unwrap_or_else(|_| "gmail.com".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
        })
    }
}
