use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub heartbeat: HeartbeatConfig,
    pub matching: MatchingConfig,
    pub dispatch: DispatchConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Cadence hint returned to clients as `nextPollSec`.
    pub nominal_interval_sec: u32,
    pub retention_days: i64,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Global ceiling on match distance; offer radii are clamped to it.
    pub max_distance_m: f64,
    pub max_candidates: i64,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub cooldown_sec: i64,
    pub dedupe_sec: i64,
    pub queue_capacity: usize,
    pub push_event_retention_days: i64,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub expo_url: String,
    pub fcm_url: String,
    pub fcm_server_key: Option<String>,
    pub timeout: Duration,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(4000),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("DB_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5432),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
                database: env::var("DB_NAME").unwrap_or_else(|_| "trailbeat".to_string()),
                ssl_mode: env::var("DB_SSL_MODE").unwrap_or_else(|_| "disable".to_string()),
                max_connections: env::var("DB_MAX_CONNS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(25),
            },
            heartbeat: HeartbeatConfig {
                nominal_interval_sec: env::var("HEARTBEAT_NOMINAL_SEC")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(60),
                retention_days: env::var("HEARTBEAT_RETENTION_DAYS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(30),
            },
            matching: MatchingConfig {
                max_distance_m: env::var("MATCH_MAX_DISTANCE_M")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(250.0),
                max_candidates: env::var("MATCH_MAX_CANDIDATES")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(20),
                max_results: env::var("MATCH_MAX_RESULTS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(10),
            },
            dispatch: DispatchConfig {
                cooldown_sec: env::var("DISPATCH_COOLDOWN_SEC")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(45),
                dedupe_sec: env::var("DISPATCH_DEDUPE_SEC")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5 * 60), // 5 minutes
                queue_capacity: env::var("DISPATCH_QUEUE_CAPACITY")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(256),
                push_event_retention_days: env::var("PUSH_EVENT_RETENTION_DAYS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(30),
                sweep_interval: Duration::from_secs(
                    env::var("RETENTION_SWEEP_SEC")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(15 * 60), // 15 minutes
                ),
            },
            push: PushConfig {
                expo_url: env::var("EXPO_PUSH_URL")
                    .unwrap_or_else(|_| "https://exp.host/--/api/v2/push/send".to_string()),
                fcm_url: env::var("FCM_SEND_URL")
                    .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string()),
                fcm_server_key: env::var("FCM_SERVER_KEY").ok(),
                timeout: Duration::from_secs(
                    env::var("PUSH_TIMEOUT_SEC")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(10),
                ),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.ssl_mode
        )
    }
}
