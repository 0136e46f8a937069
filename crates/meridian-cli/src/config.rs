//! Process-level configuration: environment-variable-driven config
//! structs, one per subsystem, assembled into a single [`MeridianConfig`]
//! read once at startup — the same `from_env()` idiom `meridian_db::config::DbConfig`
//! uses.

use std::env;

use meridian_db::config::DbConfig;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct DashboardEnvConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl DashboardEnvConfig {
    pub const DEFAULT_BASE_URL: &str = "http://localhost:4000";

    pub fn from_env() -> Self {
        Self {
            base_url: env::var("DASHBOARD_BASE_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string()),
            api_token: env::var("DASHBOARD_API_TOKEN").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct TransportEnvConfig {
    pub backend: TransportBackend,
}

impl TransportEnvConfig {
    pub fn from_env() -> Self {
        let backend = match env::var("TRANSPORT_BACKEND").as_deref() {
            Ok("redis") => TransportBackend::Redis {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            _ => TransportBackend::Memory,
        };
        Self { backend }
    }
}

#[derive(Debug, Clone)]
pub struct PersonaEnvConfig {
    pub default_timeout_ms: u64,
    pub retry_backoff_increment_ms: u64,
    pub max_information_iterations: u32,
    pub max_unique_sources: usize,
}

impl PersonaEnvConfig {
    pub fn from_env() -> Self {
        Self {
            default_timeout_ms: env_u64("PERSONA_DEFAULT_TIMEOUT_MS", 120_000),
            retry_backoff_increment_ms: env_u64("PERSONA_RETRY_BACKOFF_INCREMENT_MS", 30_000),
            max_information_iterations: env_u32("MAX_INFORMATION_ITERATIONS", 5),
            max_unique_sources: env_usize("MAX_UNIQUE_SOURCES", 12),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorEnvConfig {
    pub max_iterations: u32,
}

impl CoordinatorEnvConfig {
    pub fn from_env() -> Self {
        Self {
            max_iterations: env_u32("COORDINATOR_MAX_ITERATIONS", 500),
        }
    }
}

/// Fully resolved process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct MeridianConfig {
    pub db: DbConfig,
    pub dashboard: DashboardEnvConfig,
    pub transport: TransportEnvConfig,
    pub persona: PersonaEnvConfig,
    pub coordinator: CoordinatorEnvConfig,
}

impl MeridianConfig {
    pub fn from_env() -> Self {
        Self {
            db: DbConfig::from_env(),
            dashboard: DashboardEnvConfig::from_env(),
            transport: TransportEnvConfig::from_env(),
            persona: PersonaEnvConfig::from_env(),
            coordinator: CoordinatorEnvConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn dashboard_defaults_when_unset() {
        let _lock = lock_env();
        unsafe { env::remove_var("DASHBOARD_BASE_URL") };
        unsafe { env::remove_var("DASHBOARD_API_TOKEN") };
        let cfg = DashboardEnvConfig::from_env();
        assert_eq!(cfg.base_url, DashboardEnvConfig::DEFAULT_BASE_URL);
        assert!(cfg.api_token.is_none());
    }

    #[test]
    fn transport_defaults_to_memory() {
        let _lock = lock_env();
        unsafe { env::remove_var("TRANSPORT_BACKEND") };
        let cfg = TransportEnvConfig::from_env();
        assert!(matches!(cfg.backend, TransportBackend::Memory));
    }

    #[test]
    fn transport_reads_redis_url_when_backend_is_redis() {
        let _lock = lock_env();
        unsafe { env::set_var("TRANSPORT_BACKEND", "redis") };
        unsafe { env::set_var("REDIS_URL", "redis://example:6380") };
        let cfg = TransportEnvConfig::from_env();
        match cfg.backend {
            TransportBackend::Redis { url } => assert_eq!(url, "redis://example:6380"),
            TransportBackend::Memory => panic!("expected redis backend"),
        }
        unsafe { env::remove_var("TRANSPORT_BACKEND") };
        unsafe { env::remove_var("REDIS_URL") };
    }

    #[test]
    fn persona_config_has_documented_defaults() {
        let _lock = lock_env();
        unsafe { env::remove_var("MAX_INFORMATION_ITERATIONS") };
        unsafe { env::remove_var("MAX_UNIQUE_SOURCES") };
        let cfg = PersonaEnvConfig::from_env();
        assert_eq!(cfg.max_information_iterations, 5);
        assert_eq!(cfg.max_unique_sources, 12);
    }
}
