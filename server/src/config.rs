use std::env;

/// Runtime configuration, read once at startup. Development defaults keep
/// the server bootable with no environment at all: in-memory store and a
/// canned judge.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Allowed WebSocket origins. Empty list disables the check.
    pub allowed_origins: Vec<String>,
    /// SQLite URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub judge_base_url: String,
    /// `None` selects the canned judge.
    pub judge_api_key: Option<String>,
    pub judge_model: String,
    /// Delay between `player_list_updated` and the first turn, so clients
    /// can render roles before the clock starts.
    pub settle_delay_ms: u64,
    pub tick_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            port,
            allowed_origins,
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            judge_base_url: env::var("JUDGE_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            judge_api_key: env::var("JUDGE_API_KEY").ok().filter(|v| !v.is_empty()),
            judge_model: env::var("JUDGE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            settle_delay_ms: 1_000,
            tick_interval_ms: 1_000,
        }
    }

    /// Defaults used by the test suite: no settling delay worth waiting for.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            allowed_origins: Vec::new(),
            database_url: None,
            judge_base_url: String::new(),
            judge_api_key: None,
            judge_model: String::new(),
            settle_delay_ms: 10,
            tick_interval_ms: 20,
        }
    }
}
