//! Configuration module.
//!
//! One immutable snapshot loaded from environment variables (plus an
//! optional .env file) at startup. The only mutation after startup is
//! the documented watchlist hot-reload path.

use anyhow::Result;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::infrastructure::core::rate_gate::GatePolicy;

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v.trim().eq_ignore_ascii_case("true") || v.trim() == "1",
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Immutable runtime configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    // Watchlist
    pub stock_list: Vec<String>,

    // Data source credentials
    pub tushare_token: Option<String>,
    pub finmind_token: Option<String>,

    // LLM
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: String,
    pub llm_temperature: f64,

    // Search (rotating key pools)
    pub bocha_api_keys: Vec<String>,
    pub tavily_api_keys: Vec<String>,
    pub brave_api_keys: Vec<String>,
    pub serpapi_keys: Vec<String>,

    // Notification channels
    pub wechat_webhook_url: Option<String>,
    pub feishu_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub custom_webhook_urls: Vec<String>,
    pub custom_webhook_bearer_token: Option<String>,
    pub pushover_user_key: Option<String>,
    pub pushover_api_token: Option<String>,
    pub email_sender: Option<String>,
    pub email_sender_name: String,
    pub email_password: Option<String>,
    pub email_receivers: Vec<String>,

    // Report shaping
    pub single_stock_notify: bool,
    pub report_type: String,
    pub feishu_max_bytes: usize,
    pub wechat_max_bytes: usize,
    pub wechat_msg_type: String,

    // Persistence / reports
    pub database_path: String,
    pub save_context_snapshot: bool,
    pub reports_dir: PathBuf,

    // Logging
    pub log_dir: String,
    pub log_level: String,

    // Concurrency / scheduling
    pub max_workers: usize,
    pub analysis_delay: f64,
    pub schedule_enabled: bool,
    pub schedule_time: String,
    pub schedule_run_immediately: bool,
    pub market_review_enabled: bool,

    // Realtime data shaping
    pub enable_realtime_quote: bool,
    pub enable_chip_distribution: bool,
    pub realtime_source_priority: Vec<String>,
    pub realtime_cache_ttl: u64,
    pub circuit_breaker_cooldown: u64,

    // Flow control
    pub akshare_sleep_min: f64,
    pub akshare_sleep_max: f64,
    pub tushare_rate_limit_per_minute: u32,

    // Per-source priority overrides
    pub source_priorities: HashMap<String, i32>,

    // Proxy
    pub http_proxy: Option<String>,

    pub debug: bool,
}

const SOURCE_KEYS: [&str; 6] = ["eastmoney", "tencent", "sina", "tushare", "baostock", "yahoo"];

const DEFAULT_PRIORITIES: [(&str, i32); 6] = [
    ("eastmoney", 0),
    ("tencent", 1),
    ("sina", 2),
    ("tushare", 3),
    ("baostock", 4),
    ("yahoo", 5),
];

impl Config {
    /// Load the snapshot. `.env` (or `ENV_FILE`) is read first so plain
    /// exports still win over file entries.
    pub fn from_env() -> Result<Self> {
        match env::var("ENV_FILE") {
            Ok(path) => {
                let _ = dotenvy::from_path(&path);
            }
            Err(_) => {
                let _ = dotenvy::dotenv();
            }
        }

        let mut stock_list = env_list("STOCK_LIST");
        if stock_list.is_empty() {
            // Sample watchlist so a bare checkout produces output.
            stock_list = vec!["600519".into(), "000001".into(), "2330.TW".into()];
        }

        let wechat_msg_type = env_str("WECHAT_MSG_TYPE", "markdown").to_lowercase();
        let wechat_max_bytes = match env_opt("WECHAT_MAX_BYTES") {
            Some(v) => v.parse().unwrap_or(4000),
            // Text messages have a tighter upstream cap than markdown.
            None if wechat_msg_type == "text" => 2048,
            None => 4000,
        };

        let mut source_priorities = HashMap::new();
        for (key, default) in DEFAULT_PRIORITIES {
            let env_key = format!("{}_PRIORITY", key.to_uppercase());
            source_priorities.insert(key.to_string(), env_parse(&env_key, default));
        }

        Ok(Self {
            stock_list,
            tushare_token: env_opt("TUSHARE_TOKEN"),
            finmind_token: env_opt("FINMIND_TOKEN"),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            gemini_model: env_str("GEMINI_MODEL", "gemini-2.5-flash"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_opt("OPENAI_BASE_URL"),
            openai_model: env_str("OPENAI_MODEL", "gpt-4o-mini"),
            llm_temperature: env_parse("LLM_TEMPERATURE", 0.7),
            bocha_api_keys: env_list("BOCHA_API_KEYS"),
            tavily_api_keys: env_list("TAVILY_API_KEYS"),
            brave_api_keys: env_list("BRAVE_API_KEYS"),
            serpapi_keys: env_list("SERPAPI_API_KEYS"),
            wechat_webhook_url: env_opt("WECHAT_WEBHOOK_URL"),
            feishu_webhook_url: env_opt("FEISHU_WEBHOOK_URL"),
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
            discord_webhook_url: env_opt("DISCORD_WEBHOOK_URL"),
            custom_webhook_urls: env_list("CUSTOM_WEBHOOK_URLS"),
            custom_webhook_bearer_token: env_opt("CUSTOM_WEBHOOK_BEARER_TOKEN"),
            pushover_user_key: env_opt("PUSHOVER_USER_KEY"),
            pushover_api_token: env_opt("PUSHOVER_API_TOKEN"),
            email_sender: env_opt("EMAIL_SENDER"),
            email_sender_name: env_str("EMAIL_SENDER_NAME", "equisight 股票分析助手"),
            email_password: env_opt("EMAIL_PASSWORD"),
            email_receivers: env_list("EMAIL_RECEIVERS"),
            single_stock_notify: env_bool("SINGLE_STOCK_NOTIFY", false),
            report_type: env_str("REPORT_TYPE", "simple").to_lowercase(),
            feishu_max_bytes: env_parse("FEISHU_MAX_BYTES", 20000),
            wechat_max_bytes,
            wechat_msg_type,
            database_path: env_str("DATABASE_PATH", "./data/stock_analysis.db"),
            save_context_snapshot: env_bool("SAVE_CONTEXT_SNAPSHOT", true),
            reports_dir: PathBuf::from(env_str("REPORTS_DIR", "./reports")),
            log_dir: env_str("LOG_DIR", "./logs"),
            log_level: env_str("LOG_LEVEL", "INFO"),
            max_workers: env_parse("MAX_WORKERS", 3),
            analysis_delay: env_parse("ANALYSIS_DELAY", 0.0),
            schedule_enabled: env_bool("SCHEDULE_ENABLED", false),
            schedule_time: env_str("SCHEDULE_TIME", "18:00"),
            schedule_run_immediately: env_bool("SCHEDULE_RUN_IMMEDIATELY", true),
            market_review_enabled: env_bool("MARKET_REVIEW_ENABLED", true),
            enable_realtime_quote: env_bool("ENABLE_REALTIME_QUOTE", true),
            enable_chip_distribution: env_bool("ENABLE_CHIP_DISTRIBUTION", true),
            realtime_source_priority: {
                let list = env_list("REALTIME_SOURCE_PRIORITY");
                if list.is_empty() {
                    vec!["tencent".into(), "sina".into(), "eastmoney".into()]
                } else {
                    list
                }
            },
            realtime_cache_ttl: env_parse("REALTIME_CACHE_TTL", 600),
            circuit_breaker_cooldown: env_parse("CIRCUIT_BREAKER_COOLDOWN", 300),
            akshare_sleep_min: env_parse("AKSHARE_SLEEP_MIN", 2.0),
            akshare_sleep_max: env_parse("AKSHARE_SLEEP_MAX", 5.0),
            tushare_rate_limit_per_minute: env_parse("TUSHARE_RATE_LIMIT_PER_MINUTE", 80),
            source_priorities,
            http_proxy: env_opt("HTTP_PROXY")
                .or_else(|| env_opt("http_proxy"))
                .or_else(|| env_opt("HTTPS_PROXY")),
            debug: env_bool("DEBUG", false),
        })
    }

    /// Watchlist hot-reload path: re-read STOCK_LIST from the env file
    /// (then process env) so scheduled runs pick up edits without a
    /// restart. Falls back to the startup snapshot when nothing newer is
    /// found. The rest of the snapshot stays frozen.
    pub fn hot_stock_list(&self) -> Vec<String> {
        let path = env::var("ENV_FILE").unwrap_or_else(|_| ".env".to_string());
        let from_file = dotenvy::from_path_iter(&path).ok().and_then(|iter| {
            iter.filter_map(|item| item.ok())
                .find(|(k, _)| k == "STOCK_LIST")
                .map(|(_, v)| v)
        });

        let raw = from_file.or_else(|| env::var("STOCK_LIST").ok()).unwrap_or_default();
        let list: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if list.is_empty() {
            self.stock_list.clone()
        } else {
            list
        }
    }

    /// Non-fatal configuration warnings, logged at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.tushare_token.is_none() {
            warnings.push("TUSHARE_TOKEN not set; falling back to free sources".to_string());
        }
        if self.gemini_api_key.is_none() && self.openai_api_key.is_none() {
            warnings.push(
                "No GEMINI_API_KEY or OPENAI_API_KEY; reports will be template-only".to_string(),
            );
        }
        if self.bocha_api_keys.is_empty()
            && self.tavily_api_keys.is_empty()
            && self.brave_api_keys.is_empty()
            && self.serpapi_keys.is_empty()
        {
            warnings.push("No search API keys; news search disabled".to_string());
        }
        if !self.has_notification_channel() {
            warnings.push("No notification channel configured; reports stay local".to_string());
        }

        warnings
    }

    pub fn has_notification_channel(&self) -> bool {
        self.wechat_webhook_url.is_some()
            || self.feishu_webhook_url.is_some()
            || (self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some())
            || self.discord_webhook_url.is_some()
            || !self.custom_webhook_urls.is_empty()
            || (self.pushover_user_key.is_some() && self.pushover_api_token.is_some())
            || (self.email_sender.is_some() && self.email_password.is_some())
    }

    /// Per-source pacing policies for the shared rate gate.
    pub fn gate_policies(&self) -> HashMap<String, GatePolicy> {
        let mut policies = HashMap::new();
        // EastMoney bans aggressively: full anti-ban jitter.
        policies.insert(
            "eastmoney".to_string(),
            GatePolicy::jittered(self.akshare_sleep_min, self.akshare_sleep_max),
        );
        policies.insert("tencent".to_string(), GatePolicy::jittered(0.3, 0.8));
        policies.insert("sina".to_string(), GatePolicy::jittered(0.3, 0.8));
        policies.insert(
            "tushare".to_string(),
            GatePolicy::per_minute(self.tushare_rate_limit_per_minute),
        );
        policies.insert("baostock".to_string(), GatePolicy::jittered(0.5, 1.0));
        policies.insert("yahoo".to_string(), GatePolicy::jittered(0.5, 1.5));
        policies
    }

    pub fn source_priority(&self, key: &str) -> i32 {
        debug_assert!(SOURCE_KEYS.contains(&key));
        self.source_priorities.get(key).copied().unwrap_or(9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::from_env().expect("defaults should parse");
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.realtime_cache_ttl, 600);
        assert_eq!(config.circuit_breaker_cooldown, 300);
        assert!(!config.stock_list.is_empty());
        assert_eq!(config.realtime_source_priority[0], "tencent");
    }

    #[test]
    fn gate_policies_cover_every_source() {
        let config = Config::from_env().unwrap();
        let policies = config.gate_policies();
        for key in SOURCE_KEYS {
            assert!(policies.contains_key(key), "missing policy for {}", key);
        }
        assert!(policies["tushare"].per_minute.is_some());
    }

    #[test]
    fn priority_defaults_favor_eastmoney() {
        let config = Config::from_env().unwrap();
        assert!(config.source_priority("eastmoney") < config.source_priority("yahoo"));
    }
}
