use crate::scraping::browser::Locator;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ---------------------------------------------------------------------------
// Environment keys
// ---------------------------------------------------------------------------

pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_SITE_EMAIL: &str = "SITE_EMAIL";
pub const ENV_SITE_PASSWORD: &str = "SITE_PASSWORD";
pub const ENV_SITE_BASE_URL: &str = "SITE_BASE_URL";
pub const ENV_SEARCH_KEYWORDS: &str = "SEARCH_KEYWORDS";
pub const ENV_SEARCH_LOCATION: &str = "SEARCH_LOCATION";
pub const ENV_EXCLUDE_KEYWORDS: &str = "EXCLUDE_KEYWORDS";
pub const ENV_MAX_APPLICATIONS: &str = "MAX_APPLICATIONS_PER_RUN";
pub const ENV_MAX_CANDIDATES: &str = "MAX_CANDIDATES";
pub const ENV_SCHEDULE_TIMES: &str = "SCHEDULE_TIMES";
pub const ENV_SCHEDULE_UTC_OFFSET: &str = "SCHEDULE_UTC_OFFSET";
pub const ENV_OTP_TIMEOUT_SECS: &str = "OTP_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "AUTOAPPLY_DATA_DIR";
pub const ENV_PROBES: &str = "AUTOAPPLY_PROBES";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_HEADLESS: &str = "HEADLESS";

/// Legacy names still accepted for the site credentials.
const ENV_SITE_EMAIL_ALIAS: &str = "NAUKRI_EMAIL";
const ENV_SITE_PASSWORD_ALIAS: &str = "NAUKRI_PASSWORD";

const DEFAULT_BASE_URL: &str = "https://www.naukri.com";
const COOKIES_FILE: &str = "cookies.json";
const LEDGER_FILE: &str = "applied_log.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// AppConfig: built once at startup, passed explicitly to every component
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    /// Default notification target; `/start` registers one when unset.
    pub telegram_chat_id: Option<i64>,
    pub site: SiteConfig,
    pub search: SearchConfig,
    pub max_applications_per_run: usize,
    pub schedule: ScheduleConfig,
    pub otp_timeout: Duration,
    pub data_dir: PathBuf,
    pub headless: bool,
    pub chrome_executable: Option<String>,
    pub probes: ProbeConfig,
    pub timings: Timings,
}

#[derive(Clone)]
pub struct SiteConfig {
    pub base_url: Url,
    pub email: String,
    pub password: String,
}

impl SiteConfig {
    /// Registrable host used for the on-site check, e.g. `naukri.com`.
    pub fn domain(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        host.strip_prefix("www.").unwrap_or(host).to_ascii_lowercase()
    }

    pub fn has_credentials(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub keywords: String,
    pub location: String,
    /// Lowercased, trimmed, never empty strings.
    pub exclude: Vec<String>,
    pub max_candidates: usize,
}

#[derive(Clone, Debug)]
pub struct ScheduleConfig {
    pub times: Vec<NaiveTime>,
    pub offset: FixedOffset,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("telegram_bot_token", &"<redacted>")
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("site", &self.site.base_url.as_str())
            .field("site_credentials", &self.site.has_credentials())
            .field("search", &self.search)
            .field("max_applications_per_run", &self.max_applications_per_run)
            .field("schedule", &self.schedule)
            .field("otp_timeout", &self.otp_timeout)
            .field("data_dir", &self.data_dir)
            .field("headless", &self.headless)
            .finish()
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_bot_token =
            get(ENV_TELEGRAM_BOT_TOKEN).ok_or(ConfigError::Missing(ENV_TELEGRAM_BOT_TOKEN))?;

        let telegram_chat_id = get(ENV_TELEGRAM_CHAT_ID).and_then(|raw| match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    "config: {}={:?} is not valid ({}); waiting for /start instead",
                    ENV_TELEGRAM_CHAT_ID,
                    raw,
                    e
                );
                None
            }
        });

        let base_url = match get(ENV_SITE_BASE_URL) {
            Some(raw) => Url::parse(&raw).or_else(|e| {
                tracing::warn!(
                    "config: {}={:?} is not valid ({}); using {}",
                    ENV_SITE_BASE_URL,
                    raw,
                    e,
                    DEFAULT_BASE_URL
                );
                default_base_url()
            })?,
            None => default_base_url()?,
        };

        let site = SiteConfig {
            base_url,
            email: get(ENV_SITE_EMAIL)
                .or_else(|| get(ENV_SITE_EMAIL_ALIAS))
                .unwrap_or_default(),
            password: get(ENV_SITE_PASSWORD)
                .or_else(|| get(ENV_SITE_PASSWORD_ALIAS))
                .unwrap_or_default(),
        };
        if !site.has_credentials() {
            tracing::warn!(
                "config: {} / {} not set — interactive login will fail if the cached session is stale",
                ENV_SITE_EMAIL,
                ENV_SITE_PASSWORD
            );
        }

        let search = SearchConfig {
            keywords: get(ENV_SEARCH_KEYWORDS).unwrap_or_else(|| "Software Engineer".to_string()),
            location: get(ENV_SEARCH_LOCATION).unwrap_or_else(|| "Chennai".to_string()),
            exclude: parse_exclusions(get(ENV_EXCLUDE_KEYWORDS).as_deref().unwrap_or("")),
            max_candidates: parse_or_default(ENV_MAX_CANDIDATES, get(ENV_MAX_CANDIDATES), 50),
        };

        let times = match get(ENV_SCHEDULE_TIMES).map(|raw| parse_schedule_times(&raw)) {
            Some(Ok(times)) => times,
            Some(Err(e)) => {
                tracing::warn!("config: {}; using 08:00,20:00", e);
                default_slots()
            }
            None => default_slots(),
        };
        let offset = match get(ENV_SCHEDULE_UTC_OFFSET) {
            Some(raw) => raw.parse::<FixedOffset>().unwrap_or_else(|e| {
                tracing::warn!(
                    "config: {}={:?} is not valid ({}); using +05:30",
                    ENV_SCHEDULE_UTC_OFFSET,
                    raw,
                    e
                );
                default_offset()
            }),
            None => default_offset(),
        };

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".autoapply")))
            .unwrap_or_else(|| PathBuf::from("."));

        let headless = get(ENV_HEADLESS)
            .map(|v| {
                !matches!(
                    v.to_ascii_lowercase().as_str(),
                    "0" | "false" | "no" | "off"
                )
            })
            .unwrap_or(true);

        let chrome_executable = get(ENV_CHROME_EXECUTABLE).filter(|p| Path::new(p).exists());

        Ok(Self {
            telegram_bot_token,
            telegram_chat_id,
            site,
            search,
            max_applications_per_run: parse_or_default(
                ENV_MAX_APPLICATIONS,
                get(ENV_MAX_APPLICATIONS),
                8,
            ),
            schedule: ScheduleConfig { times, offset },
            otp_timeout: Duration::from_secs(parse_or_default(
                ENV_OTP_TIMEOUT_SECS,
                get(ENV_OTP_TIMEOUT_SECS),
                300,
            )),
            data_dir,
            headless,
            chrome_executable,
            probes: ProbeConfig::load(get(ENV_PROBES).as_deref().map(Path::new)),
            timings: Timings::default(),
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    pub fn cookies_path(&self) -> PathBuf {
        self.data_dir.join(COOKIES_FILE)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

fn default_slots() -> Vec<NaiveTime> {
    vec![hm(8, 0), hm(20, 0)]
}

fn default_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or_else(|| Utc.fix())
}

fn default_base_url() -> Result<Url, ConfigError> {
    Url::parse(DEFAULT_BASE_URL).map_err(|e| ConfigError::Invalid {
        key: ENV_SITE_BASE_URL,
        value: DEFAULT_BASE_URL.to_string(),
        reason: e.to_string(),
    })
}

/// Split a comma-separated exclusion list into lowercase tokens.
pub fn parse_exclusions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse `HH:MM[,HH:MM...]` into sorted, deduplicated slot times.
pub fn parse_schedule_times(raw: &str) -> Result<Vec<NaiveTime>, ConfigError> {
    let mut times = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            NaiveTime::parse_from_str(t, "%H:%M").map_err(|e| ConfigError::Invalid {
                key: ENV_SCHEDULE_TIMES,
                value: t.to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    times.sort();
    times.dedup();
    Ok(times)
}

fn parse_or_default<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match raw {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!("config: {}={:?} is not valid — using {}", key, v, default);
            default
        }),
        None => default,
    }
}

// ---------------------------------------------------------------------------
// Timings: every bounded wait in the cycle
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Timings {
    pub navigation: Duration,
    pub logged_in_probe: Duration,
    pub login_trigger: Duration,
    pub field_fill: Duration,
    pub otp_probe: Duration,
    pub post_login_settle: Duration,
    pub results_settle: Duration,
    pub tab_watch: Duration,
    pub tab_load: Duration,
    pub confirmation_probe: Duration,
    pub apply_settle: Duration,
    pub scan_retry_delay: Duration,
    pub scan_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(45),
            logged_in_probe: Duration::from_secs(2),
            login_trigger: Duration::from_secs(5),
            field_fill: Duration::from_secs(10),
            otp_probe: Duration::from_secs(4),
            post_login_settle: Duration::from_secs(3),
            results_settle: Duration::from_secs(3),
            tab_watch: Duration::from_secs(5),
            tab_load: Duration::from_secs(15),
            confirmation_probe: Duration::from_secs(2),
            apply_settle: Duration::from_millis(1500),
            scan_retry_delay: Duration::from_secs(3),
            scan_attempts: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// ProbeConfig: data-driven selector lists (optional JSON override file)
// ---------------------------------------------------------------------------

/// Ordered probe lists, one per UI concern. The first match wins, so new
/// markup variants are handled by adding an entry rather than a code branch.
#[derive(serde::Deserialize, serde::Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub logged_in_markers: Vec<Locator>,
    pub login_triggers: Vec<Locator>,
    pub identity_fields: Vec<Locator>,
    pub secret_fields: Vec<Locator>,
    pub login_submits: Vec<Locator>,
    pub otp_fields: Vec<Locator>,
    pub result_cards: Vec<String>,
    pub card_titles: Vec<String>,
    pub card_links: Vec<String>,
    pub card_apply_buttons: Vec<Locator>,
    pub apply_confirmations: Vec<Locator>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            logged_in_markers: vec![
                Locator::css("a[title*='My Naukri']"),
                Locator::css("a[title*='Profile']"),
                Locator::css("img[alt*=profile]"),
            ],
            login_triggers: vec![
                Locator::css("#login_Layer"),
                Locator::text("a, button", "Login"),
            ],
            identity_fields: vec![
                Locator::css("input[placeholder*='Email']"),
                Locator::css("input[type='text']"),
            ],
            secret_fields: vec![Locator::css("input[type='password']")],
            login_submits: vec![
                Locator::text("button", "login"),
                Locator::text("button", "log in"),
            ],
            otp_fields: vec![
                Locator::css("input[placeholder*='OTP']"),
                Locator::css("input[name*='otp']"),
                Locator::css("input[id*='otp']"),
            ],
            result_cards: vec![
                "article".into(),
                "div.jobTuple".into(),
                "div.srp-jobtuple".into(),
                "div.list".into(),
                "div.row".into(),
            ],
            card_titles: vec![
                "a.title".into(),
                "a[title]".into(),
                "a:has(h2)".into(),
                "h2".into(),
            ],
            card_links: vec!["a[href]".into()],
            card_apply_buttons: vec![
                Locator::text("a", "Apply"),
                Locator::text("button", "Apply"),
            ],
            apply_confirmations: vec![
                Locator::text("button", "Apply"),
                Locator::text("button", "Submit"),
                Locator::text("a", "Apply"),
            ],
        }
    }
}

impl ProbeConfig {
    /// Load the probe override file.
    ///
    /// No path → built-in defaults. Missing file or parse error → log a warning
    /// and use the defaults. Keys absent from the file keep their defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ProbeConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("config: probe overrides loaded from {}", path.display());
                    cfg
                }
                Err(e) => {
                    tracing::warn!(
                        "config: probe file parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "config: probe file {} unreadable: {} — using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}
