use std::{env, net::IpAddr, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use escrow_common::{parse_boolean_flag, Amount, DEFAULT_CURRENCY};
use escrow_engine::{escrow_api::ledger_objects::LedgerPolicy, helpers::RetryPolicy};
use log::*;
use provider_tools::ProviderConfig;

const DEFAULT_ESC_HOST: &str = "127.0.0.1";
const DEFAULT_ESC_PORT: u16 = 8370;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/escrow.db";
const DEFAULT_MIN_DEPOSIT: i64 = 500;
const DEFAULT_MIN_WITHDRAW: i64 = 1000;
const DEFAULT_ANNOUNCEMENT_WINDOW_HOURS: i64 = 12;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 25;
pub const DEFAULT_ACTOR_HEADER: &str = "X-Actor-Id";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub ledger_policy: LedgerPolicy,
    /// How long a traveler has to accept or refuse a funded booking before it is declined automatically.
    pub announcement_window: Duration,
    pub sweep_interval: StdDuration,
    pub retry_policy: RetryPolicy,
    /// The header the upstream auth gateway uses to pass on the authenticated user id.
    pub actor_header: String,
    /// If supplied, requests against /internal endpoints are checked against this list of peer addresses.
    pub internal_whitelist: Option<Vec<IpAddr>>,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address.
    pub use_forwarded: bool,
    /// If false, webhook deliveries are accepted without checking their signature. **DANGER**
    pub webhook_signature_checks: bool,
    /// Where notification and conversation events are forwarded to. Events are only logged if this is not set.
    pub notification_url: Option<String>,
    pub provider: ProviderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ESC_HOST.to_string(),
            port: DEFAULT_ESC_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            ledger_policy: LedgerPolicy::default(),
            announcement_window: Duration::hours(DEFAULT_ANNOUNCEMENT_WINDOW_HOURS),
            sweep_interval: StdDuration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retry_policy: RetryPolicy::default(),
            actor_header: DEFAULT_ACTOR_HEADER.to_string(),
            internal_whitelist: None,
            use_x_forwarded_for: false,
            use_forwarded: false,
            webhook_signature_checks: true,
            notification_url: None,
            provider: ProviderConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("ESC_HOST").ok().unwrap_or_else(|| DEFAULT_ESC_HOST.into());
        let port = env_or_default("ESC_PORT", DEFAULT_ESC_PORT);
        let database_url = env::var("ESC_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ ESC_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}");
            DEFAULT_DATABASE_URL.to_string()
        });
        let currency = env::var("ESC_CURRENCY").ok().unwrap_or_else(|| DEFAULT_CURRENCY.into()).to_uppercase();
        let ledger_policy = LedgerPolicy {
            currency,
            min_deposit: Amount::from(env_or_default("ESC_MIN_DEPOSIT", DEFAULT_MIN_DEPOSIT)),
            min_withdraw: Amount::from(env_or_default("ESC_MIN_WITHDRAW", DEFAULT_MIN_WITHDRAW)),
        };
        let announcement_window =
            Duration::hours(env_or_default("ESC_ANNOUNCEMENT_WINDOW_HOURS", DEFAULT_ANNOUNCEMENT_WINDOW_HOURS));
        let sweep_interval =
            StdDuration::from_secs(env_or_default("ESC_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS));
        let retry_policy = RetryPolicy::new(
            env_or_default("ESC_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
            StdDuration::from_millis(env_or_default("ESC_RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)),
        );
        let actor_header = env::var("ESC_ACTOR_HEADER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ACTOR_HEADER.into());
        let internal_whitelist = env::var("ESC_INTERNAL_IP_WHITELIST").ok().and_then(|s| parse_whitelist(&s));
        match &internal_whitelist {
            Some(whitelist) if whitelist.is_empty() => {
                warn!(
                    "🚨️ The internal IP whitelist was configured, but is empty. The server will run, but won't \
                     authorise any requests on /internal."
                );
            },
            None => {
                info!("🪛️ No internal IP whitelist is set. /internal is only protected by the network.");
            },
            Some(v) => {
                let addrs = v.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("🪛️ Internal IP whitelist: {addrs}");
            },
        }
        let use_x_forwarded_for = parse_boolean_flag(env::var("ESC_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("ESC_USE_FORWARDED").ok(), false);
        let webhook_signature_checks = parse_boolean_flag(env::var("ESC_WEBHOOK_SIGNATURE_CHECKS").ok(), true);
        if !webhook_signature_checks {
            warn!("🚨️🚨️🚨️ Webhook signature checks are DISABLED. Anyone can post payment events. 🚨️🚨️🚨️");
        }
        let notification_url = env::var("ESC_NOTIFICATION_URL").ok().filter(|s| !s.trim().is_empty());
        let provider = ProviderConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            ledger_policy,
            announcement_window,
            sweep_interval,
            retry_policy,
            actor_header,
            internal_whitelist,
            use_x_forwarded_for,
            use_forwarded,
            webhook_signature_checks,
            notification_url,
            provider,
        }
    }
}

fn env_or_default<T: FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T
where T::Err: std::fmt::Display {
    match env::var(name) {
        Ok(s) => parse_or_default(name, &s, default),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

fn parse_or_default<T: FromStr + std::fmt::Display + Copy>(name: &str, value: &str, default: T) -> T
where T::Err: std::fmt::Display {
    value.trim().parse::<T>().unwrap_or_else(|e| {
        error!("🪛️ {value} is not a valid value for {name}. {e} Using the default, {default}, instead.");
        default
    })
}

/// Parses a comma-separated list of IP addresses. "none", "false" and "0" disable the whitelist entirely.
pub fn parse_whitelist(s: &str) -> Option<Vec<IpAddr>> {
    if ["none", "false", "0"].contains(&s.trim().to_lowercase().as_str()) {
        info!(
            "🪛️ The internal IP whitelist is disabled. If this is not what you want, set ESC_INTERNAL_IP_WHITELIST to \
             a comma-separated list of IP addresses to enable it."
        );
        return None;
    }
    let ip_addrs = s
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            s.parse()
                .map_err(|e| {
                    warn!("🪛️ Ignoring invalid IP address ({s}) in ESC_INTERNAL_IP_WHITELIST: {e}");
                })
                .ok()
        })
        .collect::<Vec<IpAddr>>();
    Some(ip_addrs)
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// The subset of the configuration that request handlers need. Contains no secrets.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub actor_header: String,
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            actor_header: config.actor_header.clone(),
            use_x_forwarded_for: config.use_x_forwarded_for,
            use_forwarded: config.use_forwarded,
        }
    }
}
