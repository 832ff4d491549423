use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const MIB: u64 = 1024 * 1024;
pub const MAX_FILE_SIZE: u64 = 500 * MIB;
pub const PREMIUM_THRESHOLD: u64 = 50 * MIB;
pub const UPLOAD_DIR: &str = "./uploads";
pub const HASH_FEED_PATH: &str = "./full.csv";

/// When a scan must be paid for before its report is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPolicy {
    /// Only files above the premium size threshold.
    SizeOnly,
    /// Large files, and also files whose type is high risk.
    SizeOrDangerousType,
}

impl FromStr for PaymentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size" => Ok(PaymentPolicy::SizeOnly),
            "size_or_type" => Ok(PaymentPolicy::SizeOrDangerousType),
            other => Err(format!("unknown payment policy {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
    pub premium_threshold: u64,
    pub payment_policy: PaymentPolicy,
    pub hash_feed_path: PathBuf,
    pub premium_price: u64,
    pub premium_currency: String,
    pub stripe_secret_key: Option<String>,
    pub mock_payment_delay: Duration,
    pub payment_timeout: Duration,
    pub report_ttl: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            upload_dir: PathBuf::from(UPLOAD_DIR),
            max_file_size: MAX_FILE_SIZE,
            premium_threshold: PREMIUM_THRESHOLD,
            payment_policy: PaymentPolicy::SizeOnly,
            hash_feed_path: PathBuf::from(HASH_FEED_PATH),
            premium_price: 100,
            premium_currency: "inr".to_string(),
            stripe_secret_key: None,
            mock_payment_delay: Duration::from_millis(2000),
            payment_timeout: Duration::from_millis(10_000),
            report_ttl: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, falling back to defaults for
    /// missing or unparseable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            port: parse_or(&lookup, "PORT", defaults.port),
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_file_size: parse_or(&lookup, "MAX_FILE_SIZE", defaults.max_file_size),
            premium_threshold: parse_or(&lookup, "PREMIUM_THRESHOLD", defaults.premium_threshold),
            payment_policy: parse_or(&lookup, "PAYMENT_POLICY", defaults.payment_policy),
            hash_feed_path: lookup("HASH_FEED_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.hash_feed_path),
            premium_price: parse_or(&lookup, "PREMIUM_PRICE", defaults.premium_price),
            premium_currency: lookup("PREMIUM_CURRENCY").unwrap_or(defaults.premium_currency),
            stripe_secret_key: lookup("STRIPE_SECRET_KEY").filter(|k| !k.is_empty()),
            mock_payment_delay: Duration::from_millis(parse_or(
                &lookup,
                "MOCK_PAYMENT_DELAY_MS",
                defaults.mock_payment_delay.as_millis() as u64,
            )),
            payment_timeout: Duration::from_millis(parse_or(
                &lookup,
                "PAYMENT_TIMEOUT_MS",
                defaults.payment_timeout.as_millis() as u64,
            )),
            report_ttl: lookup("REPORT_TTL_SECS")
                .and_then(|v| match v.trim().parse::<u64>() {
                    Ok(secs) => Some(Duration::from_secs(secs)),
                    Err(_) => {
                        warn!(value = %v, "Ignoring invalid REPORT_TTL_SECS");
                        None
                    }
                }),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "Invalid config value, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.premium_threshold, 50 * MIB);
        assert_eq!(cfg.payment_policy, PaymentPolicy::SizeOnly);
        assert!(cfg.report_ttl.is_none());
        assert!(cfg.stripe_secret_key.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config_from(&[
            ("PORT", "8080"),
            ("PAYMENT_POLICY", "size_or_type"),
            ("REPORT_TTL_SECS", "60"),
            ("MOCK_PAYMENT_DELAY_MS", "5"),
        ]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.payment_policy, PaymentPolicy::SizeOrDangerousType);
        assert_eq!(cfg.report_ttl, Some(Duration::from_secs(60)));
        assert_eq!(cfg.mock_payment_delay, Duration::from_millis(5));
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config_from(&[("PORT", "not-a-port"), ("PAYMENT_POLICY", "always")]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.payment_policy, PaymentPolicy::SizeOnly);
    }
}
