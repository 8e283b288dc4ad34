use crate::error::CdnError;
use crate::services::edge_directory::EdgeIndexKind;
use distribution_events::EventPublisher;
use dotenvy::dotenv;
use resilience::{presets, RetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Stamped into every event as its source
    pub service_name: String,
    /// Push retry budget
    pub retry: RetryPolicy,
    /// Optional bound on a whole publish call
    pub publish_deadline: Option<Duration>,
    pub edge_index: EdgeIndexKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "cdn-service".to_string(),
            retry: presets::edge_push_policy(),
            publish_deadline: None,
            edge_index: EdgeIndexKind::Region,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, CdnError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CdnError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let service_name = get("CDN_SERVICE_NAME").unwrap_or(defaults.service_name);

        let max_attempts: u32 = parse(&get, "CDN_RETRY_MAX_ATTEMPTS")?
            .unwrap_or(defaults.retry.max_attempts);
        if max_attempts == 0 {
            return Err(CdnError::Config(
                "CDN_RETRY_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        let base_delay = parse::<u64, _>(&get, "CDN_RETRY_BASE_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.base_delay);

        let backoff_multiplier: f64 = parse(&get, "CDN_RETRY_BACKOFF_MULTIPLIER")?
            .unwrap_or(defaults.retry.backoff_multiplier);
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(CdnError::Config(
                "CDN_RETRY_BACKOFF_MULTIPLIER must be a finite number >= 1.0".into(),
            ));
        }

        let max_delay = parse::<u64, _>(&get, "CDN_RETRY_MAX_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.max_delay);
        if max_delay < base_delay {
            return Err(CdnError::Config(
                "CDN_RETRY_MAX_DELAY_MS must not be below CDN_RETRY_BASE_DELAY_MS".into(),
            ));
        }

        let publish_deadline =
            parse::<u64, _>(&get, "CDN_PUBLISH_DEADLINE_MS")?.map(Duration::from_millis);

        let edge_index = match get("CDN_EDGE_INDEX") {
            Some(value) => value.parse()?,
            None => defaults.edge_index,
        };

        Ok(Self {
            service_name,
            retry: RetryPolicy::new(max_attempts, base_delay, backoff_multiplier, max_delay),
            publish_deadline,
            edge_index,
        })
    }

    pub fn build_publisher(&self) -> EventPublisher {
        let publisher = EventPublisher::new(self.retry.clone());
        match self.publish_deadline {
            Some(deadline) => publisher.with_deadline(deadline),
            None => publisher,
        }
    }
}

fn parse<T, G>(get: &G, key: &str) -> Result<Option<T>, CdnError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| CdnError::Config(format!("{} has invalid value '{}'", key, raw)))
        })
        .transpose()
}
