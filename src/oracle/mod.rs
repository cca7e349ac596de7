//! Price Oracle Cache
//!
//! TTL cache in front of the external market-data API.
//!
//! Key features:
//! - 30 minute TTL per key, refresh on miss
//! - Bounded upstream timeout (5 s); the scheduler never stalls on the API
//! - Stale fallback: on upstream failure the last stored payload is
//!   returned and marked degraded
//! - Deterministic fallback sample when nothing was ever cached, so the
//!   scheduler can still make progress
//! - Single-flight guard per key to avoid a refresh stampede
//!
//! A slightly stale price is acceptable here: trigger semantics are bounded
//! by slippage at execution time.
//!
//! Author: AI-Generated
//! Created: 2026-02-04

use crate::errors::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Spot price returned when the upstream has never answered. Documented
/// constant so degraded-mode behavior is reproducible.
pub const FALLBACK_SPOT_PRICE: &str = "0.05";

/// Payload shape mirrored from the markets endpoint, used for the
/// never-cached fallback sample.
static FALLBACK_SPOT_PAYLOAD: Lazy<Value> =
    Lazy::new(|| json!([{ "current_price": 0.05, "degraded_fallback": true }]));

static FALLBACK_CHART_PAYLOAD: Lazy<Value> = Lazy::new(|| json!({ "prices": [] }));

/// A spot price answer. `degraded` marks stale-fallback and constant-fallback
/// responses; fresh answers have `age < TTL`.
#[derive(Debug, Clone)]
pub struct SpotPrice {
    pub price: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub degraded: bool,
}

struct CacheEntry {
    payload: Value,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// TTL cache over the market-data HTTP API.
pub struct PriceOracle {
    http: reqwest::Client,
    base_url: String,
    ttl: Duration,
    cache: DashMap<String, CacheEntry>,
    /// Per-key refresh locks (single flight).
    inflight: DashMap<String, Arc<Mutex<()>>>,
    /// Last successful upstream fetch, for health monitoring.
    last_fresh_at: RwLock<Option<Instant>>,
}

impl PriceOracle {
    pub fn new(base_url: String, ttl: Duration, upstream_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
            cache: DashMap::new(),
            inflight: DashMap::new(),
            last_fresh_at: RwLock::new(None),
        }
    }

    /// Spot price of `coin_id` in the quote currency.
    pub async fn get_spot(&self, coin_id: &str) -> EngineResult<SpotPrice> {
        let key = coin_id.to_string();
        let url = format!(
            "{}/coins/markets?vs_currency=usd&ids={}",
            self.base_url, coin_id
        );
        let payload = self.get_cached_or_fetch(&key, &url).await;

        match payload {
            Fetched::Fresh { payload, fetched_at } => {
                let price = extract_current_price(&payload).ok_or_else(|| {
                    EngineError::Upstream("spot payload missing current_price".into())
                })?;
                Ok(SpotPrice { price, fetched_at, degraded: false })
            }
            Fetched::Stale { payload, fetched_at } => {
                let price = extract_current_price(&payload).ok_or_else(|| {
                    EngineError::Upstream("stale spot payload missing current_price".into())
                })?;
                warn!("price oracle degraded: serving stale spot for {coin_id}");
                Ok(SpotPrice { price, fetched_at, degraded: true })
            }
            Fetched::Fallback => {
                warn!("price oracle degraded: no sample ever cached for {coin_id}, using fallback constant");
                Ok(SpotPrice {
                    price: FALLBACK_SPOT_PRICE.parse().unwrap_or(Decimal::ZERO),
                    fetched_at: Utc::now(),
                    degraded: true,
                })
            }
        }
    }

    /// Market chart for `coin_id` over the given horizon. The payload is
    /// opaque to the engine; only (timestamp, price) pairs are extracted.
    pub async fn get_chart(&self, coin_id: &str, horizon_days: u32) -> EngineResult<Value> {
        let key = format!("{coin_id}:chart:{horizon_days}");
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}",
            self.base_url, coin_id, horizon_days
        );
        match self.get_cached_or_fetch(&key, &url).await {
            Fetched::Fresh { payload, .. } => Ok(payload),
            Fetched::Stale { payload, .. } => {
                warn!("price oracle degraded: serving stale chart for {coin_id}");
                Ok(payload)
            }
            Fetched::Fallback => Ok(FALLBACK_CHART_PAYLOAD.clone()),
        }
    }

    /// Age of the last successful upstream fetch. None = never succeeded.
    pub fn last_fresh_age(&self) -> Option<Duration> {
        self.last_fresh_at
            .read()
            .ok()
            .and_then(|g| g.map(|t| t.elapsed()))
    }

    async fn get_cached_or_fetch(&self, key: &str, url: &str) -> Fetched {
        if let Some(entry) = self.cache.get(key) {
            if entry.is_fresh(self.ttl) {
                return Fetched::Fresh {
                    payload: entry.payload.clone(),
                    fetched_at: entry.fetched_at,
                };
            }
        }

        // Single flight: one refresher per key, everyone else waits and
        // re-reads whatever it stored.
        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.cache.get(key) {
            if entry.is_fresh(self.ttl) {
                return Fetched::Fresh {
                    payload: entry.payload.clone(),
                    fetched_at: entry.fetched_at,
                };
            }
        }

        match self.fetch(url).await {
            Ok(payload) => {
                let fetched_at = Utc::now();
                self.cache.insert(
                    key.to_string(),
                    CacheEntry { payload: payload.clone(), fetched_at, stored_at: Instant::now() },
                );
                if let Ok(mut g) = self.last_fresh_at.write() {
                    *g = Some(Instant::now());
                }
                debug!("price oracle refreshed {key}");
                Fetched::Fresh { payload, fetched_at }
            }
            Err(e) => {
                warn!("price upstream failed for {key}: {e}");
                match self.cache.get(key) {
                    Some(entry) => Fetched::Stale {
                        payload: entry.payload.clone(),
                        fetched_at: entry.fetched_at,
                    },
                    None => Fetched::Fallback,
                }
            }
        }
    }

    async fn fetch(&self, url: &str) -> EngineResult<Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("price upstream: {e}")))?;
        if !resp.status().is_success() {
            return Err(EngineError::Upstream(format!(
                "price upstream returned {}",
                resp.status()
            )));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| EngineError::Upstream(format!("price upstream body: {e}")))
    }
}

enum Fetched {
    Fresh { payload: Value, fetched_at: DateTime<Utc> },
    Stale { payload: Value, fetched_at: DateTime<Utc> },
    Fallback,
}

/// Pull `current_price` out of the markets payload. The rest of the blob is
/// opaque. A missing or non-positive value counts as upstream failure.
pub fn extract_current_price(payload: &Value) -> Option<Decimal> {
    let raw = match payload {
        Value::Array(items) => items.first()?.get("current_price")?,
        other => other.get("current_price")?,
    };
    let price = match raw {
        Value::Number(n) => Decimal::from_f64_retain(n.as_f64()?)?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    if price > Decimal::ZERO {
        Some(price)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_extract_current_price_from_markets_array() {
        let payload = json!([{ "id": "crossfi-2", "current_price": 0.07, "market_cap": 1 }]);
        assert_eq!(extract_current_price(&payload), Some(dec!(0.07)));
    }

    #[test]
    fn test_extract_current_price_from_object() {
        let payload = json!({ "current_price": "0.045" });
        assert_eq!(extract_current_price(&payload), Some(dec!(0.045)));
    }

    #[test]
    fn test_extract_rejects_missing_or_nonpositive() {
        assert_eq!(extract_current_price(&json!([{ "price": 1.0 }])), None);
        assert_eq!(extract_current_price(&json!([])), None);
        assert_eq!(extract_current_price(&json!([{ "current_price": 0.0 }])), None);
        assert_eq!(extract_current_price(&json!([{ "current_price": -1.0 }])), None);
        assert_eq!(extract_current_price(&json!([{ "current_price": null }])), None);
    }

    #[tokio::test]
    async fn test_fallback_when_upstream_unreachable_and_nothing_cached() {
        // Unroutable upstream and an aggressive timeout.
        let oracle = PriceOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1800),
            Duration::from_millis(50),
        );
        let spot = oracle.get_spot("crossfi-2").await.unwrap();
        assert!(spot.degraded);
        assert_eq!(spot.price, dec!(0.05));
        assert!(oracle.last_fresh_age().is_none());
    }

    #[tokio::test]
    async fn test_stale_entry_served_degraded_on_upstream_failure() {
        let oracle = PriceOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(0), // everything is immediately stale
            Duration::from_millis(50),
        );
        oracle.cache.insert(
            "crossfi-2".to_string(),
            CacheEntry {
                payload: json!([{ "current_price": 0.042 }]),
                fetched_at: Utc::now(),
                stored_at: Instant::now(),
            },
        );

        let spot = oracle.get_spot("crossfi-2").await.unwrap();
        assert!(spot.degraded);
        assert_eq!(spot.price, dec!(0.042));
    }

    #[tokio::test]
    async fn test_fresh_entry_served_from_cache() {
        let oracle = PriceOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1800),
            Duration::from_millis(50),
        );
        oracle.cache.insert(
            "crossfi-2".to_string(),
            CacheEntry {
                payload: json!([{ "current_price": 0.061 }]),
                fetched_at: Utc::now(),
                stored_at: Instant::now(),
            },
        );

        let spot = oracle.get_spot("crossfi-2").await.unwrap();
        assert!(!spot.degraded);
        assert_eq!(spot.price, dec!(0.061));
    }

    #[tokio::test]
    async fn test_chart_fallback_is_empty_series() {
        let oracle = PriceOracle::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1800),
            Duration::from_millis(50),
        );
        let chart = oracle.get_chart("crossfi-2", 7).await.unwrap();
        assert_eq!(chart, json!({ "prices": [] }));
    }
}
