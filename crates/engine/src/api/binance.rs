//! Binance public API client for historical klines (no authentication required)

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::types::Kline;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_SECS: f64 = 1.5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    backoff_secs: f64,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl RawKline {
    fn into_kline(self) -> Result<Kline> {
        let parse = |field: &str, value: &str| {
            Decimal::from_str(value)
                .with_context(|| format!("invalid {} '{}' in kline {}", field, value, self.0))
        };
        Ok(Kline {
            open_time: self.0,
            open: parse("open", &self.1)?,
            high: parse("high", &self.2)?,
            low: parse("low", &self.3)?,
            close: parse("close", &self.4)?,
            volume: parse("volume", &self.5)?,
            close_time: self.6,
        })
    }
}

/// Decode a klines response body
fn parse_klines(body: &str) -> Result<Vec<Kline>> {
    let raw: Vec<RawKline> = serde_json::from_str(body).context("malformed klines response")?;
    raw.into_iter().map(RawKline::into_kline).collect()
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

impl BinanceClient {
    /// Create a new Binance client with default base URL
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against another host (testnet, mirror, local stub)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_secs: DEFAULT_BACKOFF_SECS,
        })
    }

    /// Override the retry policy. `max_retries` is clamped to at least one attempt.
    pub fn with_retry(mut self, max_retries: u32, backoff_secs: f64) -> Self {
        self.max_retries = max_retries.max(1);
        self.backoff_secs = backoff_secs.max(0.0);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_secs * attempt as f64)
    }

    /// Fetch one page of klines for a symbol, retrying on rate limits and errors
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Kline>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, symbol, interval
        );

        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }

        let limit = limit.unwrap_or(500).min(MAX_KLINES_PER_REQUEST);
        url.push_str(&format!("&limit={}", limit));

        for attempt in 1..=self.max_retries {
            debug!(symbol, interval, attempt, "Fetching klines from Binance");

            match self.fetch_once(&url).await {
                Ok(FetchOutcome::Klines(klines)) => {
                    debug!(count = klines.len(), "Fetched klines");
                    return Ok(klines);
                }
                Ok(FetchOutcome::RateLimited) => {
                    if attempt == self.max_retries {
                        warn!(attempt, "Rate limited by Binance on final attempt");
                        break;
                    }
                    let wait = self.backoff(attempt);
                    warn!(attempt, wait_secs = wait.as_secs_f64(), "Rate limited by Binance");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    error!(attempt, max = self.max_retries, error = %e, "Kline request failed");
                    if attempt == self.max_retries {
                        return Err(e);
                    }
                    let wait = self.backoff(attempt);
                    info!(wait_secs = wait.as_secs_f64(), "Retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        bail!(
            "Binance rate limit persisted after {} attempts for {} {}",
            self.max_retries,
            symbol,
            interval
        )
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchOutcome> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(FetchOutcome::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Binance API error {}: {}", status, body);
        }

        let body = response.text().await?;
        Ok(FetchOutcome::Klines(parse_klines(&body)?))
    }

    /// Fetch klines with automatic pagination for ranges > 1000 bars
    pub async fn get_klines_paginated(
        &self,
        symbol: &str,
        interval: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Kline>> {
        let mut all_klines: Vec<Kline> = Vec::new();
        let mut current_start = start_time;

        info!(
            symbol,
            interval,
            start = %format_ms(start_time),
            end = %format_ms(end_time),
            "Fetching paginated klines from Binance"
        );

        while current_start < end_time {
            let klines = self
                .get_klines(
                    symbol,
                    interval,
                    Some(current_start),
                    Some(end_time),
                    Some(MAX_KLINES_PER_REQUEST),
                )
                .await?;

            let Some(last_open) = klines.last().map(|k| k.open_time) else {
                break;
            };
            // Endpoint is inclusive; skip anything already collected
            let newest = all_klines.last().map(|k| k.open_time);
            all_klines.extend(
                klines
                    .into_iter()
                    .filter(|k| newest.map_or(true, |n| k.open_time > n)),
            );

            current_start = last_open + 1;

            // Small delay to respect rate limits
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if all_klines.is_empty() {
            warn!(symbol, interval, "No klines returned for the requested range");
        }
        info!(total = all_klines.len(), "Paginated kline fetch complete");
        Ok(all_klines)
    }
}

enum FetchOutcome {
    Klines(Vec<Kline>),
    RateLimited,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_klines_normalizes_rows() {
        let body = r#"[
            [1704067200000, "100", "105", "95", "102", "123.45", 1704070799999, "0", 10, "0", "0", "0"],
            [1704070800000, "102", "108", "98", "105", "234.56", 1704074399999, "0", 12, "0", "0", "0"]
        ]"#;

        let klines = parse_klines(body).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1_704_067_200_000);
        assert_eq!(klines[0].close, dec!(102));
        assert_eq!(klines[1].high, dec!(108));
        assert_eq!(klines[1].volume, dec!(234.56));
        assert_eq!(klines[1].close_time, 1_704_074_399_999);
    }

    #[test]
    fn test_parse_empty_response() {
        assert!(parse_klines("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_numbers() {
        let body = r#"[[1, "abc", "1", "1", "1", "1", 2, "0", 0, "0", "0", "0"]]"#;
        assert!(parse_klines(body).is_err());
        assert!(parse_klines(r#"{"code":-1121,"msg":"Invalid symbol."}"#).is_err());
    }

    #[test]
    fn test_client_configuration() {
        let client = BinanceClient::with_base_url("http://localhost:9/")
            .unwrap()
            .with_retry(0, 0.5);
        assert_eq!(client.base_url(), "http://localhost:9");
        assert_eq!(client.max_retries, 1);
        assert_eq!(client.backoff(2), Duration::from_secs(1));
    }

    /// Answer every connection with HTTP 429, counting requests
    async fn spawn_rate_limited_server() -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 429 Too Many Requests\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_rate_limit_on_last_attempt_fails_without_waiting() {
        let (url, hits) = spawn_rate_limited_server().await;
        let client = BinanceClient::with_base_url(url).unwrap().with_retry(2, 0.5);

        let started = Instant::now();
        let result = client
            .get_klines("BTCUSDT", "1h", Some(0), Some(1), None)
            .await;

        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        // One backoff between the attempts, none after the last
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(1200), "waited {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_retries() {
        // Nothing listens on the discard port
        let client = BinanceClient::with_base_url("http://127.0.0.1:9")
            .unwrap()
            .with_retry(2, 0.0);
        let result = client
            .get_klines("BTCUSDT", "1h", Some(0), Some(1), None)
            .await;
        assert!(result.is_err());
    }
}
