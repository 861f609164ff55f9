// =============================================================================
// OKX REST API Client — public market data endpoints
// =============================================================================
//
// Only public v5 endpoints are used; no request signing is required. Every
// response arrives wrapped in `{ "code": "0", "msg": "", "data": [...] }`
// and numeric fields are JSON strings.
//
// Each call carries an 8-second deadline. One attempt per call — the next
// scheduled tick is the retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::source::{MarketQuote, MarketSource};

/// Per-call deadline for all outbound requests.
const REQUEST_TIMEOUT_SECS: u64 = 8;

/// OKX public REST client.
#[derive(Debug, Clone)]
pub struct OkxClient {
    base_url: String,
    client: reqwest::Client,
}

impl OkxClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new() -> Self {
        Self::with_base_url("https://www.okx.com")
    }

    /// Point the client at a different host (test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client for OkxClient");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Raw endpoint calls
    // -------------------------------------------------------------------------

    /// GET an OKX v5 endpoint and unwrap the `data` array.
    async fn get_data(&self, path_and_query: &str) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path_and_query} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {path_and_query}"))?;

        if !status.is_success() {
            anyhow::bail!("OKX GET {} returned {}: {}", path_and_query, status, body);
        }

        let code = body["code"].as_str().unwrap_or("");
        if code != "0" {
            anyhow::bail!(
                "OKX GET {} returned error code {}: {}",
                path_and_query,
                code,
                body["msg"].as_str().unwrap_or("")
            );
        }

        Ok(body["data"].as_array().cloned().unwrap_or_default())
    }

    /// GET /api/v5/market/ticker — last traded price.
    #[instrument(skip(self), name = "okx::ticker")]
    pub async fn ticker_last(&self, inst_id: &str) -> Result<f64> {
        let data = self
            .get_data(&format!("/api/v5/market/ticker?instId={inst_id}"))
            .await?;
        let entry = data.first().context("ticker response data is empty")?;

        let last = parse_lenient_f64(&entry["last"])
            .with_context(|| format!("ticker for {inst_id} has no parseable last price"))?;

        debug!(inst_id, last, "ticker fetched");
        Ok(last)
    }

    /// GET /api/v5/public/funding-rate — current funding rate.
    ///
    /// Returns `None` (not zero) when the field is absent or unparseable.
    #[instrument(skip(self), name = "okx::funding_rate")]
    pub async fn funding_rate(&self, inst_id: &str) -> Result<Option<f64>> {
        let data = self
            .get_data(&format!("/api/v5/public/funding-rate?instId={inst_id}"))
            .await?;

        let rate = data
            .first()
            .and_then(|entry| parse_lenient_f64(&entry["fundingRate"]).ok());

        debug!(inst_id, ?rate, "funding rate fetched");
        Ok(rate)
    }

    /// GET /api/v5/public/open-interest — open interest in contracts.
    ///
    /// Returns `None` (not zero) when the field is absent or unparseable.
    #[instrument(skip(self), name = "okx::open_interest")]
    pub async fn open_interest(&self, inst_id: &str) -> Result<Option<f64>> {
        let data = self
            .get_data(&format!(
                "/api/v5/public/open-interest?instType=SWAP&instId={inst_id}"
            ))
            .await?;

        let oi = data
            .first()
            .and_then(|entry| parse_lenient_f64(&entry["oi"]).ok());

        debug!(inst_id, ?oi, "open interest fetched");
        Ok(oi)
    }
}

impl Default for OkxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketSource for OkxClient {
    async fn quote(&self, inst_id: &str) -> Result<MarketQuote> {
        // Price is mandatory; funding and OI degrade to absent on failure so
        // that a flaky auxiliary endpoint cannot sink the whole snapshot.
        let price = self.ticker_last(inst_id).await?;

        let funding_rate = match self.funding_rate(inst_id).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(inst_id, error = %e, "funding rate fetch failed — storing absent");
                None
            }
        };

        let open_interest_contracts = match self.open_interest(inst_id).await {
            Ok(oi) => oi,
            Err(e) => {
                warn!(inst_id, error = %e, "open interest fetch failed — storing absent");
                None
            }
        };

        Ok(MarketQuote {
            ts: chrono::Utc::now().timestamp_millis(),
            price,
            funding_rate,
            open_interest_contracts,
        })
    }

    async fn swap_instruments(&self) -> Result<Vec<String>> {
        let data = self
            .get_data("/api/v5/public/instruments?instType=SWAP")
            .await?;

        let ids: Vec<String> = data
            .iter()
            .filter_map(|entry| entry["instId"].as_str().map(str::to_string))
            .collect();

        debug!(count = ids.len(), "SWAP instrument listing fetched");
        Ok(ids)
    }
}

// -------------------------------------------------------------------------
// Internal helpers
// -------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into `f64`.
/// OKX sends numerics as strings; an empty string is treated as absent.
fn parse_lenient_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        if s.is_empty() {
            anyhow::bail!("empty numeric string");
        }
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

// =============================================================================
// Tests
// =============================================================================
