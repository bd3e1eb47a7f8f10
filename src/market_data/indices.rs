/// NIFTY 50 and SENSEX headline values from the Yahoo chart API
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;
use crate::market_data::nse::USER_AGENT;
use crate::market_data::MarketIndexSource;
use crate::types::{IndexSummary, MarketIndices};

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Sparkline length after down-sampling
const CHART_POINTS: usize = 50;

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize, Default)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Keep every n-th valid close so the sparkline stays around `CHART_POINTS` long
pub fn downsample(closes: &[Option<f64>]) -> Vec<f64> {
    let valid: Vec<f64> = closes.iter().flatten().copied().collect();
    if valid.is_empty() {
        return Vec::new();
    }
    let step = (valid.len() / CHART_POINTS).max(1);
    valid.iter().step_by(step).map(|c| round2(*c)).collect()
}

fn summarize(name: &str, body: ChartEnvelope) -> Option<IndexSummary> {
    let result = body.chart.result?.into_iter().next()?;
    let price = result.meta.regular_market_price.unwrap_or(0.0);
    let prev_close = result
        .meta
        .previous_close
        .or(result.meta.chart_previous_close)
        .unwrap_or(0.0);

    let change = if price != 0.0 && prev_close != 0.0 {
        round2(price - prev_close)
    } else {
        0.0
    };
    let p_change = if prev_close != 0.0 {
        round2(change / prev_close * 100.0)
    } else {
        0.0
    };
    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    Some(IndexSummary {
        name: name.to_string(),
        value: round2(price),
        change,
        p_change,
        chart: downsample(&closes),
    })
}

pub struct YahooIndexClient {
    client: Client,
}

impl YahooIndexClient {
    pub fn new() -> Result<Self> {
        Ok(YahooIndexClient {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()?,
        })
    }

    /// Zeroed summary on any failure
    async fn fetch_index(&self, yahoo_symbol: &str, name: &str) -> IndexSummary {
        let url = format!("{}/{}?interval=5m&range=1d", YAHOO_CHART_URL, yahoo_symbol);
        let response = match self.client.get(&url).header("Accept", "application/json").send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!("Yahoo Finance returned {} for {}", resp.status(), name);
                return IndexSummary::empty(name);
            }
            Err(e) => {
                warn!("Error fetching {}: {}", name, e);
                return IndexSummary::empty(name);
            }
        };

        match response.json::<ChartEnvelope>().await {
            Ok(body) => summarize(name, body).unwrap_or_else(|| IndexSummary::empty(name)),
            Err(e) => {
                warn!("Bad chart payload for {}: {}", name, e);
                IndexSummary::empty(name)
            }
        }
    }
}

#[async_trait]
impl MarketIndexSource for YahooIndexClient {
    async fn fetch_market_indices(&self) -> MarketIndices {
        let (nifty50, sensex) = tokio::join!(
            self.fetch_index("%5ENSEI", "NIFTY 50"),
            self.fetch_index("%5EBSESN", "SENSEX"),
        );
        MarketIndices { nifty50, sensex }
    }
}
