/// IBJA benchmark gold rates scraped from the public rate page
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TrackerError};
use crate::market_data::nse::USER_AGENT;
use crate::market_data::GoldPriceSource;
use crate::types::{GoldPrices, GoldRate};

const IBJA_URL: &str = "https://ibjarates.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const PURITIES: [&str; 5] = ["999", "995", "916", "750", "585"];

/// Text content of the element carrying `id="{id}"`, with nested tags dropped
fn element_text(html: &str, id: &str) -> Option<String> {
    let marker = format!("id=\"{}\"", id);
    let start = html.find(&marker)?;
    let open_end = start + html[start..].find('>')? + 1;
    let close = open_end + html[open_end..].find("</span>")?;

    let mut text = String::new();
    let mut in_tag = false;
    for c in html[open_end..close].chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    Some(text.trim().to_string())
}

/// Parse the per-gram rate for each known purity; `None` when nothing parses
pub fn parse_gold_prices(html: &str) -> Option<GoldPrices> {
    let mut prices = BTreeMap::new();
    for purity in PURITIES {
        let Some(text) = element_text(html, &format!("GoldRatesCompare{}", purity)) else {
            warn!("Could not find span element for purity {}", purity);
            continue;
        };
        match text.replace(',', "").parse::<f64>() {
            Ok(rate) => {
                debug!("Gold {}: {}/gram", purity, rate);
                prices.insert(purity.to_string(), GoldRate { am: rate, pm: rate });
            }
            Err(e) => warn!("Failed to parse price for {}: {}", purity, e),
        }
    }

    if prices.is_empty() {
        error!("No valid gold prices found");
        return None;
    }
    Some(GoldPrices { prices })
}

pub struct IbjaGoldPriceClient {
    client: Client,
}

impl IbjaGoldPriceClient {
    pub fn new() -> Result<Self> {
        Ok(IbjaGoldPriceClient {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()?,
        })
    }

    async fn fetch_page(&self) -> Result<String> {
        let resp = self
            .client
            .get(IBJA_URL)
            .send()
            .await
            .map_err(|e| TrackerError::from_transport("IBJA", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TrackerError::UpstreamApi {
                service: "IBJA".to_string(),
                status: status.as_u16(),
                message: "rate page unavailable".to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl GoldPriceSource for IbjaGoldPriceClient {
    async fn fetch_gold_prices(&self) -> Option<GoldPrices> {
        match self.fetch_page().await {
            Ok(html) => {
                let prices = parse_gold_prices(&html)?;
                info!("Fetched prices for {} gold purities", prices.prices.len());
                Some(prices)
            }
            Err(e) => {
                error!("Error fetching IBJA gold prices: {}", e);
                None
            }
        }
    }
}
