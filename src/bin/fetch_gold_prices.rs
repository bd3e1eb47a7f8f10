/// One-shot IBJA gold rate fetch
use portfolio_tracker::market_data::{GoldPriceSource, IbjaGoldPriceClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("portfolio_tracker=info")
        .init();

    println!("🪙 IBJA Gold Rates");
    println!("==================\n");

    let client = IbjaGoldPriceClient::new()?;
    let Some(prices) = client.fetch_gold_prices().await else {
        anyhow::bail!("❌ Could not fetch gold prices from IBJA");
    };

    for (purity, rate) in &prices.prices {
        println!("   {}: AM ₹{:.2}/g, PM ₹{:.2}/g", purity, rate.am, rate.pm);
    }
    println!("\n{}", serde_json::to_string_pretty(&prices)?);
    Ok(())
}
