/// Show cached Kite session validity for every configured account
use chrono::Utc;
use portfolio_tracker::broker::SessionStore;
use portfolio_tracker::config::{load_config, DEFAULT_CONFIG_PATH};
use portfolio_tracker::time::format_timestamp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("🔑 Session Status");
    println!("=================\n");

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    let cache_file = config.session_cache_file();

    if !cache_file.exists() {
        println!("❌ No session cache at {}", cache_file.display());
        println!("\n💡 Start the tracker and complete the login flow to create one.");
        return Ok(());
    }

    let store = SessionStore::open(&cache_file);
    let now = Utc::now();
    let mut valid = 0;

    for name in config.account_names() {
        match store.get(&name) {
            Some(record) if !record.is_expired_at(now) => {
                valid += 1;
                let expiry = format_timestamp(Some(record.expiry)).unwrap_or_default();
                let renewable = if record.refresh_token.is_some() { ", renewable" } else { "" };
                println!("   ✅ {}: valid until {}{}", name, expiry, renewable);
            }
            Some(record) => {
                let expiry = format_timestamp(Some(record.expiry)).unwrap_or_default();
                println!("   ⚠️  {}: expired at {}", name, expiry);
            }
            None => println!("   ❌ {}: no cached session", name),
        }
    }

    println!(
        "\n📈 {}/{} account(s) ready",
        valid,
        config.accounts.len()
    );
    Ok(())
}
