// src/bin/test_bigquery.rs
// Quick check that the configured service account can authenticate and query.

use anyhow::Result;
use eventsync::{config, extract};
use google_cloud_bigquery::http::job::query::QueryRequest;

#[tokio::main]
async fn main() -> Result<()> {
    println!("🔍 Testing BigQuery credentials...");

    match std::env::var(config::CONFIG_ENV) {
        Ok(path) => println!("✅ {} set to: {}", config::CONFIG_ENV, path),
        Err(_) => println!(
            "ℹ️  {} not set, using {}",
            config::CONFIG_ENV,
            config::DEFAULT_CONFIG_PATH
        ),
    }

    let cfg = config::load()?;
    println!("✅ config loaded");
    println!("   project_id:   {}", cfg.bigquery.project_id);
    println!("   client_email: {}", cfg.bigquery.client_email);
    println!("   token_uri:    {}", cfg.bigquery.token_uri);

    let (client, project_id) = match extract::authenticate(&cfg.bigquery).await {
        Ok(pair) => {
            println!("✅ authenticated; effective project: {}", pair.1);
            pair
        }
        Err(e) => {
            println!("❌ authentication failed: {:?}", e);
            println!("💡 Check the private_key/client_email fields in the config file");
            return Err(e);
        }
    };

    println!("\n🧪 Running `select 1`...");
    let request = QueryRequest {
        query: "select 1".to_string(),
        use_legacy_sql: false,
        ..Default::default()
    };
    match client.job().query(&project_id, &request).await {
        Ok(_) => println!("🎉 query succeeded; credentials and project access look good"),
        Err(e) => {
            println!("❌ query failed: {:#?}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
