//! Dashboard feed example - wiring the event bus and the fetch client together
//!
//! Run against any API that serves `GET <base>/v1/inventory`:
//! `DASHBOARD_API=http://localhost:3000/api cargo run -p fetch --example dashboard_feed`

use bus::events::names;
use bus::{DashboardEvent, EventBus};
use fetch::{CachedFetchClient, ClientConfig, CurrentUser, SessionStore};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct StockLevel {
    item: String,
    qty: u32,
    #[serde(default = "default_threshold")]
    threshold: u32,
}

fn default_threshold() -> u32 {
    20
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let base_url =
        std::env::var("DASHBOARD_API").unwrap_or_else(|_| "http://localhost:3000/api".to_string());
    println!("Using API at: {}", base_url);

    // One bus, one client, built here and passed around
    let bus = EventBus::<DashboardEvent>::new();
    let session = Arc::new(SessionStore::new());
    session.login(CurrentUser {
        id: "demo".to_string(),
        name: "Demo User".to_string(),
        role: "admin".to_string(),
        token: std::env::var("DASHBOARD_TOKEN").ok(),
    });

    let client = CachedFetchClient::builder(ClientConfig::new(base_url))
        .token_provider(session.clone())
        .failure_sink(Arc::new(bus.clone()))
        .build();

    // Toasts
    bus.subscribe(names::API_ERROR, |event: &DashboardEvent| {
        if let DashboardEvent::ApiError { method, endpoint, message, .. } = event {
            println!("[toast] {} {} failed: {}", method, endpoint, message);
        }
    })?;
    bus.subscribe(names::AUTH_UNAUTHORIZED, |_: &DashboardEvent| {
        println!("[auth] session expired, redirecting to login");
    })?;

    // Low-stock banner
    bus.subscribe(names::INVENTORY_LOW_STOCK, |event: &DashboardEvent| {
        if let DashboardEvent::LowStock { item, qty } = event {
            println!("[inventory] {} is low: {} left", item, qty);
        }
    })?;

    match client.get_json::<Vec<StockLevel>>("inventory").await {
        Ok(levels) => {
            for level in levels.into_iter().filter(|l| l.qty < l.threshold) {
                bus.publish(DashboardEvent::LowStock {
                    item: level.item,
                    qty: level.qty,
                });
            }
        }
        Err(e) => println!("Inventory unavailable: {}", e),
    }

    // Second read is served from cache
    let _ = client.get("inventory").await;
    println!("Cached responses: {}", client.cached_entries());

    Ok(())
}
