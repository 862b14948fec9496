use portal_link::{ConnectionClient, ConnectionOptions, ConnectionState};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Watch the connection to a running portal server and print every change
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portal_link=info")),
        )
        .init();

    let options = ConnectionOptions::from_env()?;
    println!("📡 Connecting to: {}\n", options.base_url);

    let client = ConnectionClient::new(options)?;
    println!("🆔 Client id: {}", client.client_id());

    let _subscription = client.subscribe(|snapshot| {
        let latency = snapshot
            .health
            .latency_millis()
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let notification = snapshot
            .notification
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_default();

        println!(
            "🔌 {:<13} health={:?} latency={} attempt={} {}",
            snapshot.state, snapshot.health.status, latency, snapshot.retry_attempt, notification
        );
    });

    let mut updates = client.watch();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().state;
            if state == ConnectionState::Error {
                println!("❌ Gave up reconnecting; press Ctrl+C to exit or wait for the manual retry");
            }
        }
    });

    println!("⏳ Monitoring for 2 minutes (Ctrl+C to stop)...\n");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("\n🛑 Interrupted"),
        _ = tokio::time::sleep(Duration::from_secs(120)) => {
            if client.state() == ConnectionState::Error {
                println!("🔁 Manual reconnect...");
                client.reconnect().await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        }
    }

    client.shutdown().await?;
    watcher.abort();
    println!("👋 Shut down cleanly");
    Ok(())
}
