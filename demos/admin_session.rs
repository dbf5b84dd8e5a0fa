//! Admin session example.
//!
//! Logs in, lists the first page of applications, replays any writes left in
//! the offline queue by an earlier run, and logs out again.
//!
//! Run with:
//! ```bash
//! IDGATE_BASE_URL=http://localhost:8000/api/v1 \
//! IDGATE_USERNAME=admin IDGATE_PASSWORD=secret \
//!     cargo run --example admin_session
//! ```

use idgate::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    idgate::init_tracing();

    println!("🔐 Admin Session Example\n");

    let config = ClientConfig::from_env()?.proactive_refresh(Duration::from_secs(60));
    let session = idgate::open_session(config).await?;

    // Print auth events as they happen
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AuthEvent::ReauthenticationRequired { reason } => {
                    println!("⚠️  Please log in again: {reason}");
                }
                other => println!("📣 {other:?}"),
            }
        }
    });

    if session.is_authenticated() {
        println!("Resuming stored session");
    } else {
        let username = std::env::var("IDGATE_USERNAME")?;
        let password = std::env::var("IDGATE_PASSWORD")?;
        match session.login(&Credentials::new(username, password)).await {
            Ok(user) => println!("Logged in as {} ({:?})", user.username, user.role),
            Err(ApiError::InvalidCredentials) => {
                println!("❌ Wrong username or password");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let page: Page<serde_json::Value> = session
        .client()
        .get_page("/applications", &PageQuery::new().page_size(10))
        .await?;
    println!(
        "\nApplications: {} total, page {}/{}",
        page.total, page.page, page.total_pages
    );
    for application in &page.items {
        println!("  - {application}");
    }

    if let Some(report) = session.client().replay_offline_queue().await {
        println!(
            "\nOffline queue: {} replayed, {} still pending",
            report.replayed.len(),
            report.failed.len()
        );
    }

    session.logout().await;
    println!("\n✅ Logged out");
    Ok(())
}
