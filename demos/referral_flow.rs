//! Referral flow demonstration.
//!
//! This example drives the gatekeeper against the simulated browser:
//! 1. A visitor arrives from the source site and is let in
//! 2. A visitor types the protected URL and is sent to the error page
//! 3. A token-variant visitor carries the relayed token in the fragment
//! 4. The first session runs out and the tab is redirected
//!
//! Run with: `RUST_LOG=info cargo run --example referral_flow`

use referral_gate::sim::SimBrowser;
use referral_gate::{
    AccessConfig, BrowserEvent, Gatekeeper, MemoryStorage, NavigationDetails, ProofMode,
    SecretRelay, SourcePage, SourcePageObserver, TabId,
};

const CONFIG: &str = r#"
source_url = "https://source.example/"
protected_urls = ["https://protected.example"]
access_duration_ms = 120000
"#;

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Referral Flow Example ===\n");

    let config = AccessConfig::from_toml_str(CONFIG)?;
    let browser = SimBrowser::new();
    let mut gatekeeper = Gatekeeper::try_new(
        config.clone(),
        browser.clone(),
        browser.clone(),
        MemoryStorage::new(),
    )?;

    // Scenario 1: arrival from the source site
    println!("--- Scenario 1: Referred Visitor ---");
    let page = "https://protected.example/members";
    browser.open_tab(TabId(1), page, "https://source.example/dashboard");
    let decision = gatekeeper
        .handle(BrowserEvent::NavigationStarted(NavigationDetails::main_frame(
            TabId(1),
            page,
        )))
        .await;
    println!("tab 1: {:?}", decision);

    // Scenario 2: direct navigation
    println!("\n--- Scenario 2: Direct Visitor ---");
    browser.open_tab(TabId(2), page, "");
    let decision = gatekeeper.check_access(TabId(2), page).await;
    println!("tab 2: {:?}, now on {:?}", decision, browser.url_of(TabId(2)));

    // Scenario 3: token variant
    println!("\n--- Scenario 3: Token Relay ---");
    let storage = MemoryStorage::new();
    let token_config = config.with_proof_mode(ProofMode::Token);
    let mut token_gatekeeper =
        Gatekeeper::new(token_config.clone(), browser.clone(), browser.clone(), storage.clone());

    let observer = SourcePageObserver::new(SecretRelay::new(storage, &token_config), &token_config);
    let published = observer
        .observe(&SourcePage {
            visible: true,
            path: "/dashboard".to_string(),
            local_token: Some("k7Qx2".to_string()),
        })
        .await?;
    println!("source page published a token: {}", published);

    let token_page = "https://protected.example/members#k7Qx2|session";
    browser.open_tab(TabId(3), token_page, "");
    let decision = token_gatekeeper.check_access(TabId(3), token_page).await;
    println!("tab 3: {:?}", decision);

    // Scenario 4: expiry
    println!("\n--- Scenario 4: Session Expiry ---");
    let started = tokio::time::Instant::now();
    if let Some(key) = gatekeeper.process_next_expiry().await {
        println!(
            "session {} expired after {:?}, tab now on {:?}",
            key,
            started.elapsed(),
            browser.url_of(key.tab_id)
        );
    }

    println!("\n--- Audit Trail ---");
    for event in gatekeeper.audit_trail().events() {
        println!("{}", event);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
