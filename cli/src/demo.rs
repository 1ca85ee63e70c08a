//! In-memory walkthrough of one order's life.
//!
//!   1. Checkout, terms acceptance and payment capture
//!   2. A ranged request that does not consume, then the full download
//!   3. Provider notification delivered twice
//!   4. Dispute freeze blocks the link; unfreeze restores it
//!   5. Chain verification and the evidence report

use std::sync::Arc;

use chrono::Utc;

use evidentia_contracts::{
    order::{FileRef, Money, ProductSnapshot},
    EventContext, EvidentiaResult,
};
use evidentia_core::{
    machine::NewOrder,
    traits::{Clock, FileStore, StoreIdentity},
    DeliverySettings, DeliveryStateMachine, DownloadGateway, EvidenceCompiler, Fulfillment,
    InMemoryBackend, KeyMaterial, SystemClock,
};
use evidentia_crypto::{random::random_array, random_token, sha256_hex};
use evidentia_webhook::{HmacProviderVerifier, NotificationIngester};

const PRODUCT_KEY: &str = "products/field-notes.pdf";
const TERMS: &str = "Personal, non-transferable licence. No redistribution.";

pub fn run() -> EvidentiaResult<()> {
    print_banner();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let keys = KeyMaterial {
        token_secret: random_token(32).into_bytes(),
        redeem_salt: random_token(32).into_bytes(),
        pii_key: random_array::<32>(),
    };
    let identity = StoreIdentity {
        name: "Demo Press".to_string(),
        support_email: "support@demo-press.test".to_string(),
        legal_name: "Demo Press Ltd".to_string(),
    };
    let backend = InMemoryBackend::new(&keys, DeliverySettings::default(), identity, clock.clone());

    let content: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 251) as u8).collect();
    backend.files.upload(PRODUCT_KEY, &content, "application/pdf")?;

    let ctx = backend.context();
    let machine = DeliveryStateMachine::new(ctx.clone());
    let gateway = DownloadGateway::new(ctx.clone());
    let compiler = EvidenceCompiler::new(ctx);
    let buyer = EventContext {
        ip: Some("198.51.100.23".to_string()),
        user_agent: Some("Mozilla/5.0 (demo)".to_string()),
        external_ref: None,
    };

    // ── 1. Checkout ──────────────────────────────────────────────────────────
    step("1", "checkout, terms and capture");
    let order = machine.create_order(
        NewOrder {
            product: product(&content),
            buyer_email: "reader@example.com".to_string(),
            buyer_name: Some("Demo Reader".to_string()),
            provider_order_id: Some("DEMO-ORDER-1".to_string()),
        },
        &buyer,
    )?;
    machine.accept_terms(&order.id, "1", TERMS, &buyer)?;
    let grant = machine.record_payment_captured(&order.id, Some("DEMO-CAPTURE-1".to_string()), &buyer)?;
    println!("    order       {}", grant.order.order_number);
    println!("    license     {}", grant.license_key);
    let Some(link) = grant.link else {
        println!("    no download link issued");
        return Ok(());
    };
    let raw = link
        .download_url
        .rsplit_once("/download/")
        .map(|(_, raw)| raw.to_string())
        .unwrap_or_default();
    println!("    link        expires {}", link.expires_at.to_rfc3339());

    // ── 2. Downloads ─────────────────────────────────────────────────────────
    step("2", "ranged request and full download");
    report_fulfillment("range", gateway.fulfill(&raw, Some("bytes=131072-"), &buyer)?);
    report_fulfillment("full", gateway.fulfill(&raw, None, &buyer)?);
    report_fulfillment("second full", gateway.fulfill(&raw, None, &buyer)?);
    let order = machine.order(&order.id)?;
    println!("    count       {}/{}", order.download_count, order.download_limit);

    // ── 3. Provider notification ─────────────────────────────────────────────
    step("3", "provider notification delivered twice");
    let secret = random_token(32).into_bytes();
    let verifier = Arc::new(HmacProviderVerifier::new(
        secret,
        chrono::Duration::seconds(300),
        clock.clone(),
    ));
    let ingester = NotificationIngester::new(machine.clone(), verifier.clone())?;
    let body = serde_json::json!({
        "id": "WH-DEMO-1",
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": { "id": "DEMO-CAPTURE-1" }
    })
    .to_string();
    let signature = verifier.sign(body.as_bytes(), Utc::now().timestamp());
    for attempt in 1..=2 {
        let outcome = ingester.ingest(body.as_bytes(), Some(signature.as_str()))?;
        println!("    delivery {attempt}  {}", outcome.as_str());
    }
    println!("    status      {}", machine.order(&order.id)?.status);

    // ── 4. Dispute freeze ────────────────────────────────────────────────────
    step("4", "dispute freeze");
    let operator = EventContext::system();
    machine.freeze(&order.id, "demo-operator", "chargeback opened", &operator)?;
    let fresh = machine.issue_download_link(&order.id, None, "demo-operator", &operator);
    println!(
        "    reissue     {}",
        match fresh {
            Ok(_) => "allowed".to_string(),
            Err(e) => e.to_string(),
        }
    );
    machine.unfreeze(&order.id, "demo-operator", &operator)?;
    println!("    unfrozen    {}", machine.order(&order.id)?.status);

    // ── 5. Evidence ──────────────────────────────────────────────────────────
    step("5", "chain verification and evidence report");
    let chain = machine.context().ledger.verify(&order.id)?;
    println!("    chain       valid={} events={}", chain.valid, chain.total_events);
    let report = compiler.compile(&order.id, false)?;
    println!(
        "    downloads   completed={} resumed={} denied={}",
        report.downloads.completed, report.downloads.resumed, report.downloads.denied
    );
    println!("    snapshot    hash_matches={}", report.snapshot.hash_matches);
    println!("    timeline    {} entries", report.timeline.len());
    println!();
    Ok(())
}

fn product(content: &[u8]) -> ProductSnapshot {
    ProductSnapshot {
        product_id: "field-notes".to_string(),
        title: "Field Notes".to_string(),
        description: "A short book of field notes.".to_string(),
        price: Money {
            amount_minor: 1200,
            currency: "USD".to_string(),
        },
        files: vec![FileRef {
            key: PRODUCT_KEY.to_string(),
            filename: "field-notes.pdf".to_string(),
            sha256: sha256_hex(content),
            size: content.len() as u64,
            content_type: Some("application/pdf".to_string()),
        }],
        license_terms: Some(TERMS.to_string()),
        staged: false,
        stages: Vec::new(),
        metadata: serde_json::Value::Null,
    }
}

fn report_fulfillment(label: &str, fulfillment: Fulfillment) {
    match fulfillment {
        Fulfillment::Granted(granted) => {
            let bytes: usize = granted
                .body
                .filter_map(Result::ok)
                .map(|chunk| chunk.len())
                .sum();
            let status = if granted.range.is_some() { 206 } else { 200 };
            println!("    {label:<11} {status} {bytes} bytes");
        }
        Fulfillment::Denied(denial) => {
            println!(
                "    {label:<11} {} {}",
                denial.reason.http_status(),
                denial.reason
            );
        }
    }
}

fn step(number: &str, title: &str) {
    println!();
    println!("[{number}] {title}");
}

fn print_banner() {
    println!();
    println!("Evidentia: evidence-grade digital delivery");
    println!("==========================================");
    println!();
    println!("Every step below appends to the order's hash-chained ledger.");
}
