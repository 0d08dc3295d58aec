//! deal_ledger - Transaction Lifecycle & Financial Integrity Engine
//!
//! Entry point. Wires the engine to its store and collaborators:
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌───────────────────┐
//! │  Config  │───▶│    Store     │───▶│ TransactionEngine │───▶ integrity sweep
//! │  (YAML)  │    │ (PG / memory)│    │  (leases + CAS)   │
//! └──────────┘    └──────────────┘    └───────────────────┘
//! ```
//!
//! Flags:
//! - `--env <name>` / `-e <name>`: load `config/<name>.yaml` (default `dev`)
//! - `--demo`: run one sample deal through create, link, close

use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::{info, warn};

use deal_ledger::config::AppConfig;
use deal_ledger::transaction::adapters::{
    AtomicSequence, MemoryAccounting, MemoryAuthorization, MemoryCommissionRules, MemoryLogistics,
};
use deal_ledger::transaction::{
    Actor, Collaborators, CommissionRule, ComplianceRegistry, MemoryStore, PgStore,
    TransactionEngine, TransactionStore,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_demo_mode() -> bool {
    std::env::args().any(|a| a == "--demo")
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TransactionStore>> {
    match &config.postgres_url {
        Some(url) => {
            let store = PgStore::connect(url, config.postgres_max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store
                .ensure_schema()
                .await
                .context("Failed to create schema")?;
            info!(max_connections = config.postgres_max_connections, "Using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No postgres_url configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// One deal end to end against in-process collaborators
async fn run_demo(
    engine: &TransactionEngine,
    accounting: &MemoryAccounting,
    authorization: &MemoryAuthorization,
    rules: &MemoryCommissionRules,
) -> anyhow::Result<()> {
    let manager = Actor::from("demo-manager");
    authorization.grant(&manager, &engine.config().manager_role);
    rules.upsert(CommissionRule::new("STD-10", Decimal::new(1, 1)));
    accounting.put_posted("INV-DEMO-1", Decimal::from(1000));
    accounting.put_posted("BILL-DEMO-1", Decimal::from(600));

    let tx = engine.on_sale_confirmed("SO-DEMO-1").await?;
    engine.attach_invoice(tx.id, "INV-DEMO-1").await?;
    engine.attach_vendor_bill(tx.id, "BILL-DEMO-1").await?;
    engine.set_commission_rule(tx.id, "STD-10").await?;
    let closed = engine.close(tx.id, &manager).await?;

    let snapshot = closed.snapshot();
    info!(
        reference = %closed.reference,
        snapshot = %snapshot.canonical_json(),
        fingerprint = %snapshot.fingerprint(),
        "Demo deal closed"
    );
    println!("{}", closed);
    println!("{}", snapshot.canonical_json());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = deal_ledger::logging::init_logging(&app_config)?;
    info!(env = %env, "Starting deal_ledger");

    let store = build_store(&app_config).await?;

    let engine_config = app_config.engine.clone();
    // Continue after references issued by earlier runs
    let sequence = AtomicSequence::resume(
        store.as_ref(),
        engine_config.reference_prefix.clone(),
        engine_config.reference_padding,
    )
    .await
    .context("Failed to resume reference sequence")?;
    let accounting = Arc::new(MemoryAccounting::new());
    let authorization = Arc::new(MemoryAuthorization::new());
    let rules = Arc::new(MemoryCommissionRules::new());
    for rule in engine_config.commission_rules()? {
        info!(code = %rule.code, percentage = %rule.percentage, active = rule.active, "Commission rule loaded");
        rules.upsert(rule);
    }
    let collaborators = Collaborators {
        sequence: Arc::new(sequence),
        logistics: Arc::new(MemoryLogistics::new()),
        accounting: accounting.clone(),
        compliance: Arc::new(ComplianceRegistry::new()),
        authorization: authorization.clone(),
        commission_rules: rules.clone(),
    };
    let engine = TransactionEngine::new(store, collaborators, engine_config);

    if use_demo_mode() {
        run_demo(&engine, &accounting, &authorization, &rules).await?;
    }

    let violations = engine.audit_integrity().await?;
    if violations.is_empty() {
        info!("No integrity violations");
    } else {
        for v in &violations {
            println!("{}: {:?}", v.reference, v.violation);
        }
        anyhow::bail!("{} integrity violation(s) found", violations.len());
    }
    Ok(())
}
