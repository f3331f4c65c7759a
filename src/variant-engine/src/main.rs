//! Variant Engine: adaptive content-variant experimentation.
//!
//! Runs a simulated serving session for one content item. A pool is seeded
//! from the catalog, variants are served against hidden true click rates,
//! and the engine decays, regenerates and evaluates until a winner emerges
//! or the rounds run out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};
use variant_analytics::AuditLogger;
use variant_core::{AppConfig, AuditSink, EventType, PoolKey, SeedTraits, VariantId};
use variant_ledger::{InMemoryPoolStore, PoolStore, RedisPoolStore};
use variant_orchestrator::{ContentContext, ExperimentService, InMemoryCatalog};
use variant_stats::Decision;

#[derive(Parser, Debug)]
#[command(name = "variant-engine")]
#[command(about = "Adaptive content-variant experimentation engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "VARIANT_ENGINE__NODE_ID")]
    node_id: Option<String>,

    /// Selection strategy: rotation, ucb1, weighted_ucb or thompson
    #[arg(long, env = "VARIANT_ENGINE__SELECTION__STRATEGY")]
    selection: Option<String>,

    /// Generation strategy (overrides config)
    #[arg(long, env = "VARIANT_ENGINE__EXPERIMENT__GENERATION_STRATEGY")]
    generation: Option<String>,

    /// Audit log path (overrides config)
    #[arg(long, env = "VARIANT_ENGINE__AUDIT__PATH")]
    audit_path: Option<String>,

    /// Serving rounds to simulate
    #[arg(long, default_value_t = 20_000)]
    rounds: u64,

    /// Evaluate, decay and check regeneration every N rounds
    #[arg(long, default_value_t = 1_000)]
    check_every: u64,

    /// Seed for the random source
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Content title of the demo item
    #[arg(long, default_value = "Alpine Lake Sunrise")]
    title: String,

    /// Platform of the demo pool
    #[arg(long, default_value = "tiktok")]
    platform: String,

    /// Persist pools in Redis instead of memory
    #[arg(long, default_value_t = false)]
    redis: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "variant_engine=info,variant_orchestrator=info,variant_ledger=info,variant_stats=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Variant Engine starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id.clone() {
        config.node_id = node_id;
    }
    if let Some(selection) = cli.selection.clone() {
        config.selection.strategy = selection;
    }
    if let Some(generation) = cli.generation.clone() {
        config.experiment.generation_strategy = generation;
    }
    if let Some(path) = cli.audit_path.clone() {
        config.audit.path = path;
    }

    info!(
        node_id = %config.node_id,
        selection = %config.selection.strategy,
        generation = %config.experiment.generation_strategy,
        rounds = cli.rounds,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let addr = SocketAddr::new(config.metrics.host.parse()?, config.metrics.port);
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!(port = config.metrics.port, "Metrics exporter started"),
            Err(e) => error!(error = %e, "Failed to start metrics exporter"),
        }
    }

    let store: Arc<dyn PoolStore> = if cli.redis {
        Arc::new(RedisPoolStore::new(&config.redis)?)
    } else {
        Arc::new(InMemoryPoolStore::new())
    };

    let (audit, audit_handle) = AuditLogger::start(&config.audit)?;
    let audit_sink: Arc<dyn AuditSink> = Arc::new(audit.clone());

    let content_id = "demo-content";
    let catalog = InMemoryCatalog::new();
    catalog.insert(
        content_id,
        ContentContext::new(cli.title.clone()).with_traits(SeedTraits {
            hook_strength: Some(0.7),
            shareability: Some(0.2),
            ..SeedTraits::default()
        }),
    );

    let service = ExperimentService::new(config, store, Arc::new(catalog), audit_sink)?;
    let key = PoolKey::new(content_id, cli.platform.clone());

    let session = tokio::task::spawn_blocking(move || run_session(&service, &key, &cli));
    let decision = session.await??;

    match &decision {
        Decision::Winner {
            variant_id,
            projection,
            ..
        } => info!(
            %variant_id,
            predicted_uplift = projection.predicted_uplift,
            risk_score = projection.risk_score,
            "Experiment finished with a winner"
        ),
        Decision::KeepServing { reason, .. } => info!(%reason, "Experiment finished without a winner"),
    }
    println!("{}", serde_json::to_string_pretty(&decision)?);

    let dropped = audit.dropped();
    drop(audit);
    if let Err(e) = audit_handle.await {
        error!(error = %e, "Audit writer task failed");
    }
    info!(dropped_audit_records = dropped, "Variant Engine shut down");
    Ok(())
}

/// Serve, record and periodically maintain the pool. Returns the last
/// decision taken.
fn run_session(service: &ExperimentService, key: &PoolKey, cli: &Cli) -> anyhow::Result<Decision> {
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let pool = service.seed_pool(key, &mut rng)?;
    info!(pool = %key, variants = pool.variants.len(), "Seeded demo pool");

    // Hidden click and post rates per variant; regenerated variants get theirs
    // on first serve.
    let mut truth: HashMap<VariantId, (f64, f64)> = HashMap::new();
    let started = Utc::now();
    let mut decision = service.evaluate(key, &mut rng)?;
    let check_every = cli.check_every.max(1);

    for round in 1..=cli.rounds {
        // Simulated clock: one minute per check interval, shared by events
        // and decay.
        let now = started + Duration::milliseconds(round as i64 * 60_000 / check_every as i64);
        let chosen = service.select(key, &mut rng)?;
        let (click_rate, post_rate) = *truth
            .entry(chosen)
            .or_insert_with(|| (rng.gen_range(0.02..0.12), rng.gen_range(0.05..0.15)));

        service.record_event_at(key, &chosen, EventType::Impression, now)?;
        let clicked = rng.gen_bool(click_rate);
        if clicked {
            service.record_event_at(key, &chosen, EventType::Click, now)?;
        }
        if rng.gen_bool(post_rate) {
            service.record_event_at(key, &chosen, EventType::Post, now)?;
        }
        service.record_outcome(key, &chosen, if clicked { 1.0 } else { 0.0 })?;

        if round % check_every == 0 {
            let decayed = service.decay(key, now)?;
            let regeneration = service.regenerate_if_needed(key, &mut rng);
            decision = service.evaluate(key, &mut rng)?;
            info!(
                round,
                decayed,
                regenerated = regeneration.added(),
                winner = ?decision.winner(),
                "Checkpoint"
            );
            if decision.winner().is_some() {
                break;
            }
        }
    }
    Ok(decision)
}
