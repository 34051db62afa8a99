use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use miga_actions::handlers::{ChatProviderHandler, InternalHandler, SheetsHandler, WebhookHandler};
use miga_actions::{ActionBus, ActionExecutor, ActionRegistry, HandlerKind};
use miga_chat::{ChatClient, ReplySender};
use miga_confighub::{projection, ConfigHub};
use miga_core::config::{MigaConfig, RunMode};
use miga_core::shutdown::{wait_for_signal, ShutdownRegistry};
use miga_embeddings::{Embedder, OpenAiEmbedder};
use miga_llm::{knowledge, LanguageModel, LlmClient, ModelRegistry};
use miga_memory::ConversationStore;
use miga_pipeline::{PipelineDeps, PipelineSelector};
use miga_queue::{JobHandler, LocalQueue, WorkQueue};
use miga_summarizer::Summarizer;
use miga_vector::VectorStore;

mod app;
mod http;
mod tasks;
mod worker;

#[derive(Parser)]
#[command(name = "miga-gateway", about = "Conversational automation gateway")]
struct Cli {
    /// Path to miga.toml (default: ~/.miga/miga.toml, MIGA_CONFIG env).
    #[arg(long)]
    config: Option<String>,
}

/// Lazy per-component pool: nothing dials until the first query, so a down
/// database degrades at the component level instead of failing startup.
/// A malformed URL is a configuration error and fails fast.
fn pool_for(url: &str, max: u32, connect_timeout_secs: u64) -> anyhow::Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(max)
        .acquire_timeout(Duration::from_secs(connect_timeout_secs))
        .connect_lazy(url)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("MIGA_CONFIG").ok());
    let config = MigaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        MigaConfig::default()
    });
    let run_mode = config.gateway.run_mode;
    info!(?run_mode, "starting miga gateway");

    // ── Storage pools (per component, lazy) ──────────────────────────────
    let db = &config.database;
    let vector_pool = pool_for(&db.url, db.vector_pool_max, db.connect_timeout_secs)?;
    let memory_pool = pool_for(&db.url, db.memory_pool_max, db.connect_timeout_secs)?;
    let queue_pool = pool_for(&db.url, db.queue_pool_max, db.connect_timeout_secs)?;
    let actions_pool = pool_for(&db.url, db.actions_pool_max, db.connect_timeout_secs)?;
    let mut knowledge_pool =
        Some(pool_for(&db.url, db.knowledge_pool_max, db.connect_timeout_secs)?);

    // ── Components ───────────────────────────────────────────────────────
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        &config.embeddings,
        config.llm.api_key.as_deref(),
    ));

    let vector = Arc::new(VectorStore::new(
        vector_pool,
        Arc::clone(&embedder),
        config.vector.clone(),
    ));
    if let Err(e) = vector.init().await {
        warn!(error = %e, "vector schema init failed, semantic paths degrade");
    }

    let memory = Arc::new(ConversationStore::new(
        memory_pool,
        Arc::clone(&embedder),
        config.memory.clone(),
    ));
    if let Err(e) = memory.init().await {
        warn!(error = %e, "memory schema init failed, falling back to in-process tails");
    }

    let registry = Arc::new(ModelRegistry::new());
    if let Some(pool) = &knowledge_pool {
        match knowledge::init_schema(pool).await {
            Ok(()) => match knowledge::load_all(pool).await {
                Ok(entries) => registry.absorb(entries),
                Err(e) => warn!(error = %e, "model knowledge load failed"),
            },
            Err(e) => {
                warn!(error = %e, "model knowledge schema init failed, learning stays in memory");
                knowledge_pool = None;
            }
        }
    }

    let llm = Arc::new(LlmClient::new(
        &config.llm,
        Arc::clone(&registry),
        knowledge_pool.clone(),
    ));

    let hub = Arc::new(ConfigHub::new(&config.confighub));
    let snapshot = hub.refresh().await;
    registry.update_routing(snapshot.model_routing.clone());
    if let Err(e) = projection::project(&snapshot, &vector, &config.confighub).await {
        warn!(error = %e, "initial config projection failed");
    }

    let chat = Arc::new(ChatClient::new(&config.chat));
    let queue = Arc::new(WorkQueue::connect(Some(queue_pool), config.queue.clone()).await);

    let mut executor = ActionExecutor::new(config.actions.clone());
    executor.register(
        HandlerKind::ChatProvider,
        Arc::new(ChatProviderHandler::new(Arc::clone(&chat))),
    );
    executor.register(HandlerKind::Webhook, Arc::new(WebhookHandler::default()));
    executor.register(
        HandlerKind::Sheets,
        Arc::new(SheetsHandler::new(config.actions.sheet_write_url.clone())),
    );
    executor.register(HandlerKind::Internal, Arc::new(InternalHandler));

    let actions = Arc::new(ActionBus::new(
        actions_pool,
        ActionRegistry::default(),
        Arc::new(executor),
        config.actions.clone(),
    ));
    if let Err(e) = actions.init().await {
        warn!(error = %e, "action bus schema init failed");
    }

    let state = Arc::new(app::AppState {
        config: config.clone(),
        hub: Arc::clone(&hub),
        vector: Arc::clone(&vector),
        memory: Arc::clone(&memory),
        queue: Arc::clone(&queue),
        llm: Arc::clone(&llm),
        registry: Arc::clone(&registry),
        actions: Arc::clone(&actions),
        knowledge_pool,
        started_at: Instant::now(),
    });

    // ── Tasks per run mode ───────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handles = Vec::new();
    let mut scheduler_handles = Vec::new();

    if matches!(run_mode, RunMode::Worker | RunMode::Both) {
        let selector = Arc::new(PipelineSelector::new(PipelineDeps {
            memory: Arc::clone(&memory),
            vector: Arc::clone(&vector),
            hub: Arc::clone(&hub),
            llm: Arc::clone(&llm) as Arc<dyn LanguageModel>,
            sender: Arc::clone(&chat) as Arc<dyn ReplySender>,
            cfg: config.pipeline.clone(),
        }));
        let handler: Arc<dyn JobHandler> = Arc::new(worker::ReplyJobHandler::new(selector));
        worker_handles = queue.start_workers(handler, shutdown_rx.clone());

        let summarizer = Summarizer::new(
            Arc::clone(&memory),
            Arc::clone(&llm) as Arc<dyn LanguageModel>,
            Arc::clone(&embedder),
            config.memory.clone(),
            LocalQueue::new(config.queue.local_concurrency),
        );
        scheduler_handles.push(tokio::spawn(summarizer.run(shutdown_rx.clone())));
        scheduler_handles.push(tasks::spawn_vector_cleanup(
            Arc::clone(&state),
            shutdown_rx.clone(),
        ));
        scheduler_handles.push(tasks::spawn_maintenance_sweep(
            Arc::clone(&state),
            shutdown_rx.clone(),
        ));
    }
    scheduler_handles.push(tasks::spawn_config_refresh(
        Arc::clone(&state),
        shutdown_rx.clone(),
    ));

    let http_handle = if matches!(run_mode, RunMode::Web | RunMode::Both) {
        let addr: SocketAddr =
            format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("miga gateway listening on {addr}");
        let router = app::build_router(Arc::clone(&state));
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "http server error");
            }
        }))
    } else {
        None
    };

    // ── Shutdown ─────────────────────────────────────────────────────────
    wait_for_signal().await;
    let _ = shutdown_tx.send(true);

    let shutdown_registry = ShutdownRegistry::new();
    if let Some(handle) = http_handle {
        shutdown_registry.register("http-listener", 9, Duration::from_secs(10), move || {
            async move { handle.await.map_err(|e| e.to_string()) }
        });
    }
    shutdown_registry.register("queue-consumers", 5, Duration::from_secs(15), move || {
        async move {
            for handle in worker_handles {
                handle.await.map_err(|e| e.to_string())?;
            }
            Ok(())
        }
    });
    shutdown_registry.register("schedulers", 3, Duration::from_secs(10), move || {
        async move {
            for handle in scheduler_handles {
                handle.await.map_err(|e| e.to_string())?;
            }
            Ok(())
        }
    });
    shutdown_registry.run().await;

    Ok(())
}
