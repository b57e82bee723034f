//! Process entry point: parses CLI arguments, loads and validates
//! configuration, wires every subsystem crate into an [`AppState`], and
//! serves the gateway's axum [`Router`] until a shutdown signal arrives.
//!
//! Mirrors the teacher's `cli/src/main.rs` shape (global args, an optional
//! subcommand defaulting to "start the server", `init_telemetry`) but there
//! is exactly one long-running subsystem to assemble here, not a dozen
//! independent feature areas, so the command surface is much smaller.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use chatcore_auth::{AuthService, AuthServiceConfig, TokenSigner};
use chatcore_broker::MessageBroker;
use chatcore_cache::{ResponseCache, ResponseCacheConfig};
use chatcore_config::{ChatCoreConfig, Severity};
use chatcore_gateway::{AppState, server::build_router, user_directory::UserDirectory};
use chatcore_hub::{ConnectionHub, HubConfig};
use chatcore_kv::{InProcessPubSub, KVStore, MemoryKv, PubSub, SqlxKv, SqlxPubSub};
use chatcore_matcher::{Catalogue, MatcherStack, PipelineConfig as MatcherPipelineConfig, SynonymDictionary};
use chatcore_metrics::{MetricsRecorderConfig, init_metrics};
use chatcore_orchestrator::ChatOrchestrator;
use chatcore_ratelimit::{RateLimit, RateLimitConfig as CoreRateLimitConfig, RateLimiter};
use chatcore_service_traits::{NoopChatStore, NoopEmbedder, NoopGenerator, NoopVectorIndex};
use chatcore_sessions::{KvSessionStore, MemorySessionStore, SessionStore};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatcore", about = "Horizontally scalable chat gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Path to a `chatcore.{toml,yaml,json}` config file (overrides discovery).
    #[arg(long, global = true, env = "CHATCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Relational database URL (sqlite/postgres) backing the distributed
    /// `KVStore`/`PubSub`. Without one, both run in-process and state does
    /// not survive a restart or fan out across workers (§4.A).
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Stage 1 intent catalogue (§4.H).
    #[arg(long, global = true, default_value = "content/catalogue.json")]
    catalogue: PathBuf,
    /// Stage 2 synonym dictionary (§4.H).
    #[arg(long, global = true, default_value = "content/synonyms.json")]
    synonyms: PathBuf,
    /// Locale tag used for response-cache fingerprinting (§4.G).
    #[arg(long, global = true, default_value = "tr")]
    locale: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// User account management against the gateway's `UserDirectory`.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a new account (or overwrite an existing one).
    Add { username: String, password: String },
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "chatcore starting");

    let mut config = match &cli.config {
        Some(path) => chatcore_config::load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => chatcore_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let validation = chatcore_config::validate(&config);
    for diagnostic in &validation.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(category = diagnostic.category, path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(category = diagnostic.category, path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Info => info!(category = diagnostic.category, path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if config.is_production() && validation.has_errors() {
        anyhow::bail!("refusing to start: production configuration has {} fatal diagnostic(s)", validation.count(Severity::Error));
    }

    // Only ever mints a key outside production; `validate` above already
    // refused to start a production process with `auth.signing_key` unset.
    let signing_key = resolve_signing_key(&mut config);

    let (kv, pubsub) = build_backend(&cli).await?;
    let command = cli.command.take();

    match command {
        Some(Commands::User { action }) => run_user_command(action, kv).await,
        Some(Commands::Serve) | None => serve(cli, config, signing_key, kv, pubsub).await,
    }
}

/// §9 Open Question: a missing signing key is fatal in production (`validate`
/// already refuses to start); outside production we mint an ephemeral one so
/// local development works without a config file, and say so loudly since
/// every token it signs becomes invalid the next time the process restarts.
fn resolve_signing_key(config: &mut ChatCoreConfig) -> SecretString {
    use secrecy::ExposeSecret;

    if let Some(key) = &config.auth.signing_key {
        return key.clone();
    }
    let generated = SecretString::from(format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4()));
    warn!("no auth.signing_key configured; generated an ephemeral dev-only key (tokens will not survive a restart)");
    debug_assert!(generated.expose_secret().len() >= 32);
    config.auth.signing_key = Some(generated.clone());
    generated
}

async fn build_backend(cli: &Cli) -> anyhow::Result<(Arc<dyn KVStore>, Arc<dyn PubSub>)> {
    let Some(database_url) = &cli.database_url else {
        info!("no database_url configured; running with an in-process KVStore and PubSub (single worker only)");
        return Ok((Arc::new(MemoryKv::new()), Arc::new(InProcessPubSub::new())));
    };

    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connecting to database_url")?;

    let kv = SqlxKv::new(pool.clone());
    kv.migrate().await.context("migrating chatcore_kv tables")?;
    let pubsub = SqlxPubSub::new(pool);
    pubsub.migrate().await.context("migrating chatcore_pubsub table")?;

    info!("connected to distributed KVStore/PubSub backend");
    Ok((Arc::new(kv), Arc::new(pubsub)))
}

async fn run_user_command(action: UserAction, kv: Arc<dyn KVStore>) -> anyhow::Result<()> {
    let directory = UserDirectory::new(kv);
    match action {
        UserAction::Add { username, password } => {
            let user_id = directory.create_user(&username, &password).await?;
            println!("created user '{username}' ({user_id})");
        },
    }
    Ok(())
}

fn worker_id(config: &ChatCoreConfig) -> String {
    if let Some(id) = &config.server.worker_id {
        return id.clone();
    }
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{host}-{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

fn core_rate_limit_config(config: &chatcore_config::RateLimitConfig) -> CoreRateLimitConfig {
    let window = config.window();
    let limit = |max_requests: u32| RateLimit { max_requests, window };
    CoreRateLimitConfig {
        general: limit(config.general_per_window),
        chat: limit(config.chat_per_window),
        login: limit(config.login_per_window),
        auth_api: limit(config.auth_api_per_window),
    }
}

fn matcher_pipeline_config(config: &chatcore_config::PipelineConfig) -> MatcherPipelineConfig {
    MatcherPipelineConfig {
        stage1_threshold: config.stage1_threshold,
        stage2_threshold: config.stage2_threshold,
        stage2_alpha: config.stage2_alpha,
        stage2_beta: config.stage2_beta,
        stage2_gamma: config.stage2_gamma,
        stage3_cosine_min: config.stage3_cosine_min,
        stage3_margin: config.stage3_margin,
        stage3_override: config.stage3_override,
        stage3_top_k: config.stage3_top_k,
    }
}

async fn serve(
    cli: Cli,
    config: ChatCoreConfig,
    signing_key: SecretString,
    kv: Arc<dyn KVStore>,
    pubsub: Arc<dyn PubSub>,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let worker_id = worker_id(&config);
    info!(worker_id = %worker_id, bind = %config.server.bind, port = config.server.port, "assembling subsystems");

    let catalogue_json = std::fs::read_to_string(&cli.catalogue)
        .with_context(|| format!("reading catalogue {}", cli.catalogue.display()))?;
    let synonyms_json = std::fs::read_to_string(&cli.synonyms)
        .with_context(|| format!("reading synonyms {}", cli.synonyms.display()))?;
    let catalogue = Catalogue::from_json(&catalogue_json).context("parsing catalogue")?;
    let synonyms = SynonymDictionary::from_json(&synonyms_json).context("parsing synonyms")?;

    // Follows the same backend `build_backend` already picked, not
    // `rate_limit.use_distributed` (that flag is the rate limiter's own
    // backend switch, §4.A/§6 — see below).
    let session_store: Arc<dyn SessionStore> = if cli.database_url.is_some() {
        Arc::new(KvSessionStore::new(Arc::clone(&kv)).with_ttl(config.session.ttl()))
    } else {
        Arc::new(MemorySessionStore::new().with_ttl(config.session.ttl()))
    };

    let circuit: chatcore_common::CircuitConfig = config.circuit.clone().into();

    // `rate_limit.use_distributed = false` routes counters through a
    // process-local `MemoryKv` instead of the shared distributed backend
    // (§4.A/§6), independent of what backs sessions/cache/auth above.
    let rate_limit_kv: Arc<dyn KVStore> = if config.rate_limit.use_distributed {
        Arc::clone(&kv)
    } else {
        Arc::new(MemoryKv::new())
    };
    let rate_limiter = Arc::new(
        RateLimiter::new(rate_limit_kv, core_rate_limit_config(&config.rate_limit))
            .with_circuit_config(circuit.clone())
            .with_fallback_to_memory(config.rate_limit.fallback_to_memory),
    );

    let matcher = Arc::new(
        MatcherStack::new(
            catalogue,
            synonyms,
            matcher_pipeline_config(&config.pipeline),
            Arc::new(NoopEmbedder),
            Arc::new(NoopVectorIndex),
            Arc::new(NoopGenerator),
        )
        .with_generator_circuit_config(circuit.clone())
        .with_vector_circuit_config(circuit),
    );

    let cache = Arc::new(ResponseCache::new(
        ResponseCacheConfig {
            ttl: config.response_cache.ttl(),
            capacity: config.response_cache.capacity,
            shared: config.response_cache.shared,
        },
        config.response_cache.shared.then(|| Arc::clone(&kv)),
    ));

    let broker = Arc::new(MessageBroker::new(Arc::clone(&pubsub), worker_id.clone()));
    broker.announce_worker_up().await.context("announcing worker up")?;

    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::clone(&rate_limiter),
        Arc::clone(&cache),
        Arc::clone(&matcher),
        Arc::new(NoopChatStore),
        Arc::clone(&broker),
        cli.locale.clone(),
    ));

    let auth = Arc::new(AuthService::new(
        Arc::clone(&kv),
        TokenSigner::new(signing_key),
        AuthServiceConfig {
            access_token_ttl: config.auth.access_token_ttl(),
            refresh_token_ttl: config.auth.refresh_token_ttl(),
            max_login_failures: config.auth.max_login_failures,
            login_window: config.rate_limit.window(),
            block_duration: config.auth.block_duration(),
        },
    ));

    let user_directory = Arc::new(UserDirectory::new(Arc::clone(&kv)));

    let hub = ConnectionHub::new(
        worker_id.clone(),
        HubConfig {
            max_frame_bytes: config.ws.max_frame_bytes,
            idle_timeout: config.ws.idle_timeout(),
            pong_timeout: config.ws.pong_timeout(),
            send_queue_capacity: config.ws.send_queue_capacity,
        },
        Arc::clone(&session_store),
        Arc::clone(&broker),
    );

    if let Err(error) = hub.reap_orphaned_sessions().await {
        warn!(%error, "startup reap of orphaned sessions failed");
    }

    let metrics_handle = init_metrics(MetricsRecorderConfig {
        enabled: true,
        prefix: Some("chatcore".to_string()),
        global_labels: vec![("worker_id".to_string(), worker_id.clone())],
    })
    .context("initializing metrics")?;

    let state = AppState {
        config: Arc::clone(&config),
        worker_id: worker_id.clone(),
        hub: Arc::clone(&hub),
        orchestrator,
        auth,
        http_rate_limiter: Arc::clone(&rate_limiter),
        user_directory,
        broker: Arc::clone(&broker),
        metrics_handle,
        started_at: std::time::Instant::now(),
    };

    spawn_sweeper(Arc::clone(&session_store), Arc::clone(&hub));
    spawn_rate_limit_cleanup(Arc::clone(&rate_limiter), config.rate_limit.cleanup_interval_seconds);

    let router = build_router(state);
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let shutdown_grace = config.server.shutdown_grace();
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&hub), Arc::clone(&broker), shutdown_grace))
        .await
        .context("serving")?;

    Ok(())
}

/// §4.E "second periodic task": proactively sweep TTL-expired sessions and
/// reap sessions whose owning worker has disappeared, every 60s.
fn spawn_sweeper(session_store: Arc<dyn SessionStore>, hub: Arc<ConnectionHub>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match session_store.sweep_expired(chatcore_common::now_millis()).await {
                Ok(removed) if removed > 0 => info!(removed, "swept expired sessions"),
                Ok(_) => {},
                Err(error) => warn!(%error, "session sweep failed"),
            }
            if let Err(error) = hub.reap_orphaned_sessions().await {
                warn!(%error, "orphaned session reap failed");
            }
        }
    });
}

/// §4.B: "A background task evicts exhausted keys every `cleanup_interval`".
/// The distributed backend's sorted sets already carry a TTL, so this only
/// needs to sweep the local in-process fallback window.
fn spawn_rate_limit_cleanup(rate_limiter: Arc<RateLimiter>, cleanup_interval_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_seconds.max(1)));
        loop {
            interval.tick().await;
            rate_limiter.cleanup_expired_local_windows();
        }
    });
}

async fn shutdown_signal(hub: Arc<ConnectionHub>, broker: Arc<MessageBroker>, grace: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining connections");
    if let Err(error) = broker.announce_worker_down().await {
        warn!(%error, "failed to announce worker down");
    }
    hub.shutdown(grace).await;
}
