use std::sync::Arc;

use inbox_relay::capability::LinkSigner;
use inbox_relay::config::RelayConfig;
use inbox_relay::llm::create_provider;
use inbox_relay::notify::{Messenger, NotificationDispatcher, Renderer, TelegramMessenger};
use inbox_relay::pipeline::{self, PipelineCoordinator, worker};
use inbox_relay::raw::FsRawStore;
use inbox_relay::registry::AddressRegistry;
use inbox_relay::server::{AppState, relay_routes};
use inbox_relay::store::{Database, LibSqlBackend};
use inbox_relay::summarizer::Summarizer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Required: TELEGRAM_BOT_TOKEN, RELAY_MAIL_DOMAIN, RELAY_PUBLIC_BASE_URL, RELAY_LINK_SECRET");
        std::process::exit(1);
    });

    eprintln!("📨 Inbox Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mail domain: {}", config.mail_domain);
    eprintln!("   Listening: http://{}", config.bind_addr);
    eprintln!("   Raw objects: {}", config.raw_dir.display());
    if config.telegram.webhook_secret.is_none() {
        eprintln!("   Warning: TELEGRAM_WEBHOOK_SECRET not set; webhook calls are not authenticated");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Summarizer ───────────────────────────────────────────────────────
    let provider = match &config.llm {
        Some(llm_config) => {
            eprintln!("   Summaries: {} ({:?})", llm_config.model, llm_config.backend);
            Some(create_provider(llm_config)?)
        }
        None => {
            eprintln!("   Summaries: fallback only (RELAY_LLM_API_KEY not set)");
            None
        }
    };
    let summarizer = Arc::new(Summarizer::new(provider, config.summarizer.clone()));

    // ── Notifications ────────────────────────────────────────────────────
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(
        config.telegram.bot_token.clone(),
        config.telegram.api_base.clone(),
    )?);
    if let Err(e) = messenger.health_check().await {
        eprintln!("   Warning: Telegram health check failed: {e}");
    }

    let signer = LinkSigner::new(
        &config.links.public_base_url,
        config.links.secret.clone(),
        config.links.ttl,
    )?;
    let registry = Arc::new(AddressRegistry::new(Arc::clone(&db)));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Renderer::new(signer.clone(), config.mail_domain.clone()),
        Arc::clone(&messenger),
        Arc::clone(&registry),
    ));

    // ── Pipeline ─────────────────────────────────────────────────────────
    let (changes_tx, changes_rx) = pipeline::change_feed();
    let coordinator = Arc::new(PipelineCoordinator::new(
        Arc::clone(&db),
        Arc::new(FsRawStore::new(&config.raw_dir)),
        summarizer,
        registry,
        dispatcher,
        changes_tx.clone(),
    ));

    // Records left pending by a previous run.
    let drained = worker::drain_pending(&coordinator, 4).await;
    if !drained.is_empty() {
        eprintln!("   Recovered {} pending record(s)", drained.len());
    }

    let _consumer_handle = pipeline::spawn_change_consumer(Arc::clone(&coordinator), changes_rx);
    let (_sweep_handle, _sweep_shutdown) =
        pipeline::spawn_pending_sweep(Arc::clone(&db), changes_tx, config.sweep);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = relay_routes(AppState {
        coordinator,
        messenger,
        signer,
        mail_domain: config.mail_domain.clone(),
        webhook_secret: config.telegram.webhook_secret.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Relay server started");
    eprintln!();
    axum::serve(listener, app).await?;

    Ok(())
}
