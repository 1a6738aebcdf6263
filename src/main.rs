mod commands;
mod config;
mod errors;
mod events;
mod ledger;
mod llm;
mod receipts;
mod routing;
mod state;
mod tracking;

use std::sync::Arc;

use chrono::Utc;
use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tracing::{error, info, warn, Level};

use config::BotConfig;
use events::sequencer::ChatSequencer;
use ledger::archive::Archiver;
use ledger::client::HttpLedger;
use ledger::identity::RecordIssuer;
use ledger::Ledger;
use llm::VisionClient;
use receipts::cancel::InFlight;
use receipts::extract::ExtractionOrchestrator;
use receipts::normalize::Normalizer;
use receipts::notes::NoteAttacher;
use receipts::render::PdfiumRenderer;
use receipts::{PipelineSettings, ReceiptPipeline};
use state::AppState;
use tracking::sweep::RetentionSweeper;
use tracking::{KvTrackingStore, TrackingStore};

const SWEEP_TICK: std::time::Duration = std::time::Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();
    let level = dotenv::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = Arc::new(BotConfig::from_env()?);
    let guild_id = config.guild_id.map(serenity::GuildId::new);
    if config.routes.is_empty() {
        warn!("No routing groups configured; every upload will be refused");
    }
    info!(
        groups = config.routes.len(),
        keywords = config.keywords.len(),
        "Configuration loaded"
    );
    if !config.admin_ids.is_empty() {
        info!(count = config.admin_ids.len(), "Admin users configured");
    }

    // Init storage
    let store = Arc::new(KvTrackingStore::open(&config.tracking_dir).await?);
    info!("Tracking store initialized at {:?}", config.tracking_dir);
    let tracking: Arc<dyn TrackingStore> = store.clone();

    let routes = Arc::new(config.routes.clone());
    let vision = Arc::new(VisionClient::new(
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        config.llm_api_key.clone(),
        config.llm_timeout,
    )?);
    info!(model = vision.model(), "Vision client initialized");
    let ledger: Arc<dyn Ledger> = Arc::new(HttpLedger::new(routes.clone(), config.ledger_timeout)?);

    let mut normalizer = Normalizer::new(config.limits);
    match PdfiumRenderer::new(config.pdf_render_dpi, config.pdfium_library.clone()) {
        Ok(renderer) => {
            info!(dpi = config.pdf_render_dpi, "PDFium renderer loaded");
            normalizer = normalizer.with_renderer(Arc::new(renderer));
        }
        Err(e) => warn!("{}; PDFs fall back to their embedded images", e),
    }

    let sweeper = RetentionSweeper::new(tracking.clone(), config.retention, config.sweep_interval);
    let pipeline = ReceiptPipeline::new(
        normalizer,
        Archiver::new(ledger.clone(), config.retry.clone()),
        ExtractionOrchestrator::new(vision, config.retry.clone()),
        RecordIssuer::new(ledger.clone(), config.retry.clone()),
        tracking.clone(),
        sweeper.clone(),
        PipelineSettings {
            normalize_timeout: config.normalize_timeout,
            store_timeout: config.store_timeout,
            idempotent_create: config.idempotent_create,
        },
    );
    let notes = NoteAttacher::new(
        tracking.clone(),
        ledger,
        config.retry.clone(),
        Arc::new(config.keywords.clone()),
        config.retention,
        config.retain_after_attach,
    );

    let sweep_task = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_TICK);
            loop {
                tick.tick().await;
                if let Err(e) = sweeper.maybe_sweep(Utc::now()).await {
                    error!("Scheduled sweep failed: {:#}", e);
                }
            }
        })
    };

    let app_state = AppState {
        pipeline,
        notes,
        store: tracking,
        sweeper,
        routes,
        admin_ids: config.admin_ids.clone(),
        sequencer: ChatSequencer::new(),
        in_flight: InFlight::new(),
        config: config.clone(),
    };

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::receipts()],
            event_handler: |ctx, event, framework, data| Box::pin(events::handle(ctx, event, framework, data)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                info!("Registering {} top-level command(s):", commands.len());
                for cmd in commands {
                    info!("  /{} ({} subcommands)", cmd.name, cmd.subcommands.len());
                    for sub in &cmd.subcommands {
                        info!("    /{} {}", cmd.name, sub.name);
                    }
                }

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(ctx, &framework.options().commands, gid).await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting receipt keeper...");

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    sweep_task.abort();
    let _ = sweep_task.await;
    drop(client);
    match Arc::try_unwrap(store) {
        Ok(store) => store.close().await,
        Err(_) => warn!("Tracking store still in use at shutdown; not released"),
    }

    Ok(())
}
