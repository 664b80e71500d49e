use signalbridge::application::handlers::message_handler::{self, AppState};
use signalbridge::application::services::autotrader::{Autotrader, AutotraderSettings};
use signalbridge::application::services::position_monitor::{MonitorSettings, PositionMonitor};
use signalbridge::application::services::reconciliation::Reconciler;
use signalbridge::application::services::signal_executor::{ExecutionSettings, SignalExecutor};
use signalbridge::application::services::signal_processor::SignalProcessor;
use signalbridge::config::{AppConfig, Settings, SettingsHandle};
use signalbridge::domain::repositories::signal_parser::SignalParser;
use signalbridge::domain::services::pattern_detector::StructureDetector;
use signalbridge::domain::services::risk_guard::RiskGuard;
use signalbridge::domain::services::strategy_evaluator::{PassThrough, RsiFilter, StrategyEvaluator};
use signalbridge::infrastructure::llm_parser::{LlmSignalParser, UnconfiguredParser};
use signalbridge::infrastructure::venue_factory::VenueFactory;
use signalbridge::persistence::repository::SignalRepository;
use signalbridge::persistence::{init_database_with, DatabaseConfig};
use signalbridge::task_runner::{run_periodic, PeriodicConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signalbridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!("Signalbridge starting");
    info!(
        "Venue: {:?}, breakeven: {}, autotrader: {}",
        config.venue_mode, config.breakeven_enabled, config.autotrader_enabled
    );

    let pool = init_database_with(&DatabaseConfig {
        url: config.database_url.clone(),
        ..DatabaseConfig::from_env()
    })
    .await?;
    let repo = SignalRepository::new(pool);

    let settings = match SettingsHandle::from_file(&config.channels_file) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("{}; starting with no channels configured", e);
            SettingsHandle::fixed(Settings::default())
        }
    };

    let venue = VenueFactory::create(&config)?;

    let parser: Arc<dyn SignalParser> = match &config.parser_api_key {
        Some(key) => Arc::new(LlmSignalParser::new(
            key.clone(),
            config.parser_model.clone(),
            config.parser_base_url.clone(),
            config.parser_timeout_secs,
        )?),
        None => {
            warn!("PARSER_API_KEY not set, chat messages will be dropped");
            Arc::new(UnconfiguredParser)
        }
    };

    let executor = Arc::new(SignalExecutor::new(
        venue.clone(),
        repo.clone(),
        ExecutionSettings {
            lot_per_leg: config.lot_per_leg,
            min_lot: config.min_lot,
            tag: config.order_tag(),
        },
    ));
    let processor = Arc::new(SignalProcessor::new(
        settings.clone(),
        parser,
        venue.clone(),
        repo.clone(),
        executor.clone(),
        config.parser_timeout(),
    ));

    // Orders placed before a crash may never have reached the store
    let reconciler = Reconciler::new(venue.clone(), repo.clone(), config.order_tag());
    match reconciler.reconcile_on_startup().await {
        Ok(report) if !report.is_clean() => warn!(
            "{} venue order(s) need manual reconciliation",
            report.orphans.len()
        ),
        Ok(_) => {}
        Err(e) => error!("Startup reconciliation failed: {}", e),
    }

    let risk = Arc::new(Mutex::new(RiskGuard::new(
        config.risk_starting_balance,
        config.risk_daily_loss_fraction,
        config.risk_max_drawdown_fraction,
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    let monitor = Arc::new(
        PositionMonitor::new(
            venue.clone(),
            repo.clone(),
            MonitorSettings {
                breakeven_enabled: config.breakeven_enabled,
                offset_pips: config.breakeven_offset_pips,
                deal_history_days: config.deal_history_days,
                magic: config.order_magic,
            },
        )
        .with_risk_guard(risk.clone()),
    );
    background.push(tokio::spawn(run_periodic(
        "position-monitor",
        PeriodicConfig::every(Duration::from_secs(config.monitor_interval_seconds)),
        shutdown_rx.clone(),
        move || {
            let monitor = monitor.clone();
            async move { monitor.run_once().await.map(|_| ()).map_err(|e| e.to_string()) }
        },
    )));

    if config.autotrader_enabled {
        let evaluator: Arc<dyn StrategyEvaluator> = if config.autotrader_rsi_filter {
            Arc::new(RsiFilter::default())
        } else {
            Arc::new(PassThrough)
        };
        info!(
            "Autotrader on {:?} with {} evaluator",
            config.autotrader_symbols,
            evaluator.name()
        );
        let autotrader = Arc::new(Autotrader::new(
            venue.clone(),
            repo.clone(),
            executor.clone(),
            StructureDetector::new(config.detector_config()),
            evaluator,
            risk.clone(),
            AutotraderSettings {
                symbols: config.autotrader_symbols.clone(),
                candle_count: config.autotrader_candles,
            },
        ));
        background.push(tokio::spawn(run_periodic(
            "autotrader",
            PeriodicConfig::every(Duration::from_secs(config.autotrader_interval_seconds)),
            shutdown_rx.clone(),
            move || {
                let autotrader = autotrader.clone();
                async move { autotrader.run_once().await.map(|_| ()).map_err(|e| e.to_string()) }
            },
        )));
    }

    let app = message_handler::router(AppState {
        processor,
        settings,
        repo,
        venue_name: venue.name().to_string(),
    });

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    info!("Listening on {}", config.http_bind_addr);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutting down gracefully...");
    let _ = shutdown_tx.send(true);
    for task in background {
        if let Err(e) = task.await {
            error!("Background task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
