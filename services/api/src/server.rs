use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryAccountRepository, InMemoryAuditTrail, InMemoryCaseRepository,
    InMemoryInterviewCalendar, LoggingNotifier,
};
use crate::routes::with_platform_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use caregate::clock::{Clock, SystemClock};
use caregate::config::AppConfig;
use caregate::error::AppError;
use caregate::notify::NotificationDispatcher;
use caregate::telemetry;
use caregate::workflows::compliance::{ComplianceOrchestrator, ComplianceService};
use caregate::workflows::verification::{VerificationOrchestrator, VerificationService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CALENDAR_DAYS: i64 = 14;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit = Arc::new(InMemoryAuditTrail::default());
    let notifications = Arc::new(NotificationDispatcher::new(
        Arc::new(LoggingNotifier::default()),
        config.notifications.clone(),
    ));

    let verification = Arc::new(VerificationService::new(
        Arc::new(InMemoryCaseRepository::default()),
        Arc::new(InMemoryInterviewCalendar::with_office_hours(
            clock.now(),
            CALENDAR_DAYS,
        )),
        audit.clone(),
        notifications.clone(),
        clock.clone(),
        &config.verification,
    ));
    let compliance = Arc::new(ComplianceService::new(
        Arc::new(InMemoryAccountRepository::default()),
        audit,
        notifications,
        clock,
        &config.compliance,
    ));

    let shutdown = CancellationToken::new();
    let sweeps = [
        Arc::new(VerificationOrchestrator::new(
            verification.clone(),
            &config.verification,
        ))
        .start(shutdown.clone()),
        Arc::new(ComplianceOrchestrator::new(
            compliance.clone(),
            &config.compliance,
        ))
        .start(shutdown.clone()),
    ];

    let app = with_platform_routes(verification, compliance)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "caregate api ready");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            signal.cancel();
        })
        .await?;

    readiness_flag.store(false, Ordering::Release);
    shutdown.cancel();
    for sweep in sweeps {
        if let Err(err) = sweep.await {
            warn!(error = %err, "orchestrator task ended abnormally");
        }
    }
    info!("caregate api stopped");
    Ok(())
}

async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
