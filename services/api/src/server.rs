use crate::cli::ServeArgs;
use crate::infra::{AppState, LocalAdapters};
use crate::routes::with_intake_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trip_intake::config::AppConfig;
use trip_intake::error::AppError;
use trip_intake::telemetry;
use trip_intake::workflows::intake::IntakeService;

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

    let adapters = LocalAdapters::seeded();
    let intake_service = adapters.intake_service(&config.intake);

    if let Some(interval) = config.intake.reconcile_interval() {
        tokio::spawn(reconcile_periodically(intake_service.clone(), interval));
    }

    let app = with_intake_routes(intake_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "trip intake service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn reconcile_periodically(service: Arc<IntakeService>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; skip it so startup is not a sweep.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match service.reconcile().await {
            Ok(report) if !report.is_clean() => warn!(
                orphaned = report.orphaned.len(),
                "payments found without application records"
            ),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "payment reconciliation failed"),
        }
    }
}
