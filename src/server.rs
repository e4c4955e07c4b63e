use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_failed_payment_stats, get_failed_payments, get_job_status, get_subscription_jobs,
    health_check, trigger_payment, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    // The HTTP surface is a thin pass-through to the pipeline's public
    // operations; everything else (subscription CRUD, wallet handling) lives
    // with external collaborators.
    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                .route("/subscriptions/:id/trigger-payment", post(trigger_payment))
                .route("/jobs/:job_id", get(get_job_status))
                .route(
                    "/jobs/subscription/:subscription_id",
                    get(get_subscription_jobs),
                )
                .route(
                    "/failed-payments/subscription/:subscription_id",
                    get(get_failed_payments),
                )
                .route("/failed-payments/stats", get(get_failed_payment_stats)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
