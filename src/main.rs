use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use urgencias_api_rest::{ApiDoc, AppState};
use urgencias_core::{CoreConfig, DisabledNotifier, Notifier, SmtpNotifier, SmtpSettings, Store};

/// Reads SMTP settings from the environment, or `None` when `SMTP_HOST` is
/// unset and mail delivery stays disabled.
fn smtp_settings_from_env() -> anyhow::Result<Option<SmtpSettings>> {
    let Ok(host) = std::env::var("SMTP_HOST") else {
        return Ok(None);
    };

    let port = match std::env::var("SMTP_PORT") {
        Ok(raw) => raw.parse()?,
        Err(_) => 587,
    };

    Ok(Some(SmtpSettings {
        host,
        port,
        username: std::env::var("SMTP_USER").ok(),
        password: std::env::var("SMTP_PASS").ok(),
        from_address: std::env::var("SMTP_FROM").unwrap_or_default(),
    }))
}

/// Main entry point for the emergency-ward backend.
///
/// # Environment Variables
/// - `LISTEN_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DATABASE_PATH`: SQLite database file (default: "urgencias.db")
/// - `SMTP_HOST`: mail relay host; when unset, plan-by-mail is disabled
/// - `SMTP_PORT`: mail relay port (default: 587)
/// - `SMTP_USER` / `SMTP_PASS`: optional relay credentials
/// - `SMTP_FROM`: sender mailbox, required when `SMTP_HOST` is set
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("urgencias_core=info".parse()?)
                .add_directive("urgencias_api_rest=info".parse()?)
                .add_directive("urgencias_run=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_path =
        PathBuf::from(std::env::var("DATABASE_PATH").unwrap_or_else(|_| "urgencias.db".into()));
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let config = CoreConfig::new(database_path, smtp_settings_from_env()?)
        .map_err(|e| anyhow::anyhow!("configuración inválida: {e}"))?;

    let store = Arc::new(Store::open(config.database_path())?);

    let notifier: Arc<dyn Notifier> = match config.smtp() {
        Some(settings) => {
            tracing::info!(host = %settings.host, "++ SMTP notifier enabled");
            Arc::new(SmtpNotifier::new(settings).map_err(|e| anyhow::anyhow!("SMTP: {e}"))?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, plan-by-mail delivery is disabled");
            Arc::new(DisabledNotifier)
        }
    };

    tracing::info!("++ Starting Urgencias REST on {}", listen_addr);

    let app = urgencias_api_rest::router(AppState::new(store, notifier))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
