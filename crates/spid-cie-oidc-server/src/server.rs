use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use spid_cie_oidc::http::NoopLoginCompleter;
use spid_cie_oidc::identity::InMemoryUserDirectory;
use spid_cie_oidc::{AppState, LoginCompleter, OidcServices, ServiceInitError};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

pub struct RelyingPartyServer {
    addr: String,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    spid_cie_oidc::router(state)
        .route("/healthz", get(healthz))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    path = %req.uri().path(),
                )
            }),
        )
}

async fn healthz() -> &'static str {
    "ok"
}

pub struct ServerBuilder {
    config: AppConfig,
    completer: Arc<dyn LoginCompleter>,
}

impl ServerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            completer: Arc::new(NoopLoginCompleter),
        }
    }

    pub fn with_completer(mut self, completer: Arc<dyn LoginCompleter>) -> Self {
        self.completer = completer;
        self
    }

    /// Wires the relying party services. Federation keys are generated on
    /// first start.
    pub fn build(self) -> Result<RelyingPartyServer, ServiceInitError> {
        let services = OidcServices::from_config(
            self.config.relying_party_config(),
            Arc::new(InMemoryUserDirectory::new()),
        )?;
        let app = build_app(AppState::new(services, self.completer));

        Ok(RelyingPartyServer {
            addr: self.config.addr(),
            app,
        })
    }
}

impl RelyingPartyServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
