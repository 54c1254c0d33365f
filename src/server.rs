use crate::{
    config::{Config, ServerConfig},
    match_service::MatchService,
    model_service::ModelLoader,
    ort_service::OrtModelLoader,
    registry::ModelRegistry,
    routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub struct SharedState<L: ModelLoader> {
    pub match_service: Arc<MatchService<L>>,
}

impl<L: ModelLoader> Clone for SharedState<L> {
    fn clone(&self) -> Self {
        Self {
            match_service: self.match_service.clone(),
        }
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<L: ModelLoader>(
        match_service: Arc<MatchService<L>>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let router = Self::router(match_service, config.max_body_bytes);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub fn router<L: ModelLoader>(
        match_service: Arc<MatchService<L>>,
        max_body_bytes: Option<usize>,
    ) -> Router {
        let app_state = SharedState { match_service };
        let body_limit = match max_body_bytes {
            Some(limit) => DefaultBodyLimit::max(limit),
            None => DefaultBodyLimit::disable(),
        };

        api_routes::<L>()
            .with_state(app_state)
            .layer(body_limit)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            })
            .await?;

        Ok(())
    }
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let loader = OrtModelLoader::new(config.model.intra_threads)?;
    let registry = ModelRegistry::new(loader, &config.model);

    let registry = if config.model.preload {
        tokio::task::spawn_blocking(move || {
            registry.preload();
            registry
        })
        .await?
    } else {
        registry
    };

    let match_service = Arc::new(MatchService::new(registry, config.scoring.clone()));
    let server = HttpServer::new(match_service, &config.server).await?;

    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
