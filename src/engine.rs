//! Engine: owns the full set of routes, starts and stops them together,
//! and races shutdown against a configurable grace period — the
//! top-level supervisor a binary entry point drives end to end.

use crate::config::EngineConfig;
use crate::connector::ConnectorManager;
use crate::domain_types::ShutdownGraceMs;
use crate::error::EngineError;
use crate::message::ChainOutcome;
use crate::route::Route;
use crate::time_provider::SharedTimeProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Owns every configured route and the shared connector registry they
/// were built from.
pub struct Engine {
    routes: Vec<Arc<Route>>,
    connector_manager: Arc<ConnectorManager>,
    shutdown_grace: ShutdownGraceMs,
    running: AtomicBool,
}

impl Engine {
    /// Validates `config`, builds the connector registry, and constructs
    /// each enabled route. A route whose own construction fails (an
    /// unregistered connector scheme, an invalid processor config) is
    /// logged and skipped rather than aborting the whole engine — the
    /// other routes still start.
    ///
    /// # Errors
    /// Returns [`EngineError`] if the config document itself fails
    /// validation (bad route name, out-of-range field, unset required
    /// environment variable, out-of-range `shutdown_grace_ms`).
    pub fn from_config(
        config: &EngineConfig,
        time_provider: SharedTimeProvider,
    ) -> Result<Self, EngineError> {
        let (validated_routes, shutdown_grace) = config.validate()?;
        let connector_manager = Arc::new(ConnectorManager::new());

        let mut routes = Vec::with_capacity(validated_routes.len());
        for validated in &validated_routes {
            if !validated.enabled {
                tracing::info!(route = %validated.name, "route disabled, skipping");
                continue;
            }
            match Route::new(validated, Arc::clone(&connector_manager), time_provider.clone()) {
                Ok(route) => routes.push(route),
                Err(err) => {
                    tracing::error!(route = %validated.name, error = %err, "route construction failed, skipping");
                }
            }
        }

        Ok(Self {
            routes,
            connector_manager,
            shutdown_grace,
            running: AtomicBool::new(false),
        })
    }

    /// Starts every constructed route. Idempotent; a second call is a
    /// no-op. A route that fails to start is logged and left out of the
    /// running set rather than aborting the others.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("engine already running");
            return;
        }
        tracing::info!(routes = self.routes.len(), "starting engine");
        for route in &self.routes {
            if let Err(err) = route.start().await {
                tracing::error!(route = %route.name(), error = %err, "route failed to start");
            }
        }
    }

    /// Stops every route, racing each one's own `stop()` against the
    /// engine's shutdown grace period. A route that doesn't finish in
    /// time is logged and its task abandoned rather than awaited
    /// indefinitely. Routes are stopped in reverse start order. Closes
    /// the connector registry last. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping engine");
        for route in self.routes.iter().rev() {
            let grace = self.shutdown_grace.as_duration();
            match tokio::time::timeout(grace, route.stop()).await {
                Ok(()) => {}
                Err(_) => {
                    tracing::error!(
                        route = %route.name(),
                        grace_ms = ?grace,
                        "route did not stop within shutdown grace period, abandoning"
                    );
                }
            }
        }
        self.connector_manager.close_all();
    }

    /// Whether the engine's routes have been started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The number of routes the engine constructed (enabled routes that
    /// did not fail construction).
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Feeds `body` directly into the named route's chain and
    /// destination, bypassing that route's source — the HTTP/CLI
    /// one-shot injection path.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] if no route named
    /// `route_name` exists, or whatever error the chain/send produces.
    pub async fn process_message(
        &self,
        route_name: &str,
        body: serde_json::Value,
    ) -> Result<ChainOutcome, EngineError> {
        let route = self
            .routes
            .iter()
            .find(|route| route.name().clone().into_inner() == route_name)
            .ok_or_else(|| EngineError::Configuration {
                route: Some(route_name.to_string()),
                source: crate::error::ConfigurationError::UnknownType {
                    kind: "route",
                    name: route_name.to_string(),
                },
            })?;
        route.process_message(body).await
    }

    /// Spawns a task that waits for `SIGINT`/`SIGTERM` (or just `SIGINT`
    /// off unix) and calls `stop()` on receipt, returning its handle so
    /// a caller can simply await shutdown completion.
    pub fn spawn_signal_handler(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            tracing::info!("shutdown signal received");
            engine.stop().await;
        })
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler, watching only SIGINT");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
