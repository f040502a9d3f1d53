//! Route: one source → processor chain → destination pipeline, with its
//! own retry policy, timeout, and error handlers, supervised by a single
//! background task — the same `tokio::spawn` + atomic-running-flag shape
//! the message-routing component family uses for its worker tasks.

use crate::config::{ErrorHandlerConfig, ValidatedRoute};
use crate::connector::{ConnectorManager, Destination, Source};
use crate::domain_types::{RetryAttempts, RetryDelaySecs, RouteName, TimeoutSecs};
use crate::error::{ConnectorBuildError, ConnectorError, EngineError, ProcessorBuildError};
use crate::message::{ChainOutcome, Message};
use crate::processor::{create_processor, Processor, ProcessorContext};
use crate::time_provider::SharedTimeProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// One source → chain → destination pipeline.
pub struct Route {
    name: RouteName,
    source: Mutex<Box<dyn Source>>,
    destination: Mutex<Box<dyn Destination>>,
    processors: Vec<Arc<dyn Processor>>,
    connector_manager: Arc<ConnectorManager>,
    retry_attempts: RetryAttempts,
    retry_delay: RetryDelaySecs,
    timeout: Option<TimeoutSecs>,
    error_handlers: Vec<ErrorHandlerConfig>,
    time_provider: SharedTimeProvider,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    reinject_tx: mpsc::UnboundedSender<(usize, Message)>,
    reinject_rx: Mutex<Option<mpsc::UnboundedReceiver<(usize, Message)>>>,
}

impl Route {
    /// Builds a route from its validated config: resolves the source and
    /// destination through `connector_manager`, then builds the
    /// processor chain, handing each processor the reinject channel and
    /// time provider it needs for asynchronously emitted output.
    ///
    /// # Errors
    /// Returns [`EngineError::Configuration`] if the source/destination
    /// scheme or a processor's `type` names no registered constructor
    /// (spec §7: unknown scheme/processor type is a `ConfigurationError`,
    /// fatal at startup); returns [`EngineError::Connector`] or
    /// [`EngineError::Processor`] if a registered constructor itself
    /// fails.
    pub fn new(
        config: &ValidatedRoute,
        connector_manager: Arc<ConnectorManager>,
        time_provider: SharedTimeProvider,
    ) -> Result<Arc<Self>, EngineError> {
        let route_name = config.name.clone().into_inner();

        let source = connector_manager
            .create_source(&config.from)
            .map_err(|err| connector_build_error(&route_name, err))?;
        let destination = connector_manager
            .create_destination(&config.to)
            .map_err(|err| connector_build_error(&route_name, err))?;

        let (reinject_tx, reinject_rx) = mpsc::unbounded_channel();
        let mut processors: Vec<Arc<dyn Processor>> = Vec::with_capacity(config.processors.len());
        for (index, processor_config) in config.processors.iter().enumerate() {
            let ctx = ProcessorContext {
                index,
                reinject: reinject_tx.clone(),
                time_provider: time_provider.clone(),
            };
            let processor = create_processor(processor_config, &ctx)
                .map_err(|err| processor_build_error(&route_name, err))?;
            processors.push(processor);
        }

        Ok(Arc::new(Self {
            name: config.name.clone(),
            source: Mutex::new(source),
            destination: Mutex::new(destination),
            processors,
            connector_manager,
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
            timeout: config.timeout,
            error_handlers: config.error_handlers.clone(),
            time_provider,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            reinject_tx,
            reinject_rx: Mutex::new(Some(reinject_rx)),
        }))
    }

    /// This route's name.
    #[must_use]
    pub fn name(&self) -> &RouteName {
        &self.name
    }

    /// Whether the route's supervisory task is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Opens the source and destination, then spawns the supervisory
    /// task that runs the pipeline loop. Idempotent: a second call on an
    /// already-running route is a no-op.
    ///
    /// # Errors
    /// Returns [`EngineError::Connector`] if opening the source or
    /// destination fails.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(route = %self.name, "route already running");
            return Ok(());
        }

        tracing::info!(route = %self.name, "starting route");

        self.source
            .lock()
            .await
            .open()
            .await
            .map_err(|source| EngineError::Connector {
                route: self.name.clone().into_inner(),
                source,
            })?;
        self.destination
            .lock()
            .await
            .open()
            .await
            .map_err(|source| EngineError::Connector {
                route: self.name.clone().into_inner(),
                source,
            })?;

        let reinject_rx = self.reinject_rx.lock().await.take().ok_or_else(|| {
            EngineError::Connector {
                route: self.name.clone().into_inner(),
                source: ConnectorError::Lifecycle("route already started".to_string()),
            }
        })?;

        let this = Arc::clone(self);
        let span = tracing::info_span!("route", name = %self.name);
        let handle = tokio::spawn(async move { this.run(reinject_rx).await }.instrument(span));
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// The pipeline loop: `receive → chain → send`, plus any
    /// asynchronously reinjected output (aggregate timer flushes)
    /// re-entering the chain past the processor that produced it.
    async fn run(self: Arc<Self>, mut reinject_rx: mpsc::UnboundedReceiver<(usize, Message)>) {
        tracing::info!("route loop starting");
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                biased;
                Some((index, message)) = reinject_rx.recv() => {
                    self.run_from(index, message).await;
                }
                result = self.safe_receive() => {
                    match result {
                        Ok(None) => continue,
                        Ok(Some(message)) => self.run_from(0, message).await,
                        Err(err) => self.handle_error(&err, None).await,
                    }
                }
            }
        }
        tracing::info!("route loop exiting");
    }

    /// Runs `message` through the chain starting at `index`, sending the
    /// result if one survives, dispatching to the error handlers on
    /// failure.
    async fn run_from(&self, index: usize, message: Message) {
        let original = message.clone();
        match self.apply_chain_from(index, message).await {
            Ok(ChainOutcome::Forward(out)) => {
                if let Err(err) = self.safe_send(&out).await {
                    self.handle_error(&err, Some(&original)).await;
                }
            }
            Ok(ChainOutcome::Drop) => {}
            Err(err) => self.handle_error(&err, Some(&original)).await,
        }
    }

    /// Wraps the source's `receive` with the route's timeout, retrying
    /// up to `retry_attempts` with `retry_delay` between tries.
    async fn safe_receive(&self) -> Result<Option<Message>, EngineError> {
        let attempts = self.retry_attempts.into_inner();
        for attempt in 0..=attempts {
            let outcome = {
                let mut source = self.source.lock().await;
                match self.timeout {
                    Some(timeout) => tokio::time::timeout(timeout.as_duration(), source.receive())
                        .await
                        .map_err(|_| None),
                    None => Ok(source.receive().await),
                }
            };
            match outcome {
                Ok(Ok(message)) => return Ok(message),
                Ok(Err(source_error)) => {
                    if attempt == attempts {
                        return Err(EngineError::Connector {
                            route: self.name.clone().into_inner(),
                            source: source_error,
                        });
                    }
                    tracing::warn!(route = %self.name, attempt, error = %source_error, "error receiving from source, retrying");
                }
                Err(None) => {
                    if attempt == attempts {
                        return Err(EngineError::Timeout {
                            route: self.name.clone().into_inner(),
                            attempts: attempt + 1,
                        });
                    }
                    tracing::warn!(route = %self.name, attempt, "timeout receiving from source, retrying");
                }
            }
            self.time_provider.sleep(self.retry_delay.as_duration()).await;
        }
        Ok(None)
    }

    /// Wraps the destination's `send` with the route's timeout, retrying
    /// up to `retry_attempts` with `retry_delay` between tries.
    async fn safe_send(&self, message: &Message) -> Result<(), EngineError> {
        let attempts = self.retry_attempts.into_inner();
        for attempt in 0..=attempts {
            let outcome = {
                let mut destination = self.destination.lock().await;
                match self.timeout {
                    Some(timeout) => {
                        tokio::time::timeout(timeout.as_duration(), destination.send(message))
                            .await
                            .map_err(|_| None)
                    }
                    None => Ok(destination.send(message).await),
                }
            };
            match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(send_error)) => {
                    if attempt == attempts {
                        return Err(EngineError::Connector {
                            route: self.name.clone().into_inner(),
                            source: send_error,
                        });
                    }
                    tracing::warn!(route = %self.name, attempt, error = %send_error, "error sending to destination, retrying");
                }
                Err(None) => {
                    if attempt == attempts {
                        return Err(EngineError::Timeout {
                            route: self.name.clone().into_inner(),
                            attempts: attempt + 1,
                        });
                    }
                    tracing::warn!(route = %self.name, attempt, "timeout sending to destination, retrying");
                }
            }
            self.time_provider.sleep(self.retry_delay.as_duration()).await;
        }
        Ok(())
    }

    /// Runs the full chain from the start.
    async fn apply_chain(&self, message: Message) -> Result<ChainOutcome, EngineError> {
        self.apply_chain_from(0, message).await
    }

    /// Runs the chain starting at `index`; the first processor to
    /// return *drop* ends the chain.
    async fn apply_chain_from(
        &self,
        index: usize,
        message: Message,
    ) -> Result<ChainOutcome, EngineError> {
        let mut current = message;
        for processor in &self.processors[index.min(self.processors.len())..] {
            match processor.process(current).await {
                Ok(ChainOutcome::Forward(next)) => current = next,
                Ok(ChainOutcome::Drop) => return Ok(ChainOutcome::Drop),
                Err(source) => {
                    return Err(EngineError::Processor {
                        route: self.name.clone().into_inner(),
                        source,
                    })
                }
            }
        }
        Ok(ChainOutcome::Forward(current))
    }

    /// Iterates `error_handlers` in declaration order. `log` handlers
    /// always run and fall through to the next handler; `retry` and
    /// `fallback` stop the list on success.
    async fn handle_error(&self, error: &EngineError, message: Option<&Message>) {
        tracing::error!(route = %self.name, error = %error, "route error");
        for handler in &self.error_handlers {
            match handler {
                ErrorHandlerConfig::Log { message: template } => {
                    let rendered = render_log_template(template.as_deref(), &self.name, error, message);
                    tracing::error!(route = %self.name, "{rendered}");
                }
                ErrorHandlerConfig::Retry { max_attempts, delay } => {
                    let Some(original) = message else {
                        tracing::warn!(route = %self.name, "retry handler has no message to retry");
                        continue;
                    };
                    if self.retry_handler(*max_attempts, *delay, original).await {
                        return;
                    }
                }
                ErrorHandlerConfig::Fallback { destination } => {
                    let Some(original) = message else {
                        tracing::warn!(route = %self.name, "fallback handler has no message to send");
                        continue;
                    };
                    if self.fallback_handler(destination, original).await {
                        return;
                    }
                }
            }
        }
    }

    /// Re-runs `apply_chain` + `safe_send` up to `max_attempts` times,
    /// sleeping `delay` between tries. A chain `Drop` on a retry attempt
    /// keeps retrying rather than counting as success — it means the
    /// retried run hit a filter or an aggregate buffering it, not that
    /// the original failure was resolved.
    async fn retry_handler(&self, max_attempts: u32, delay: f64, original: &Message) -> bool {
        let delay = Duration::from_secs_f64(delay.max(0.0));
        for attempt in 1..=max_attempts {
            tracing::warn!(route = %self.name, attempt, max_attempts, "retrying after error");
            match self.apply_chain(original.clone()).await {
                Ok(ChainOutcome::Drop) => {
                    tracing::warn!(route = %self.name, attempt, "retry attempt dropped the message, retrying");
                }
                Ok(ChainOutcome::Forward(out)) => match self.safe_send(&out).await {
                    Ok(()) => return true,
                    Err(err) => tracing::warn!(route = %self.name, attempt, error = %err, "retry send failed"),
                },
                Err(err) => tracing::warn!(route = %self.name, attempt, error = %err, "retry chain failed"),
            }
            self.time_provider.sleep(delay).await;
        }
        tracing::error!(route = %self.name, max_attempts, "max retries exceeded");
        false
    }

    async fn fallback_handler(&self, destination: &str, original: &Message) -> bool {
        let mut fallback = match self.connector_manager.create_destination(destination) {
            Ok(fallback) => fallback,
            Err(err) => {
                tracing::warn!(route = %self.name, error = %err, "fallback destination construction failed");
                return false;
            }
        };
        if let Err(err) = fallback.open().await {
            tracing::warn!(route = %self.name, error = %err, "fallback destination open failed");
            return false;
        }
        let sent = fallback.send(original).await;
        if let Err(err) = fallback.close().await {
            tracing::warn!(route = %self.name, error = %err, "fallback destination close failed");
        }
        match sent {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(route = %self.name, error = %err, "fallback send failed");
                false
            }
        }
    }

    /// Feeds `body` directly into the chain and destination, bypassing
    /// the source. Used by [`crate::engine::Engine::process_message`].
    ///
    /// # Errors
    /// Returns whatever [`EngineError`] the chain or send produces.
    pub async fn process_message(
        &self,
        body: serde_json::Value,
    ) -> Result<ChainOutcome, EngineError> {
        let message = Message::new(body);
        match self.apply_chain(message).await? {
            ChainOutcome::Forward(out) => {
                self.safe_send(&out).await?;
                Ok(ChainOutcome::Forward(out))
            }
            ChainOutcome::Drop => Ok(ChainOutcome::Drop),
        }
    }

    /// Stops the route: cancels the supervisory task and awaits it,
    /// drains any processor with pending buffered output (Aggregate)
    /// through the remaining chain and destination, then closes the
    /// destination and source. Idempotent; each close error is logged,
    /// not propagated.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(route = %self.name, "stopping route");

        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => tracing::warn!(route = %self.name, error = %err, "route task ended abnormally"),
            }
        }

        for (index, processor) in self.processors.iter().enumerate() {
            if let Some(pending) = processor.close().await {
                match self.apply_chain_from(index + 1, pending).await {
                    Ok(ChainOutcome::Forward(out)) => {
                        if let Err(err) = self.safe_send(&out).await {
                            tracing::warn!(route = %self.name, error = %err, "failed to flush pending output on shutdown");
                        }
                    }
                    Ok(ChainOutcome::Drop) => {}
                    Err(err) => tracing::warn!(route = %self.name, error = %err, "error draining chain on shutdown"),
                }
            }
        }

        if let Err(err) = self.destination.lock().await.close().await {
            tracing::warn!(route = %self.name, error = %err, "error closing destination");
        }
        if let Err(err) = self.source.lock().await.close().await {
            tracing::warn!(route = %self.name, error = %err, "error closing source");
        }
    }
}

/// Maps a connector-build failure onto the right `EngineError` variant:
/// an unregistered scheme is a `Configuration` error (exit code 2, per
/// spec §6/§7), while a registered constructor's own failure stays a
/// `Connector` error (exit code 4).
fn connector_build_error(route: &str, err: ConnectorBuildError) -> EngineError {
    match err {
        ConnectorBuildError::Configuration(source) => EngineError::Configuration {
            route: Some(route.to_string()),
            source,
        },
        ConnectorBuildError::Connector(source) => EngineError::Connector {
            route: route.to_string(),
            source,
        },
    }
}

/// Maps a processor-build failure onto the right `EngineError` variant,
/// analogous to [`connector_build_error`].
fn processor_build_error(route: &str, err: ProcessorBuildError) -> EngineError {
    match err {
        ProcessorBuildError::Configuration(source) => EngineError::Configuration {
            route: Some(route.to_string()),
            source,
        },
        ProcessorBuildError::Processor(source) => EngineError::Processor {
            route: route.to_string(),
            source,
        },
    }
}

fn render_log_template(
    template: Option<&str>,
    route: &RouteName,
    error: &EngineError,
    message: Option<&Message>,
) -> String {
    let template = template.unwrap_or("error on route {route_name}: {error}");
    let message_text = message.map(|m| m.body.to_string()).unwrap_or_default();
    template
        .replace("{route_name}", &route.to_string())
        .replace("{error}", &error.to_string())
        .replace("{message}", &message_text)
}
