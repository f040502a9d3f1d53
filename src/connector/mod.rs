//! Connector Manager: scheme-keyed registry of source and destination
//! constructors, plus the capability traits every connector implements.
//!
//! Mirrors `dialogchain.engine.connector.ConnectorManager` — a registry
//! built once (the built-in schemes) and open to runtime registration of
//! additional ones, with construction from either a bare URI string or
//! an already-resolved config.

mod builtin;

use crate::error::{ConfigurationError, ConnectorBuildError, ConnectorError};
use crate::message::Message;
use crate::resolver::{parse_uri, ResolvedUri};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// A connector that produces messages.
#[async_trait]
pub trait Source: Send + Sync {
    /// Establishes any underlying connection or watcher. Called once by
    /// the owning route before the first `receive`.
    async fn open(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Receives the next message, or `None` if the source is exhausted
    /// (e.g. end of file). Blocks (asynchronously) until one is ready.
    async fn receive(&mut self) -> Result<Option<Message>, ConnectorError>;

    /// Releases any resources held by the source. Idempotent.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}

/// A connector that consumes messages.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Establishes any underlying connection. Called once by the owning
    /// route before the first `send`.
    async fn open(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Sends one message. A transient failure (per
    /// [`ConnectorError::is_transient`]) is eligible for the route's
    /// retry policy; a permanent failure is not.
    async fn send(&mut self, message: &Message) -> Result<(), ConnectorError>;

    /// Releases any resources held by the destination. Idempotent.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}

type SourceCtor = Arc<dyn Fn(&ResolvedUri) -> Result<Box<dyn Source>, ConnectorError> + Send + Sync>;
type DestinationCtor =
    Arc<dyn Fn(&ResolvedUri) -> Result<Box<dyn Destination>, ConnectorError> + Send + Sync>;

/// Registry of source and destination constructors, keyed by URI scheme.
///
/// Registration is case-insensitive is not required here since schemes
/// are always lowercased by [`parse_uri`]; lookups key on the lowercased
/// scheme directly.
pub struct ConnectorManager {
    source_types: DashMap<String, SourceCtor>,
    destination_types: DashMap<String, DestinationCtor>,
}

impl std::fmt::Debug for ConnectorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorManager")
            .field("source_schemes", &self.get_source_schemes())
            .field("destination_schemes", &self.get_destination_schemes())
            .finish()
    }
}

impl Default for ConnectorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorManager {
    /// Builds a manager with the built-in schemes already registered.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self {
            source_types: DashMap::new(),
            destination_types: DashMap::new(),
        };
        builtin::register_builtin_connectors(&manager);
        manager
    }

    /// Registers (or overwrites) the constructor for a source scheme.
    pub fn register_source<F>(&self, scheme: impl Into<String>, ctor: F)
    where
        F: Fn(&ResolvedUri) -> Result<Box<dyn Source>, ConnectorError> + Send + Sync + 'static,
    {
        self.source_types.insert(scheme.into(), Arc::new(ctor));
    }

    /// Registers (or overwrites) the constructor for a destination scheme.
    pub fn register_destination<F>(&self, scheme: impl Into<String>, ctor: F)
    where
        F: Fn(&ResolvedUri) -> Result<Box<dyn Destination>, ConnectorError> + Send + Sync + 'static,
    {
        self.destination_types.insert(scheme.into(), Arc::new(ctor));
    }

    /// Constructs a source from a URI string.
    ///
    /// # Errors
    /// Returns [`ConnectorBuildError::Configuration`] if the URI fails to
    /// parse or its scheme has no registered source constructor (spec
    /// §7: unknown scheme is a `ConfigurationError`, fatal at startup);
    /// returns [`ConnectorBuildError::Connector`] if the registered
    /// constructor itself fails.
    pub fn create_source(&self, uri: &str) -> Result<Box<dyn Source>, ConnectorBuildError> {
        let resolved = parse_uri(uri)?;
        let ctor = self.source_types.get(&resolved.scheme).ok_or_else(|| {
            ConfigurationError::UnknownType {
                kind: "scheme",
                name: resolved.scheme.clone(),
            }
        })?;
        Ok(ctor(&resolved)?)
    }

    /// Constructs a destination from a URI string.
    ///
    /// # Errors
    /// Returns [`ConnectorBuildError::Configuration`] if the URI fails to
    /// parse or its scheme has no registered destination constructor;
    /// returns [`ConnectorBuildError::Connector`] if the registered
    /// constructor itself fails.
    pub fn create_destination(&self, uri: &str) -> Result<Box<dyn Destination>, ConnectorBuildError> {
        let resolved = parse_uri(uri)?;
        let ctor = self.destination_types.get(&resolved.scheme).ok_or_else(|| {
            ConfigurationError::UnknownType {
                kind: "scheme",
                name: resolved.scheme.clone(),
            }
        })?;
        Ok(ctor(&resolved)?)
    }

    /// Constructs a source from an already-resolved record rather than a
    /// raw URI string (spec §4.1/§4.2: "a config record already
    /// containing an explicit `type` or `scheme`"). `resolved.scheme`
    /// selects the constructor exactly as it would from a parsed URI.
    ///
    /// # Errors
    /// Returns [`ConnectorBuildError::Configuration`] if no source
    /// constructor is registered for `resolved.scheme`.
    pub fn create_source_from_record(
        &self,
        resolved: &ResolvedUri,
    ) -> Result<Box<dyn Source>, ConnectorBuildError> {
        let ctor = self.source_types.get(&resolved.scheme).ok_or_else(|| {
            ConfigurationError::UnknownType {
                kind: "scheme",
                name: resolved.scheme.clone(),
            }
        })?;
        Ok(ctor(resolved)?)
    }

    /// Constructs a destination from an already-resolved record. See
    /// [`ConnectorManager::create_source_from_record`].
    ///
    /// # Errors
    /// Returns [`ConnectorBuildError::Configuration`] if no destination
    /// constructor is registered for `resolved.scheme`.
    pub fn create_destination_from_record(
        &self,
        resolved: &ResolvedUri,
    ) -> Result<Box<dyn Destination>, ConnectorBuildError> {
        let ctor = self.destination_types.get(&resolved.scheme).ok_or_else(|| {
            ConfigurationError::UnknownType {
                kind: "scheme",
                name: resolved.scheme.clone(),
            }
        })?;
        Ok(ctor(resolved)?)
    }

    /// Releases any pool-level state held by the manager itself (as
    /// opposed to per-connector state, which each connector's own
    /// `close` releases). The base implementation is a no-op, per
    /// spec §4.2 — the registries hold only constructors, not live
    /// connections.
    pub fn close_all(&self) {}

    /// Returns the registered source schemes.
    #[must_use]
    pub fn get_source_schemes(&self) -> Vec<String> {
        self.source_types.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns the registered destination schemes.
    #[must_use]
    pub fn get_destination_schemes(&self) -> Vec<String> {
        self.destination_types
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_manager_registers_builtin_schemes() {
        let manager = ConnectorManager::new();
        assert!(manager.get_source_schemes().contains(&"timer".to_string()));
        assert!(manager.get_source_schemes().contains(&"file".to_string()));
        assert!(manager
            .get_destination_schemes()
            .contains(&"http".to_string()));
        assert!(manager
            .get_destination_schemes()
            .contains(&"log".to_string()));
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let manager = ConnectorManager::new();
        let err = manager.create_source("carrier-pigeon:nest").unwrap_err();
        assert!(matches!(err, ConnectorBuildError::Configuration(_)));
    }

    #[test]
    fn creates_source_from_resolved_record() {
        let manager = ConnectorManager::new();
        let resolved = parse_uri("timer:10ms").unwrap();
        assert!(manager.create_source_from_record(&resolved).is_ok());
    }

    #[test]
    fn close_all_is_idempotent_noop() {
        let manager = ConnectorManager::new();
        manager.close_all();
        manager.close_all();
    }

    #[test]
    fn registering_a_custom_scheme_makes_it_constructible() {
        let manager = ConnectorManager::new();
        manager.register_destination("noop", |_uri| {
            struct Noop;
            #[async_trait::async_trait]
            impl Destination for Noop {
                async fn send(&mut self, _message: &Message) -> Result<(), ConnectorError> {
                    Ok(())
                }
                async fn close(&mut self) -> Result<(), ConnectorError> {
                    Ok(())
                }
            }
            Ok(Box::new(Noop) as Box<dyn Destination>)
        });
        assert!(manager.create_destination("noop:anything").is_ok());
    }
}
