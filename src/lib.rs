//! Tributary: a lightweight, concurrently-supervised integration engine.
//!
//! Messages move from configurable **sources** through an ordered chain
//! of **processors** to a **destination**. Each route is an independent
//! pipeline with its own lifecycle, retry policy, timeout, and error
//! handlers; the [`Engine`](engine::Engine) runs many routes
//! concurrently inside one process.
//!
//! ## Layout
//!
//! - [`resolver`] — URI grammar and `${NAME}`/`{{NAME}}` environment
//!   interpolation.
//! - [`connector`] — the source/destination capability traits and the
//!   scheme registry (`timer`, `file`, `http(s)`, `log`, plus stubbed
//!   `rtsp`/`smtp`/`imap`).
//! - [`processor`] — the chain factory (`transform`, `filter`,
//!   `external`, `aggregate`, `debug`).
//! - [`route`] — one source → chain → destination pipeline, supervised
//!   by its own task.
//! - [`engine`] — owns every route, starts/stops them together, and
//!   races shutdown against a grace period.
//! - [`config`] — the YAML/JSON document schema and its validation.
//! - [`error`] — the crate-wide error taxonomy and CLI exit codes.
//! - [`time_provider`] — the sleep/timeout abstraction tests substitute
//!   a mock for.

pub mod config;
pub mod connector;
pub mod domain_types;
pub mod duration;
pub mod engine;
pub mod error;
pub mod message;
pub mod processor;
pub mod resolver;
pub mod route;
pub mod time_provider;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use message::{ChainOutcome, Message};
