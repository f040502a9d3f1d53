//! Built-in connector implementations: the ones that need only ordinary
//! Rust I/O (`timer`, `file`, `log`), a client already in the dependency
//! stack (`http`/`https` via `reqwest`), and placeholder registrations
//! for the transports this crate doesn't bundle (`rtsp`, `smtp`, `imap`).

use super::{ConnectorManager, Destination, Source};
use crate::duration::parse_duration_spec;
use crate::error::ConnectorError;
use crate::message::Message;
use crate::resolver::ResolvedUri;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub(super) fn register_builtin_connectors(manager: &ConnectorManager) {
    manager.register_source("timer", |uri| {
        let interval = parse_duration_spec(&uri.path, Duration::from_secs(1));
        Ok(Box::new(TimerSource::new(interval)) as Box<dyn Source>)
    });
    manager.register_source("file", |uri| {
        Ok(Box::new(FileSource::new(PathBuf::from(&uri.path))) as Box<dyn Source>)
    });
    manager.register_source("rtsp", |_uri| {
        Ok(Box::new(UnbundledTransport::new("rtsp")) as Box<dyn Source>)
    });

    manager.register_destination("http", |uri| {
        Ok(Box::new(HttpDestination::new(uri_to_url(uri, "http"))) as Box<dyn Destination>)
    });
    manager.register_destination("https", |uri| {
        Ok(Box::new(HttpDestination::new(uri_to_url(uri, "https"))) as Box<dyn Destination>)
    });
    manager.register_destination("log", |_uri| {
        Ok(Box::new(LogDestination) as Box<dyn Destination>)
    });
    manager.register_destination("file", |uri| {
        Ok(Box::new(FileDestination::new(PathBuf::from(&uri.path))) as Box<dyn Destination>)
    });
    manager.register_destination("smtp", |_uri| {
        Ok(Box::new(UnbundledTransport::new("smtp")) as Box<dyn Destination>)
    });
    manager.register_destination("imap", |_uri| {
        Ok(Box::new(UnbundledTransport::new("imap")) as Box<dyn Destination>)
    });
}

fn uri_to_url(uri: &ResolvedUri, scheme: &str) -> String {
    let netloc = uri.netloc.clone().unwrap_or_default();
    format!("{scheme}://{netloc}{}", uri.path)
}

/// Ticks a counter message on a fixed interval.
struct TimerSource {
    interval: tokio::time::Interval,
    tick: u64,
}

impl TimerSource {
    fn new(period: Duration) -> Self {
        Self {
            interval: tokio::time::interval(period.max(Duration::from_millis(1))),
            tick: 0,
        }
    }
}

#[async_trait]
impl Source for TimerSource {
    async fn receive(&mut self) -> Result<Option<Message>, ConnectorError> {
        self.interval.tick().await;
        self.tick += 1;
        Ok(Some(Message::new(serde_json::json!({"tick": self.tick}))))
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Tails a newline-delimited file, one message per line.
struct FileSource {
    path: PathBuf,
    lines: Option<tokio::io::Lines<BufReader<File>>>,
}

impl FileSource {
    fn new(path: PathBuf) -> Self {
        Self { path, lines: None }
    }

    async fn ensure_open(&mut self) -> Result<(), ConnectorError> {
        if self.lines.is_none() {
            let file = File::open(&self.path)
                .await
                .map_err(|e| ConnectorError::Permanent(format!("opening {:?}: {e}", self.path)))?;
            self.lines = Some(BufReader::new(file).lines());
        }
        Ok(())
    }
}

#[async_trait]
impl Source for FileSource {
    async fn open(&mut self) -> Result<(), ConnectorError> {
        self.ensure_open().await
    }

    async fn receive(&mut self) -> Result<Option<Message>, ConnectorError> {
        self.ensure_open().await?;
        let lines = self.lines.as_mut().expect("ensure_open populates lines");
        match lines
            .next_line()
            .await
            .map_err(|e| ConnectorError::Transient(e.to_string()))?
        {
            Some(line) => {
                let body = serde_json::from_str(&line)
                    .unwrap_or_else(|_| serde_json::Value::String(line));
                Ok(Some(Message::new(body)))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.lines = None;
        Ok(())
    }
}

/// Posts the message body as JSON to an HTTP(S) endpoint.
struct HttpDestination {
    url: String,
    client: reqwest::Client,
}

impl HttpDestination {
    fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn send(&mut self, message: &Message) -> Result<(), ConnectorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&message.body)
            .send()
            .await
            .map_err(|e| ConnectorError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(ConnectorError::Permanent(format!(
                "destination rejected message: {status}"
            )))
        } else {
            Err(ConnectorError::Transient(format!(
                "destination returned {status}"
            )))
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Logs each message at `info` level.
struct LogDestination;

#[async_trait]
impl Destination for LogDestination {
    async fn send(&mut self, message: &Message) -> Result<(), ConnectorError> {
        tracing::info!(body = %message.body, "message");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Appends each message as a JSON line to a file.
struct FileDestination {
    path: PathBuf,
    file: Option<File>,
}

impl FileDestination {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    async fn ensure_open(&mut self) -> Result<(), ConnectorError> {
        if self.file.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| ConnectorError::Permanent(format!("opening {:?}: {e}", self.path)))?;
            self.file = Some(file);
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for FileDestination {
    async fn open(&mut self) -> Result<(), ConnectorError> {
        self.ensure_open().await
    }

    async fn send(&mut self, message: &Message) -> Result<(), ConnectorError> {
        self.ensure_open().await?;
        let file = self.file.as_mut().expect("ensure_open populates file");
        let mut line = serde_json::to_string(&message.body)
            .map_err(|e| ConnectorError::Permanent(e.to_string()))?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ConnectorError::Transient(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        self.file = None;
        Ok(())
    }
}

/// Registered placeholder for a transport (RTSP capture, SMTP, IMAP)
/// this core crate doesn't bundle a client for. The scheme is real and
/// registered so unknown-scheme detection stays reserved for genuinely
/// unknown schemes; using it fails immediately and explicitly.
struct UnbundledTransport {
    transport: &'static str,
}

impl UnbundledTransport {
    fn new(transport: &'static str) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Source for UnbundledTransport {
    async fn receive(&mut self) -> Result<Option<Message>, ConnectorError> {
        Err(ConnectorError::Permanent(format!(
            "{} transport is not bundled in this core crate",
            self.transport
        )))
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[async_trait]
impl Destination for UnbundledTransport {
    async fn send(&mut self, _message: &Message) -> Result<(), ConnectorError> {
        Err(ConnectorError::Permanent(format!(
            "{} transport is not bundled in this core crate",
            self.transport
        )))
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_source_emits_incrementing_ticks() {
        let mut source = TimerSource::new(Duration::from_millis(1));
        let first = source.receive().await.unwrap().unwrap();
        let second = source.receive().await.unwrap().unwrap();
        assert_eq!(first.body["tick"], 1);
        assert_eq!(second.body["tick"], 2);
    }

    #[tokio::test]
    async fn file_source_yields_one_message_per_line_then_none() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(tmp, "{{\"a\":1}}").unwrap();
        writeln!(tmp, "plain text").unwrap();

        let mut source = FileSource::new(tmp.path().to_path_buf());
        let first = source.receive().await.unwrap().unwrap();
        assert_eq!(first.body, serde_json::json!({"a": 1}));
        let second = source.receive().await.unwrap().unwrap();
        assert_eq!(second.body, serde_json::json!("plain text"));
        assert!(source.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unbundled_transport_fails_permanently() {
        let mut rtsp = UnbundledTransport::new("rtsp");
        let err = rtsp.receive().await.unwrap_err();
        assert!(!err.is_transient());
    }
}
