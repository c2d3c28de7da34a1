//! Server-sent transcript stream
//!
//! Consumes `/get-transcription` as an SSE stream, one stream per
//! listening session. Keep-alive comments are discarded, events are
//! delivered in arrival order, and a stopping flag is checked before
//! every delivery so nothing reaches the consumer after `stop()`.
//! On transport error the stream never resurrects itself; it delivers a
//! single error signal and ends.

use crossbeam_channel::Sender;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One transcript update pushed by the backend. `transcript` is a
/// cumulative snapshot, not an increment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptEvent {
    pub transcript: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub is_meitei: Option<bool>,
}

/// Notifications delivered to the owning state machine
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptSignal {
    Event(TranscriptEvent),
    /// Stream ended normally (server stopped pushing)
    Closed,
    /// Mid-session transport failure; the owner transitions to idle
    TransportError(String),
}

/// Incremental SSE frame parser.
///
/// Events are blank-line delimited; `data:` lines within an event are
/// joined with newlines; comment lines (leading `:`, e.g. keep-alives)
/// and unknown fields are dropped.
#[derive(Default)]
pub struct SseParser {
    pending: String,
}

impl SseParser {
    /// Feed a chunk of the byte stream, returning any completed event payloads
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(boundary) = self.pending.find("\n\n") {
            let raw: String = self.pending.drain(..boundary + 2).collect();

            let mut data_lines = Vec::new();
            for line in raw.lines() {
                if line.starts_with(':') {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }

            if !data_lines.is_empty() {
                payloads.push(data_lines.join("\n"));
            }
        }

        payloads
    }
}

/// Handle to one open transcript stream
pub struct TranscriptStream {
    stopping: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TranscriptStream {
    /// Open the stream and start forwarding signals.
    /// Must be called from within a tokio runtime.
    pub fn open(
        http: reqwest::Client,
        url: String,
        signal_tx: Sender<TranscriptSignal>,
    ) -> Self {
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopping);

        let task = tokio::spawn(async move {
            info!("Opening transcript stream: {}", url);

            let response = match http.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    if !stop_flag.load(Ordering::SeqCst) {
                        let _ = signal_tx.send(TranscriptSignal::TransportError(e.to_string()));
                    }
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(item) = stream.next().await {
                if stop_flag.load(Ordering::SeqCst) {
                    debug!("Transcript stream stopped, discarding in-flight data");
                    return;
                }

                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        if !stop_flag.load(Ordering::SeqCst) {
                            let _ =
                                signal_tx.send(TranscriptSignal::TransportError(e.to_string()));
                        }
                        return;
                    }
                };

                for payload in parser.push(&String::from_utf8_lossy(&bytes)) {
                    // Re-check before every delivery: stop() may have
                    // raced with this in-flight event
                    if stop_flag.load(Ordering::SeqCst) {
                        return;
                    }

                    match serde_json::from_str::<TranscriptEvent>(&payload) {
                        Ok(event) => {
                            if signal_tx.send(TranscriptSignal::Event(event)).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Discarding malformed transcript event: {}", e),
                    }
                }
            }

            if !stop_flag.load(Ordering::SeqCst) {
                let _ = signal_tx.send(TranscriptSignal::Closed);
            }
        });

        Self {
            stopping,
            task: Some(task),
        }
    }

    /// Close the stream; no further signals reach the consumer. Idempotent.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Transcript stream closed");
        }
    }

    /// Whether `stop()` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl Drop for TranscriptStream {
    fn drop(&mut self) {
        self.stop();
    }
}
