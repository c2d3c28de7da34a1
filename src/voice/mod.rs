//! Voice mode state machine
//!
//! Coordinates Idle/Listening/Speaking so that at most one capture
//! session and one playback exist at any time. Owns the audio context
//! resources exclusively: no other component opens or closes them.

use crate::audio::AudioFrame;
use crate::backend::{BackendClient, TranscriptSignal, TranscriptStream, VoiceInputStatus};
use crate::chat::ChatController;
use crate::config::Config;
use crate::messages::MessageStorage;
use crate::utils::SessionChannels;
use crate::viz::{VizHandle, VizSample, VizSource, Visualizer};
use crate::{Result, VoxError};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "audio-io")]
use crate::audio::{CaptureManager, CaptureSession, ChunkSink, Playback, Recorder, RecordingHandle};
#[cfg(feature = "audio-io")]
use crate::backend::TranscriptEvent;

/// Current activity of the voice pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
    Speaking,
}

/// Notifications for the front-end
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    ListeningStarted,
    ListeningStopped,
    /// The pending input buffer changed (live transcript snapshot)
    PendingTranscript(String),
    SpeakingStarted,
    SpeakingFinished,
    MuteChanged(bool),
    Error(String),
}

/// Accumulated transcript text awaiting finalization.
///
/// Transcript events carry cumulative snapshots, so each update
/// overwrites rather than appends.
#[derive(Debug, Default, Clone)]
pub struct PendingTranscript {
    text: String,
}

impl PendingTranscript {
    /// Replace the buffer with the latest snapshot (last write wins)
    pub fn overwrite(&mut self, snapshot: &str) {
        self.text.clear();
        self.text.push_str(snapshot);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Take the finalized text, or `None` if nothing usable accumulated
    pub fn take(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.text);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

pub struct VoiceMode {
    state: VoiceState,
    backend: BackendClient,
    chat: ChatController<BackendClient>,
    config: Config,
    pending: PendingTranscript,

    /// Bumped on every stop; stale async completions check it
    generation: Arc<AtomicU64>,

    #[cfg(feature = "audio-io")]
    session: Option<CaptureSession>,
    #[cfg(feature = "audio-io")]
    recorder: Option<RecordingHandle>,
    #[cfg(feature = "audio-io")]
    playback: Option<Playback>,

    transcript: Option<TranscriptStream>,
    viz: Option<VizHandle>,
    signal_rx: Option<Receiver<TranscriptSignal>>,
    viz_rx: Option<Receiver<VizSample>>,
    last_visual: Option<VizSample>,

    event_tx: Sender<VoiceEvent>,
}

impl VoiceMode {
    /// Create the state machine and the event stream the front-end drains
    pub fn new(backend: BackendClient, messages: MessageStorage, config: Config) -> (Self, Receiver<VoiceEvent>) {
        let (event_tx, event_rx) = bounded(100);
        let chat = ChatController::new(backend.clone(), messages, config.speak_policy);

        let mode = Self {
            state: VoiceState::Idle,
            backend,
            chat,
            config,
            pending: PendingTranscript::default(),
            generation: Arc::new(AtomicU64::new(0)),
            #[cfg(feature = "audio-io")]
            session: None,
            #[cfg(feature = "audio-io")]
            recorder: None,
            #[cfg(feature = "audio-io")]
            playback: None,
            transcript: None,
            viz: None,
            signal_rx: None,
            viz_rx: None,
            last_visual: None,
            event_tx,
        };

        (mode, event_rx)
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn chat(&self) -> &ChatController<BackendClient> {
        &self.chat
    }

    /// Most recent visualization sample, if the visualizer is running
    pub fn last_visual(&self) -> Option<VizSample> {
        self.last_visual
    }

    /// Text accumulated from transcript snapshots so far
    pub fn pending_transcript(&self) -> &str {
        self.pending.as_str()
    }

    /// Send typed text through the chat controller, speaking the reply
    /// if the configured policy says so.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        let result = self.chat.send(text).await;
        if let crate::chat::SendResult::Delivered { response } = result {
            if self.chat.should_speak() {
                self.speak(&response).await?;
            }
        }
        Ok(())
    }

    /// `Idle -> Listening`. Restarting while already listening first
    /// fully tears down the previous session; on failure every
    /// partially-opened resource is released, including the server-side
    /// voice-input toggle, and the state stays Idle.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != VoiceState::Idle {
            self.stop().await?;
        }

        match self.backend.toggle_voice_input().await? {
            VoiceInputStatus::Started => {}
            VoiceInputStatus::Stopped => {
                // The toggle found the server already on and flipped it
                // off; flip once more to actually start
                if self.backend.toggle_voice_input().await? != VoiceInputStatus::Started {
                    return Err(VoxError::Backend(
                        "Voice input did not start".to_string(),
                    ));
                }
            }
        }

        if let Err(e) = self.open_session() {
            self.teardown_listening();
            // The server-side toggle is on with no client consuming;
            // flip it back off before reporting
            if self.backend.toggle_voice_input().await.is_err() {
                warn!("Failed to flip backend voice input off");
            }
            let _ = self.event_tx.try_send(VoiceEvent::Error(e.user_message()));
            self.chat.append_error(&e);
            return Err(e);
        }

        self.state = VoiceState::Listening;
        let _ = self.event_tx.try_send(VoiceEvent::ListeningStarted);
        info!("Voice mode: listening");
        Ok(())
    }

    fn open_session(&mut self) -> Result<()> {
        self.config.validate().map_err(VoxError::Config)?;

        let SessionChannels {
            frame_tx,
            frame_rx,
            signal_tx,
            signal_rx,
            viz_tx,
            viz_rx,
        } = SessionChannels::new();

        self.signal_rx = Some(signal_rx);

        let viz_source = self.open_capture(signal_tx.clone(), frame_tx, frame_rx)?;

        self.transcript = Some(TranscriptStream::open(
            self.backend.http(),
            self.backend.url("/get-transcription"),
            signal_tx,
        ));

        self.viz = Some(Visualizer::start(
            viz_source,
            self.config.fft_size,
            Duration::from_millis(self.config.viz_tick_ms),
            viz_tx,
        ));
        self.viz_rx = Some(viz_rx);
        self.pending.clear();

        Ok(())
    }

    #[cfg(feature = "audio-io")]
    fn open_capture(
        &mut self,
        signal_tx: Sender<TranscriptSignal>,
        frame_tx: Sender<AudioFrame>,
        frame_rx: Receiver<AudioFrame>,
    ) -> Result<VizSource> {
        if !self.config.enable_audio_input || self.config.simulate_audio {
            return Ok(VizSource::Simulated);
        }

        let session = CaptureManager::open(self.config.frame_size, frame_tx)?;

        let sink = TranscribeSink {
            backend: self.backend.clone(),
            runtime: tokio::runtime::Handle::current(),
            signal_tx,
            generation: Arc::clone(&self.generation),
            opened_at: self.generation.load(Ordering::SeqCst),
        };

        self.recorder = Some(Recorder::start(
            frame_rx,
            session.sample_rate(),
            Duration::from_millis(self.config.chunk_interval_ms),
            sink,
        ));

        let source = VizSource::Live {
            tap: session.tap(),
            live: session.live_flag(),
        };
        self.session = Some(session);
        Ok(source)
    }

    #[cfg(not(feature = "audio-io"))]
    fn open_capture(
        &mut self,
        _signal_tx: Sender<TranscriptSignal>,
        _frame_tx: Sender<AudioFrame>,
        _frame_rx: Receiver<AudioFrame>,
    ) -> Result<VizSource> {
        if self.config.simulate_audio {
            Ok(VizSource::Simulated)
        } else {
            Err(VoxError::DeviceUnavailable(
                "Built without audio support".to_string(),
            ))
        }
    }

    /// `Listening -> Idle`. Synchronously stops the recorder, closes
    /// the transcript stream and capture session, then hands any
    /// accumulated transcript to the chat controller as a finalized
    /// send. An empty pending buffer sends nothing.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop_playback();

        if let Some(text) = self.finish_listening().await {
            info!("Finalizing transcript: {} chars", text.len());
            self.send_text(&text).await?;
        }

        Ok(())
    }

    /// Tear down the listening side and return any finalized transcript.
    /// Does not send anything itself, so callers decide how the text is
    /// dispatched without re-entering the state machine.
    async fn finish_listening(&mut self) -> Option<String> {
        let was_listening = self.state == VoiceState::Listening;

        self.teardown_listening();
        self.state = VoiceState::Idle;

        if !was_listening {
            return None;
        }

        if self.backend.toggle_voice_input().await.is_err() {
            warn!("Failed to flip backend voice input off");
        }

        let _ = self.event_tx.try_send(VoiceEvent::ListeningStopped);
        info!("Voice mode: idle");

        let text = self.pending.take();
        if text.is_none() {
            debug!("No transcript accumulated, nothing to send");
        }
        text
    }

    /// `Idle/Listening -> Speaking`: synthesize and play a response.
    /// Listening is forced off first; mic and speaker do not share a
    /// graph branch here.
    pub async fn speak(&mut self, text: &str) -> Result<()> {
        if self.state == VoiceState::Listening {
            // Any transcript finalized by the preemption goes out as a
            // plain send; its reply is not spoken over the new clip
            if let Some(finalized) = self.finish_listening().await {
                self.chat.send(&finalized).await;
            }
        }
        self.stop_playback();

        if !self.config.enable_audio_output {
            debug!("Audio output disabled, skipping speech");
            return Ok(());
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let audio = match self.backend.speak(text).await {
            Ok(audio) => audio,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };

        // A stop() during the fetch invalidates this response
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding stale TTS response");
            return Ok(());
        }

        self.begin_playback(audio)
    }

    #[cfg(feature = "audio-io")]
    fn begin_playback(&mut self, audio: Vec<u8>) -> Result<()> {
        match Playback::play_wav_bytes(&audio) {
            Ok(playback) => {
                self.playback = Some(playback);
                self.state = VoiceState::Speaking;
                let _ = self.event_tx.try_send(VoiceEvent::SpeakingStarted);
                Ok(())
            }
            Err(e) => {
                self.report_failure(&e);
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "audio-io"))]
    fn begin_playback(&mut self, _audio: Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Mute or unmute the captured track without tearing the session
    /// down; the visualizer keeps running on silent input. Returns the
    /// new muted state, or `None` when not listening.
    pub fn toggle_mute(&mut self) -> Option<bool> {
        #[cfg(feature = "audio-io")]
        if let Some(session) = &self.session {
            let muted = !session.is_muted();
            session.set_muted(muted);
            let _ = self.event_tx.try_send(VoiceEvent::MuteChanged(muted));
            return Some(muted);
        }
        None
    }

    /// Drive the machine: apply transcript signals, watch for device
    /// loss and playback completion, refresh the latest visual sample.
    /// Called once per front-end loop turn.
    pub async fn pump(&mut self) -> Result<()> {
        #[cfg(feature = "audio-io")]
        {
            let device_lost = self.session.as_ref().and_then(|s| s.poll_device_lost());
            if let Some(e) = device_lost {
                self.force_idle(e).await;
                return Ok(());
            }

            let finished = self.playback.as_ref().map(|p| p.poll_finished()).unwrap_or(false);
            if finished {
                self.playback = None;
                self.state = VoiceState::Idle;
                let _ = self.event_tx.try_send(VoiceEvent::SpeakingFinished);
                info!("Playback ended");
            }
        }

        if let Some(viz_rx) = &self.viz_rx {
            while let Ok(sample) = viz_rx.try_recv() {
                self.last_visual = Some(sample);
            }
        }

        let signals: Vec<TranscriptSignal> = match &self.signal_rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        };

        for signal in signals {
            self.apply_signal(signal).await?;
        }

        Ok(())
    }

    /// Apply one transcript signal to the pending buffer / message list
    async fn apply_signal(&mut self, signal: TranscriptSignal) -> Result<()> {
        if self.state != VoiceState::Listening {
            debug!("Discarding transcript signal outside listening state");
            return Ok(());
        }

        match signal {
            TranscriptSignal::Event(event) => {
                match event.response {
                    Some(response) => {
                        // The backend already produced a reply for this
                        // utterance: append the pair and clear the buffer
                        self.chat.append_exchange(
                            &event.transcript,
                            &response,
                            event.is_meitei.unwrap_or(false),
                        );
                        self.pending.clear();
                        let _ = self
                            .event_tx
                            .try_send(VoiceEvent::PendingTranscript(String::new()));
                    }
                    None => {
                        self.pending.overwrite(&event.transcript);
                        let _ = self.event_tx.try_send(VoiceEvent::PendingTranscript(
                            self.pending.as_str().to_string(),
                        ));
                    }
                }
                Ok(())
            }
            TranscriptSignal::Closed => {
                debug!("Transcript stream closed by server");
                self.stop().await
            }
            TranscriptSignal::TransportError(message) => {
                self.force_idle(VoxError::StreamTransport(message)).await;
                Ok(())
            }
        }
    }

    /// Unrecoverable failure: release everything, report, go Idle
    async fn force_idle(&mut self, error: VoxError) {
        warn!("Forcing idle: {}", error);
        self.teardown_listening();
        self.stop_playback();
        self.state = VoiceState::Idle;
        self.pending.clear();

        let _ = self.backend.toggle_voice_input().await;

        self.chat.append_error(&error);
        let _ = self.event_tx.try_send(VoiceEvent::Error(error.user_message()));
    }

    fn report_failure(&mut self, error: &VoxError) {
        self.chat.append_error(error);
        let _ = self.event_tx.try_send(VoiceEvent::Error(error.user_message()));
    }

    /// Release every listening-side resource. Safe to call repeatedly;
    /// bumps the generation so stale async completions are discarded.
    fn teardown_listening(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        #[cfg(feature = "audio-io")]
        {
            if let Some(mut recorder) = self.recorder.take() {
                recorder.stop();
            }
            if let Some(mut session) = self.session.take() {
                session.close();
            }
        }

        if let Some(mut transcript) = self.transcript.take() {
            transcript.stop();
        }
        if let Some(mut viz) = self.viz.take() {
            viz.cancel();
        }

        self.signal_rx = None;
        self.viz_rx = None;
        self.last_visual = None;
    }

    fn stop_playback(&mut self) {
        #[cfg(feature = "audio-io")]
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
            let _ = self.event_tx.try_send(VoiceEvent::SpeakingFinished);
        }
    }
}

/// Streams recorder chunks to `/transcribe`, feeding replies back into
/// the pending-transcript path. Completions for a torn-down session are
/// discarded by the generation check.
#[cfg(feature = "audio-io")]
struct TranscribeSink {
    backend: BackendClient,
    runtime: tokio::runtime::Handle,
    signal_tx: Sender<TranscriptSignal>,
    generation: Arc<AtomicU64>,
    opened_at: u64,
}

#[cfg(feature = "audio-io")]
impl ChunkSink for TranscribeSink {
    fn on_chunk(&mut self, chunk: &[u8]) {
        let backend = self.backend.clone();
        let signal_tx = self.signal_tx.clone();
        let generation = Arc::clone(&self.generation);
        let opened_at = self.opened_at;
        let audio = chunk.to_vec();

        self.runtime.spawn(async move {
            match backend.transcribe(audio, "audio/wav").await {
                Ok(transcript) => {
                    if generation.load(Ordering::SeqCst) != opened_at {
                        debug!("Discarding transcription for a closed session");
                        return;
                    }
                    if !transcript.trim().is_empty() {
                        let _ = signal_tx.send(TranscriptSignal::Event(TranscriptEvent {
                            transcript,
                            response: None,
                            is_final: false,
                            is_meitei: None,
                        }));
                    }
                }
                Err(e) => debug!("Chunk transcription failed: {}", e),
            }
        });
    }

    fn on_finalize(&mut self, chunks: Vec<Vec<u8>>) {
        debug!("Recording finalized with {} chunks", chunks.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_overwrites_not_appends() {
        let mut pending = PendingTranscript::default();

        pending.overwrite("partial");
        pending.overwrite("partial two");
        pending.overwrite("final text");

        assert_eq!(pending.as_str(), "final text");
    }

    #[test]
    fn test_pending_take_rejects_whitespace() {
        let mut pending = PendingTranscript::default();
        assert_eq!(pending.take(), None);

        pending.overwrite("   \n ");
        assert_eq!(pending.take(), None);

        pending.overwrite("  hello  ");
        assert_eq!(pending.take(), Some("hello".to_string()));
        // Taking clears the buffer
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_new_mode_is_idle() {
        let backend = BackendClient::new("http://localhost:5000");
        let (mode, _events) = VoiceMode::new(backend, MessageStorage::new(), Config::default());

        assert_eq!(mode.state(), VoiceState::Idle);
        assert_eq!(mode.pending_transcript(), "");
        assert!(mode.last_visual().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_signals_last_write_wins() {
        let backend = BackendClient::new("http://localhost:5000");
        let (mut mode, events) = VoiceMode::new(backend, MessageStorage::new(), Config::default());

        // Drive the signal path directly in the listening state
        mode.state = VoiceState::Listening;
        for text in ["partial", "partial two", "final text"] {
            mode.apply_signal(TranscriptSignal::Event(
                crate::backend::TranscriptEvent {
                    transcript: text.to_string(),
                    response: None,
                    is_final: false,
                    is_meitei: None,
                },
            ))
            .await
            .unwrap();
        }

        assert_eq!(mode.pending_transcript(), "final text");

        let snapshots: Vec<VoiceEvent> = events.try_iter().collect();
        assert_eq!(
            snapshots.last(),
            Some(&VoiceEvent::PendingTranscript("final text".to_string()))
        );
    }

    #[tokio::test]
    async fn test_paired_event_appends_exchange_and_clears_pending() {
        let backend = BackendClient::new("http://localhost:5000");
        let messages = MessageStorage::new();
        let (mut mode, _events) = VoiceMode::new(backend, messages.clone(), Config::default());

        mode.state = VoiceState::Listening;
        mode.apply_signal(TranscriptSignal::Event(crate::backend::TranscriptEvent {
            transcript: "hello there".to_string(),
            response: None,
            is_final: false,
            is_meitei: None,
        }))
        .await
        .unwrap();

        mode.apply_signal(TranscriptSignal::Event(crate::backend::TranscriptEvent {
            transcript: "hello there".to_string(),
            response: Some("hi!".to_string()),
            is_final: true,
            is_meitei: Some(false),
        }))
        .await
        .unwrap();

        assert_eq!(mode.pending_transcript(), "");
        let all = messages.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "hello there");
        assert!(all[0].is_user);
        assert_eq!(all[1].text, "hi!");
    }

    #[tokio::test]
    async fn test_signals_discarded_outside_listening() {
        let backend = BackendClient::new("http://localhost:5000");
        let (mut mode, events) = VoiceMode::new(backend, MessageStorage::new(), Config::default());

        mode.apply_signal(TranscriptSignal::Event(crate::backend::TranscriptEvent {
            transcript: "late arrival".to_string(),
            response: None,
            is_final: false,
            is_meitei: None,
        }))
        .await
        .unwrap();

        assert_eq!(mode.pending_transcript(), "");
        assert!(events.try_iter().next().is_none());
    }

    #[test]
    fn test_mute_requires_session() {
        let backend = BackendClient::new("http://localhost:5000");
        let (mut mode, _events) = VoiceMode::new(backend, MessageStorage::new(), Config::default());

        assert_eq!(mode.toggle_mute(), None);
    }

    #[test]
    fn test_teardown_is_idempotent_and_bumps_generation() {
        let backend = BackendClient::new("http://localhost:5000");
        let (mut mode, _events) = VoiceMode::new(backend, MessageStorage::new(), Config::default());

        let before = mode.generation.load(Ordering::SeqCst);
        mode.teardown_listening();
        mode.teardown_listening();
        assert_eq!(mode.generation.load(Ordering::SeqCst), before + 2);
        assert_eq!(mode.state(), VoiceState::Idle);
    }

    /// Minimal backend stub: answers every request with a started
    /// status and counts the `/voice-input` toggles it sees.
    async fn spawn_status_server() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::AtomicUsize;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let toggles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&toggles);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if String::from_utf8_lossy(&buf[..n]).starts_with("POST /voice-input") {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let body = r#"{"status":"started"}"#;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        (format!("http://{}", addr), toggles)
    }

    #[tokio::test]
    async fn test_failed_start_unwinds_backend_toggle() {
        let (url, toggles) = spawn_status_server().await;

        let mut config = Config::default();
        config.fft_size = 100; // rejected when the session opens
        let (mut mode, _events) =
            VoiceMode::new(BackendClient::new(url), MessageStorage::new(), config);

        assert!(mode.start().await.is_err());
        assert_eq!(mode.state(), VoiceState::Idle);

        // On for the attempt, off again on the unwind
        assert_eq!(toggles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_restart_closes_previous_session_first() {
        let (url, toggles) = spawn_status_server().await;

        let config = Config::default().with_simulated_audio();
        let (mut mode, _events) =
            VoiceMode::new(BackendClient::new(url), MessageStorage::new(), config);

        mode.start().await.unwrap();
        assert_eq!(mode.state(), VoiceState::Listening);
        let first_generation = mode.generation.load(Ordering::SeqCst);
        let old_viz_rx = mode.viz_rx.clone().unwrap();

        mode.start().await.unwrap();
        assert_eq!(mode.state(), VoiceState::Listening);

        // The old session was fully torn down before the new one
        // opened: its generation is stale and its visualizer worker has
        // exited, so the old channel drains to disconnection
        assert_eq!(mode.generation.load(Ordering::SeqCst), first_generation + 1);
        while old_viz_rx.try_recv().is_ok() {}
        assert_eq!(
            old_viz_rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        );

        // Toggled on, then off for the teardown, then on again
        assert_eq!(toggles.load(Ordering::SeqCst), 3);
    }
}
