use crate::audio::AudioFrame;
use crate::backend::TranscriptSignal;
use crate::viz::VizSample;
use crossbeam_channel::{bounded, Receiver, Sender};

/// Channels created fresh for every listening session.
///
/// A new bundle per session means senders held by stale workers point
/// at dropped receivers, so late completions for a torn-down session
/// fail to deliver instead of reaching the new one.
pub struct SessionChannels {
    pub frame_tx: Sender<AudioFrame>,
    pub frame_rx: Receiver<AudioFrame>,
    pub signal_tx: Sender<TranscriptSignal>,
    pub signal_rx: Receiver<TranscriptSignal>,
    pub viz_tx: Sender<VizSample>,
    pub viz_rx: Receiver<VizSample>,
}

impl SessionChannels {
    pub fn new() -> Self {
        let (frame_tx, frame_rx) = bounded(32);
        let (signal_tx, signal_rx) = bounded(100);
        let (viz_tx, viz_rx) = bounded(16);

        Self {
            frame_tx,
            frame_rx,
            signal_tx,
            signal_rx,
            viz_tx,
            viz_rx,
        }
    }
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new()
    }
}
