use crate::audio::AudioFrame;
use crate::{Result, VoxError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Receiver of encoded audio segments.
///
/// `on_chunk` is called per completed segment in recording order
/// (streaming consumption); `on_finalize` receives every segment at
/// stop (batch consumption). A sink may act on either or both.
pub trait ChunkSink: Send + 'static {
    fn on_chunk(&mut self, chunk: &[u8]);
    fn on_finalize(&mut self, chunks: Vec<Vec<u8>>);
}

/// Segments a live frame stream into encoded WAV chunks at a fixed cadence
pub struct Recorder;

/// Handle to a running recording; stopping it flushes the partial tail
/// segment and triggers final delivery.
pub struct RecordingHandle {
    stopping: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Begin segmenting frames from `frame_rx` into WAV chunks of
    /// roughly `chunk_interval` each, delivered to `sink` as they
    /// complete.
    pub fn start<S: ChunkSink>(
        frame_rx: Receiver<AudioFrame>,
        sample_rate: u32,
        chunk_interval: Duration,
        mut sink: S,
    ) -> RecordingHandle {
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopping);

        let worker = thread::spawn(move || {
            let mut segment: Vec<f32> = Vec::new();
            let mut all_chunks: Vec<Vec<u8>> = Vec::new();
            let mut segment_started = Instant::now();

            info!(
                "Recorder started ({} Hz, {:?} segments)",
                sample_rate, chunk_interval
            );

            loop {
                let stop = stop_flag.load(Ordering::SeqCst);

                match frame_rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(frame) => segment.extend_from_slice(&frame),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("Frame channel disconnected, stopping recorder");
                        break;
                    }
                }

                let cadence_due = segment_started.elapsed() >= chunk_interval;
                if (cadence_due || stop) && !segment.is_empty() {
                    match encode_wav_chunk(&segment, sample_rate) {
                        Ok(chunk) => {
                            sink.on_chunk(&chunk);
                            all_chunks.push(chunk);
                        }
                        Err(e) => warn!("Failed to encode audio chunk: {}", e),
                    }
                    segment.clear();
                    segment_started = Instant::now();
                } else if cadence_due {
                    segment_started = Instant::now();
                }

                if stop {
                    break;
                }
            }

            let total = all_chunks.len();
            sink.on_finalize(all_chunks);
            info!("Recorder stopped after {} chunks", total);
        });

        RecordingHandle {
            stopping,
            worker: Some(worker),
        }
    }
}

impl RecordingHandle {
    /// Stop the recorder, flushing the tail segment and delivering the
    /// final chunk set. Tolerates being called when already stopped.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Whether the recorder has been told to stop
    pub fn is_stopped(&self) -> bool {
        self.worker.is_none()
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Encode a mono f32 segment as 16-bit PCM WAV bytes in memory
pub fn encode_wav_chunk(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoxError::Decode(format!("Failed to create WAV writer: {}", e)))?;

        for &sample in samples {
            let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| VoxError::Decode(format!("Failed to write sample: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| VoxError::Decode(format!("Failed to finalize WAV chunk: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct CollectingSink {
        chunks: Arc<Mutex<Vec<Vec<u8>>>>,
        finalized: Arc<Mutex<Option<usize>>>,
    }

    impl ChunkSink for CollectingSink {
        fn on_chunk(&mut self, chunk: &[u8]) {
            self.chunks.lock().push(chunk.to_vec());
        }

        fn on_finalize(&mut self, chunks: Vec<Vec<u8>>) {
            *self.finalized.lock() = Some(chunks.len());
        }
    }

    #[test]
    fn test_encode_wav_chunk_roundtrip() {
        let samples: Vec<f32> = (0..160)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 16000.0).sin() * 0.5)
            .collect();

        let bytes = encode_wav_chunk(&samples, 16000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();

        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(reader.len(), samples.len() as u32);
    }

    #[test]
    fn test_stop_flushes_tail_and_finalizes() {
        let (tx, rx) = unbounded();
        let sink = CollectingSink::default();
        let chunks = Arc::clone(&sink.chunks);
        let finalized = Arc::clone(&sink.finalized);

        // Interval far in the future: only the stop flush can produce a chunk
        let mut handle = Recorder::start(rx, 16000, Duration::from_secs(3600), sink);

        tx.send(vec![0.1f32; 512]).unwrap();
        tx.send(vec![0.2f32; 512]).unwrap();
        thread::sleep(Duration::from_millis(100));

        handle.stop();

        assert_eq!(chunks.lock().len(), 1);
        assert_eq!(*finalized.lock(), Some(1));

        // Second stop is a no-op
        handle.stop();
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_cadence_produces_fifo_chunks() {
        let (tx, rx) = unbounded();
        let sink = CollectingSink::default();
        let chunks = Arc::clone(&sink.chunks);

        let mut handle = Recorder::start(rx, 8000, Duration::from_millis(50), sink);

        for i in 0..4 {
            tx.send(vec![i as f32 * 0.1; 256]).unwrap();
            thread::sleep(Duration::from_millis(60));
        }

        handle.stop();

        let produced = chunks.lock();
        assert!(produced.len() >= 2, "expected multiple cadence chunks");

        // FIFO: first chunk decodes to the first samples sent
        let reader = hound::WavReader::new(Cursor::new(produced[0].clone())).unwrap();
        let first: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert!(first.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_stop_with_no_audio_finalizes_empty() {
        let (_tx, rx) = unbounded::<AudioFrame>();
        let sink = CollectingSink::default();
        let finalized = Arc::clone(&sink.finalized);

        let mut handle = Recorder::start(rx, 16000, Duration::from_secs(1), sink);
        handle.stop();

        assert_eq!(*finalized.lock(), Some(0));
    }
}
