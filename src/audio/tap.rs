use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use parking_lot::Mutex;

/// Thread-safe ring of recent samples shared between the capture
/// callback and the visualizer's spectrum analyzer.
///
/// Overwrites the oldest samples when full, so a stalled reader never
/// backs up the audio callback.
pub struct AnalysisTap {
    buffer: Arc<Mutex<HeapRb<f32>>>,
}

impl AnalysisTap {
    /// Create a tap holding up to `capacity` recent samples
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity))),
        }
    }

    /// Write samples, dropping the oldest on overflow
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut buffer = self.buffer.lock();
        let mut written = 0;

        for &sample in samples {
            if buffer.try_push(sample).is_ok() {
                written += 1;
            } else {
                let _ = buffer.try_pop();
                let _ = buffer.try_push(sample);
                written += 1;
            }
        }

        written
    }

    /// Read up to `count` of the buffered samples
    pub fn read(&self, count: usize) -> Vec<f32> {
        let mut buffer = self.buffer.lock();
        let mut samples = Vec::with_capacity(count);

        for _ in 0..count {
            if let Some(sample) = buffer.try_pop() {
                samples.push(sample);
            } else {
                break;
            }
        }

        samples
    }

    /// Number of samples available to read
    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    /// Check if the tap is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Drop all buffered samples
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Clone for AnalysisTap {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let tap = AnalysisTap::new(1024);
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();

        assert_eq!(tap.write(&data), 100);
        assert_eq!(tap.read(100), data);
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let tap = AnalysisTap::new(10);
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();

        tap.write(&data);

        let read = tap.read(20);
        assert_eq!(read.len(), 10);
        assert_eq!(read.last(), Some(&19.0));
    }

    #[test]
    fn test_shared_clone() {
        let tap = AnalysisTap::new(16);
        let reader = tap.clone();

        tap.write(&[0.5; 8]);
        assert_eq!(reader.len(), 8);
    }
}
