//! One microphone recording, from open to finalized blob.
//!
//! A session owns its own capture stream for the duration of one
//! utterance. Frames append in arrival order; `finish` concatenates them
//! into a single WAV payload at the capture rate and releases the device.

use tracing::{debug, info};

use crate::codec;
use crate::device::{DeviceError, MicStream};

pub struct RecordingSession {
    stream: MicStream,
    chunks: Vec<Vec<i16>>,
    sample_rate: u32,
}

impl RecordingSession {
    /// Acquire a capture stream and begin collecting frames.
    pub fn open(app_name: &str, sample_rate: u32) -> Result<Self, DeviceError> {
        let stream = MicStream::open(app_name, sample_rate)?;
        debug!(sample_rate, "recording opened");
        Ok(Self::with_stream(stream))
    }

    fn with_stream(stream: MicStream) -> Self {
        let sample_rate = stream.sample_rate();
        Self {
            stream,
            chunks: Vec::new(),
            sample_rate,
        }
    }

    /// Append every frame the device has produced since the last drain.
    /// Driven on the session's sampling cadence.
    pub fn drain_available(&mut self) {
        while let Some(frame) = self.stream.try_frame() {
            self.chunks.push(frame);
        }
    }

    /// Samples collected so far.
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Finalize the chunk sequence into a WAV blob at the capture rate,
    /// releasing the capture stream.
    pub fn finish(mut self) -> Vec<u8> {
        // Pick up anything produced since the last cadence tick.
        self.drain_available();

        let mut samples = Vec::with_capacity(self.sample_count());
        for chunk in &self.chunks {
            samples.extend_from_slice(chunk);
        }

        info!(
            samples = samples.len(),
            duration_ms = samples.len() as u64 * 1000 / u64::from(self.sample_rate),
            "recording finalized"
        );
        codec::encode_wav(&samples, self.sample_rate)
    }

    #[cfg(test)]
    pub(crate) fn for_test(stream: MicStream) -> Self {
        Self::with_stream(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn frames_concatenate_in_arrival_order() {
        let (tx, rx) = mpsc::channel(8);
        let mut session = RecordingSession::for_test(MicStream::from_channel(rx, 16_000));

        tx.send(vec![1i16, 2, 3]).await.unwrap();
        tx.send(vec![4i16, 5]).await.unwrap();
        session.drain_available();
        assert_eq!(session.sample_count(), 5);

        // A frame that arrived but was never drained still lands in the blob.
        tx.send(vec![6i16]).await.unwrap();
        drop(tx);

        let blob = session.finish();
        let mut reader = hound::WavReader::new(Cursor::new(&blob)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn empty_recording_finalizes_to_headers_only() {
        let (tx, rx) = mpsc::channel::<Vec<i16>>(1);
        let session = RecordingSession::for_test(MicStream::from_channel(rx, 16_000));
        drop(tx);

        let blob = session.finish();
        assert_eq!(blob.len(), 44);
        assert_eq!(&blob[..4], b"RIFF");
    }
}
