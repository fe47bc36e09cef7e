//! Non-blocking, timeout-bounded reader for kernel input event streams

use super::event::{InputEvent, RawRecord, RECORD_SIZE};
use crate::error::LagError;
use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

/// Default pause between unsuccessful read attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Exclusive owner of one open event stream.
///
/// The stream must already be in non-blocking mode: a read with no data
/// pending is expected to fail with [`io::ErrorKind::WouldBlock`] (or return
/// zero bytes). The stream is closed when the source is dropped.
pub struct EventSource<R: Read> {
    name: String,
    stream: R,
    pending: [u8; RECORD_SIZE],
    filled: usize,
    poll_interval: Duration,
}

impl<R: Read> EventSource<R> {
    pub fn new(name: impl Into<String>, stream: R) -> Self {
        Self {
            name: name.into(),
            stream,
            pending: [0u8; RECORD_SIZE],
            filled: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the pause between unsuccessful read attempts
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Name of the device this stream belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the next event, waiting at most `timeout` for one to arrive.
    ///
    /// Returns as soon as a full record is available. Fails with
    /// [`LagError::Timeout`] once `timeout` has elapsed with no complete
    /// record.
    pub fn read_event(&mut self, timeout: Duration) -> Result<InputEvent, LagError> {
        let start = Instant::now();

        loop {
            match self.stream.read(&mut self.pending[self.filled..]) {
                Ok(0) => {}
                Ok(n) => {
                    self.filled += n;
                    if self.filled == RECORD_SIZE {
                        self.filled = 0;
                        let raw = RawRecord::decode(&self.pending)?;
                        return Ok(raw.into_event(&self.name));
                    }
                    // Partial record, the rest should follow immediately
                    continue;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LagError::Io(e)),
            }

            if start.elapsed() > timeout {
                return Err(LagError::Timeout(timeout));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl<R: Read> Drop for EventSource<R> {
    fn drop(&mut self) {
        log::debug!("Closing event stream for {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::event::EventClass;
    use std::collections::VecDeque;

    /// Stream that hands out queued chunks and then reports WouldBlock
    struct ChunkedStream {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedStream {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }
    }

    impl Read for ChunkedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Err(io::ErrorKind::WouldBlock.into());
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.chunks.push_front(chunk);
            }
            Ok(n)
        }
    }

    struct BrokenStream;

    impl Read for BrokenStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device unplugged"))
        }
    }

    fn key(timestamp: f64, code: u16, value: i32) -> Vec<u8> {
        RawRecord::at(timestamp, EventClass::Key, code, value)
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn returns_available_event_immediately() {
        let mut source = EventSource::new("kbd", ChunkedStream::new(vec![key(3.25, 30, 1)]));
        let start = Instant::now();
        let event = source.read_event(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(event.source, "kbd");
        assert_eq!(event.code, 30);
        assert_eq!(event.timestamp, 3.25);
    }

    #[test]
    fn reads_records_in_order() {
        let mut source = EventSource::new(
            "kbd",
            ChunkedStream::new(vec![key(1.0, 30, 1), key(1.1, 30, 0)]),
        );
        let timeout = Duration::from_millis(100);
        assert_eq!(source.read_event(timeout).unwrap().value, 1);
        assert_eq!(source.read_event(timeout).unwrap().value, 0);
    }

    #[test]
    fn reassembles_split_records() {
        let bytes = key(2.5, 44, 1);
        let (head, tail) = bytes.split_at(7);
        let mut source = EventSource::new(
            "kbd",
            ChunkedStream::new(vec![head.to_vec(), tail.to_vec()]),
        );
        let event = source.read_event(Duration::from_millis(100)).unwrap();
        assert_eq!(event.code, 44);
        assert_eq!(event.timestamp, 2.5);
    }

    #[test]
    fn times_out_without_data() {
        let timeout = Duration::from_millis(50);
        let mut source = EventSource::new("kbd", ChunkedStream::new(Vec::new()));
        let start = Instant::now();
        let err = source.read_event(timeout).unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, LagError::Timeout(t) if t == timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
    }

    #[test]
    fn eof_is_treated_as_no_data() {
        let mut source = EventSource::new("file", io::empty());
        let err = source.read_event(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn io_errors_propagate() {
        let mut source = EventSource::new("kbd", BrokenStream);
        let err = source.read_event(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, LagError::Io(_)));
    }
}
