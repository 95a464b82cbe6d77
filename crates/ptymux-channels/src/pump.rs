//! Bounded-wait output collection shared by the stream-backed channels.
//!
//! Readers run in the background and forward chunks over an unbounded
//! channel; `collect` drains that channel until a deadline or end of stream.

use ptymux_types::{MAX_WAIT, READ_CHUNK_SIZE};
use std::io::{self, Read};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Bytes gathered by one `collect` call
#[derive(Debug, Default)]
pub struct Collected {
    pub bytes: Vec<u8>,
    /// Every reader feeding the pump has reached end of stream
    pub eof: bool,
}

pub struct OutputPump {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    eof: bool,
}

impl OutputPump {
    /// Pump a blocking reader (a PTY master) from a dedicated thread
    pub fn from_blocking_reader<R>(mut reader: R, thread_name: &str) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        // EIO once the slave side is gone
                        Err(_) => break,
                    }
                }
            })?;
        Ok(Self { rx, eof: false })
    }

    /// Pump several async readers into one merged stream.
    /// Must be called from within a tokio runtime.
    pub fn from_async_readers(readers: Vec<Box<dyn AsyncRead + Send + Unpin>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for mut reader in readers {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        Self { rx, eof: false }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Gather output until `timeout` elapses or the stream ends.
    ///
    /// Chunks that are already queued are returned even with a zero timeout.
    /// Waits longer than `MAX_WAIT` are capped.
    pub async fn collect(&mut self, timeout: Duration) -> Collected {
        let deadline = Instant::now() + timeout.min(MAX_WAIT);
        let mut bytes = Vec::new();

        while !self.eof {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
                Ok(None) => self.eof = true,
                Err(_) => break,
            }
        }

        Collected {
            bytes,
            eof: self.eof,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_blocking_reader_reaches_eof() {
        let mut pump =
            OutputPump::from_blocking_reader(Cursor::new(b"hello pump".to_vec()), "test-pump")
                .unwrap();
        let collected = pump.collect(Duration::from_secs(2)).await;
        assert_eq!(collected.bytes, b"hello pump");
        assert!(collected.eof);
        assert!(pump.is_eof());
    }

    #[tokio::test]
    async fn test_collect_caps_huge_timeout() {
        let mut pump =
            OutputPump::from_blocking_reader(Cursor::new(b"done".to_vec()), "test-pump-max")
                .unwrap();
        let collected = pump.collect(Duration::MAX).await;
        assert_eq!(collected.bytes, b"done");
        assert!(collected.eof);
    }

    #[tokio::test]
    async fn test_async_readers_are_merged() {
        let readers: Vec<Box<dyn AsyncRead + Send + Unpin>> =
            vec![Box::new(&b"out"[..]), Box::new(&b"err"[..])];
        let mut pump = OutputPump::from_async_readers(readers);
        let collected = pump.collect(Duration::from_secs(2)).await;

        let text = String::from_utf8(collected.bytes).unwrap();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert!(collected.eof);
    }

    #[tokio::test]
    async fn test_collect_respects_deadline_when_idle() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut pump = OutputPump::from_async_readers(vec![Box::new(reader)]);

        let started = std::time::Instant::now();
        let collected = pump.collect(Duration::from_millis(200)).await;
        let elapsed = started.elapsed();

        assert!(collected.bytes.is_empty());
        assert!(!collected.eof);
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(1));
    }
}
