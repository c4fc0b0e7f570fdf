//! Non-blocking PCM inputs
//!
//! A mixer source never waits on its producer. Each tick it asks the input
//! for whatever bytes are already available and moves on. Producers push
//! into a [`PcmSender`]; anything implementing `AsyncRead` (a decoder's
//! stdout, a socket, a file) can be pumped into one with [`pipe_reader`].

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::error::SourceError;

/// Result of a single non-blocking pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Bytes that were ready, never longer than requested
    Data(Bytes),
    /// Nothing ready right now; the producer is still alive
    Pending,
    /// Producer finished cleanly
    End,
    /// Producer failed; no more data will follow
    Failed(SourceError),
}

/// Something the mixer can pull raw interleaved PCM from.
pub trait PcmInput: Send {
    /// Return up to `max` bytes without blocking.
    fn pull(&mut self, max: usize) -> Pull;
}

type Chunk = Result<Bytes, SourceError>;

/// Create a connected producer/consumer pair.
pub fn pcm_channel() -> (PcmSender, PcmReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PcmSender { tx },
        PcmReceiver {
            rx,
            leftover: None,
            deferred: None,
            finished: false,
        },
    )
}

/// Producer end. Dropping it ends the stream.
#[derive(Debug, Clone)]
pub struct PcmSender {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl PcmSender {
    /// Queue bytes for the mixer.
    pub fn send(&self, pcm: impl Into<Bytes>) -> Result<(), SourceError> {
        self.tx.send(Ok(pcm.into())).map_err(|_| SourceError::Closed)
    }

    /// Terminate the stream with an error.
    pub fn fail(self, err: SourceError) {
        let _ = self.tx.send(Err(err));
    }

    /// Whether the consuming source has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end, handed to the mixer as a source input.
#[derive(Debug)]
pub struct PcmReceiver {
    rx: mpsc::UnboundedReceiver<Chunk>,
    leftover: Option<Bytes>,
    deferred: Option<SourceError>,
    finished: bool,
}

impl PcmInput for PcmReceiver {
    fn pull(&mut self, max: usize) -> Pull {
        if self.finished {
            return Pull::End;
        }

        let mut out = BytesMut::new();

        if let Some(mut chunk) = self.leftover.take() {
            if chunk.len() > max {
                let head = chunk.split_to(max);
                self.leftover = Some(chunk);
                return Pull::Data(head);
            }
            out.extend_from_slice(&chunk);
        }

        if self.deferred.is_none() {
            while out.len() < max {
                match self.rx.try_recv() {
                    Ok(Ok(mut chunk)) => {
                        let room = max - out.len();
                        if chunk.len() > room {
                            out.extend_from_slice(&chunk.split_to(room));
                            self.leftover = Some(chunk);
                        } else {
                            out.extend_from_slice(&chunk);
                        }
                    }
                    Ok(Err(err)) => {
                        self.deferred = Some(err);
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if out.is_empty() {
                            self.finished = true;
                            return Pull::End;
                        }
                        break;
                    }
                }
            }
        }

        if !out.is_empty() {
            return Pull::Data(out.freeze());
        }
        match self.deferred.take() {
            Some(err) => {
                self.finished = true;
                Pull::Failed(err)
            }
            None => Pull::Pending,
        }
    }
}

/// Default read size for [`pipe_reader`]
pub const PIPE_CHUNK_SIZE: usize = 16 * 1024;

/// Pump an async byte stream into a new PCM channel.
///
/// Spawns a task on the current tokio runtime. The task stops when the
/// reader hits EOF, fails, or the receiving source is dropped.
pub fn pipe_reader<R>(mut reader: R) -> PcmReceiver
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = pcm_channel();

    tokio::spawn(async move {
        loop {
            let mut buf = BytesMut::with_capacity(PIPE_CHUNK_SIZE);
            match reader.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(buf.freeze()).is_err() {
                        tracing::debug!("PCM pipe consumer dropped, stopping reader");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("PCM pipe read failed: {}", e);
                    tx.fail(SourceError::Read(e.to_string()));
                    break;
                }
            }
        }
    });

    rx
}
