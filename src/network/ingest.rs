//! Raw PCM over TCP
//!
//! Every accepted connection becomes a mixer source. The peer must send
//! signed little-endian interleaved PCM in the mixer's format; closing the
//! connection ends the source once its buffered audio has played.

use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::audio::input::pipe_reader;
use crate::mixer::runner::MixerHandle;

pub struct TcpIngest {
    listener: TcpListener,
    mixer: MixerHandle,
    labels: Vec<String>,
}

impl TcpIngest {
    /// Bind the listener. Sources are labelled `labels`.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        mixer: MixerHandle,
        labels: Vec<String>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            mixer,
            labels,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("[Ingest] Listening on {} for PCM push connections", addr);
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("[Ingest] Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    let source = self
                        .mixer
                        .add_source(pipe_reader(stream), self.labels.iter().cloned());
                    tracing::info!(
                        "[Ingest] Received PCM connection from {} (source {})",
                        peer,
                        source.id()
                    );

                    tokio::spawn(async move {
                        match source.removed().await {
                            Some(err) => {
                                tracing::warn!("[Ingest] Connection from {} ended: {}", peer, err)
                            }
                            None => tracing::info!("[Ingest] Connection from {} closed", peer),
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("[Ingest] Accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}
