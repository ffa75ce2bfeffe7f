//! Agent listener
//!
//! Accepts TCP connections carrying length-prefixed envelopes. An agent
//! opens with `agent/hello`; its connection is then registered on the bus
//! so pushes for it are written back on the same stream. Connections that
//! skip the hello (exit nodes) may only submit hole-punch reports.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use wr_protocol::{Envelope, EnvelopeCodec, InboundMessage, OutboundMessage, PeerId};

use crate::connection::PeerConnections;
use crate::dispatch::Dispatcher;

pub struct AgentListener {
    dispatcher: Arc<Dispatcher>,
    connections: Arc<PeerConnections>,
    cancel: CancellationToken,
}

impl AgentListener {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        connections: Arc<PeerConnections>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            connections,
            cancel,
        }
    }

    pub async fn bind(bind_addr: &str) -> Result<TcpListener> {
        TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))
    }

    /// Accept connections until cancelled
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Agent listener on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Agent listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.spawn_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);

        let dispatcher = Arc::clone(&self.dispatcher);
        let connections = Arc::clone(&self.connections);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let conn = Connection {
                dispatcher,
                connections,
                peer_addr,
            };
            if let Err(e) = conn.serve(socket, cancel).await {
                tracing::warn!("Connection from {} closed with error: {}", peer_addr, e);
            }
        });
    }
}

struct Connection {
    dispatcher: Arc<Dispatcher>,
    connections: Arc<PeerConnections>,
    peer_addr: SocketAddr,
}

impl Connection {
    async fn serve(&self, socket: TcpStream, cancel: CancellationToken) -> Result<()> {
        let (read, write) = socket.into_split();
        let mut frames = FramedRead::new(read, EnvelopeCodec::<InboundMessage>::new());
        let mut sink = FramedWrite::new(write, EnvelopeCodec::<OutboundMessage>::new());

        let first = match frames.next().await {
            Some(frame) => frame?,
            None => return Ok(()),
        };

        let (identity, pending) = match first {
            InboundMessage::Hello(hello) => (self.dispatcher.authenticate(&hello).await?, None),
            other => (None, Some(other)),
        };

        // Anonymous connections get a queue nothing else can reach
        let (idle_tx, idle_rx) = mpsc::channel(1);
        let (peer, mut pushes) = match identity {
            Some((kind, peer)) => {
                tracing::info!(%peer, %kind, addr = %self.peer_addr, "Agent authenticated");
                let rx = self.connections.connect(peer.clone(), kind);
                (Some(peer), rx)
            }
            None => (None, idle_rx),
        };

        if let Some(message) = pending {
            self.dispatch(peer.as_ref(), message, &mut sink).await?;
        }

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),

                frame = frames.next() => match frame {
                    Some(Ok(message)) => {
                        if let Err(e) = self.dispatch(peer.as_ref(), message, &mut sink).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                },

                push = pushes.recv() => match push {
                    Some(push) => {
                        if let Err(e) = sink.send(push).await {
                            break Err(e.into());
                        }
                    }
                    None => {
                        tracing::info!(addr = %self.peer_addr, "Connection replaced by a newer one");
                        break Ok(());
                    }
                },
            }
        };

        drop(idle_tx);
        if let Some(peer) = &peer {
            drop(pushes);
            self.connections.release(peer);
        }
        result
    }

    /// Handle one message; handler errors are logged and the message dropped
    async fn dispatch(
        &self,
        peer: Option<&PeerId>,
        message: InboundMessage,
        sink: &mut FramedWrite<OwnedWriteHalf, EnvelopeCodec<OutboundMessage>>,
    ) -> Result<()> {
        let message_type = message.message_type();
        match self
            .dispatcher
            .handle(peer, message, chrono::Utc::now())
            .await
        {
            Ok(Some(reply)) => sink.send(reply).await?,
            Ok(None) => {}
            Err(e) => tracing::warn!(
                addr = %self.peer_addr,
                message_type,
                "Dropped message: {}",
                e
            ),
        }
        Ok(())
    }
}
