//! UDP transport for SIP messages

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use sipflow_sip_core::{parse_message, Message};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Large enough for any realistic signaling datagram
const MAX_DATAGRAM: usize = 65_535;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.inner.socket.local_addr().ok())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = socket.local_addr().map_err(Error::LocalAddr)?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                closed: AtomicBool::new(false),
                events_tx,
            }),
        };

        transport.spawn_receive_loop(local_addr);

        Ok((transport, events_rx))
    }

    // Spawns a task that reads datagrams and publishes parsed messages
    fn spawn_receive_loop(&self, local_addr: SocketAddr) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];

            while !inner.closed.load(Ordering::Relaxed) {
                match inner.socket.recv_from(&mut buf).await {
                    Ok((len, src)) => {
                        debug!("Received {} bytes from {}", len, src);
                        match parse_message(&buf[..len]) {
                            Ok(message) => {
                                let event = TransportEvent::MessageReceived {
                                    message,
                                    source: src,
                                    destination: local_addr,
                                };
                                if inner.events_tx.send(event).await.is_err() {
                                    // Receiver dropped; nothing left to deliver to
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Discarding unparseable datagram from {}: {}", src, e);
                                let _ = inner
                                    .events_tx
                                    .send(TransportEvent::Error {
                                        error: format!("invalid SIP message: {}", e),
                                        destination: None,
                                    })
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("Error receiving UDP packet: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("receive error: {}", e),
                                destination: None,
                            })
                            .await;
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.socket.local_addr().map_err(Error::LocalAddr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let bytes = message.to_bytes();
        self.inner
            .socket
            .send_to(&bytes, destination)
            .await
            .map_err(|source| Error::Send {
                destination,
                source,
            })?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn is_reliable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipflow_sip_core::{HeaderName, Method, Request};

    fn loopback_request() -> Request {
        let mut request = Request::new(Method::Options, "sip:test@localhost".parse().unwrap());
        request
            .headers
            .push(HeaderName::Via, "SIP/2.0/UDP 127.0.0.1;branch=z9hG4bKudp1");
        request.headers.push(HeaderName::CallId, "udp-test");
        request.headers.push(HeaderName::CSeq, "1 OPTIONS");
        request
    }

    #[tokio::test]
    async fn send_and_receive_over_loopback() {
        let (a, _a_rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let (b, mut b_rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();

        let request = loopback_request();
        a.send_message(request.clone().into(), b.local_addr().unwrap())
            .await
            .unwrap();

        let event = b_rx.recv().await.unwrap();
        match event {
            TransportEvent::MessageReceived { message, .. } => {
                assert_eq!(message.branch().as_deref(), Some("z9hG4bKudp1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (a, _rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        a.close().await.unwrap();
        let err = a
            .send_message(
                loopback_request().into(),
                "127.0.0.1:5060".parse().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
