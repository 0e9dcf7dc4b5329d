//! Transport boundary and its WebSocket implementation.
//!
//! The gateway core only needs to open a connection, send frames, receive
//! frames, and close. Opening yields separate send and receive halves so the
//! reader can live in its own task while the connection task stays the only
//! writer.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::trace;
use url::Url;

use crate::error::GatewayError;

/// A frame received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload bytes.
    Data(Vec<u8>),
    /// The remote closed the connection.
    Closed {
        /// Close code, if the remote sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Opens connections to the gateway.
pub trait Transport: Send + Sync + 'static {
    /// Sending half.
    type Sender: FrameSender;
    /// Receiving half.
    type Receiver: FrameReceiver;

    /// Open a connection.
    fn open(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<(Self::Sender, Self::Receiver), GatewayError>> + Send;
}

/// Sending half of a connection.
pub trait FrameSender: Send + 'static {
    /// Send one complete frame.
    fn send(&mut self, frame: Vec<u8>) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Send a close frame and shut the connection down.
    fn close(&mut self, code: u16) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Receiving half of a connection.
pub trait FrameReceiver: Send + 'static {
    /// Wait for the next frame. Must be cancel safe.
    fn receive(&mut self) -> impl Future<Output = Result<Frame, GatewayError>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    /// Create a transport with the given connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Transport for WsTransport {
    type Sender = WsSender;
    type Receiver = WsReceiver;

    async fn open(&self, url: &Url) -> Result<(WsSender, WsReceiver), GatewayError> {
        let (ws_stream, _) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| GatewayError::Transport("connection timeout".to_string()))?
                .map_err(|e| GatewayError::Transport(format!("failed to connect: {e}")))?;

        let (write, read) = ws_stream.split();
        Ok((WsSender(write), WsReceiver(read)))
    }
}

/// Sending half of a [`WsTransport`] connection.
pub struct WsSender(SplitSink<WsStream, Message>);

impl FrameSender for WsSender {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), GatewayError> {
        // JSON goes out as text; anything else as binary.
        let message = match String::from_utf8(frame) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| GatewayError::Transport(format!("send failed: {e}")))
    }

    async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        self.0
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| GatewayError::Transport(format!("close failed: {e}")))?;
        self.0
            .close()
            .await
            .map_err(|e| GatewayError::Transport(format!("close failed: {e}")))
    }
}

/// Receiving half of a [`WsTransport`] connection.
pub struct WsReceiver(SplitStream<WsStream>);

impl FrameReceiver for WsReceiver {
    async fn receive(&mut self) -> Result<Frame, GatewayError> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Data(text.as_str().as_bytes().to_vec())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Data(bytes.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(match frame {
                        Some(frame) => Frame::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => Frame::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    });
                }
                Some(Ok(other)) => {
                    // Ping/Pong are answered by tungstenite itself.
                    trace!(?other, "ignoring control frame");
                }
                Some(Err(e)) => return Err(GatewayError::Transport(format!("receive failed: {e}"))),
                None => {
                    return Ok(Frame::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for driving the state machine deterministically.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use elixus_proto::{Envelope, Opcode};
    use tokio::sync::mpsc;

    use super::{Frame, FrameReceiver, FrameSender, Transport};
    use crate::error::GatewayError;
    use url::Url;

    /// What the client wrote.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Frame(Vec<u8>),
        Close(u16),
    }

    /// Server side of one mock connection.
    pub(crate) struct MockPeer {
        pub(crate) url: Url,
        inbound: mpsc::UnboundedSender<Result<Frame, GatewayError>>,
        outbound: mpsc::UnboundedReceiver<Sent>,
    }

    impl MockPeer {
        pub(crate) fn push(&self, envelope: &Envelope) {
            let bytes = envelope.to_bytes().expect("encode");
            let _ = self.inbound.send(Ok(Frame::Data(bytes)));
        }

        pub(crate) fn push_raw(&self, bytes: &[u8]) {
            let _ = self.inbound.send(Ok(Frame::Data(bytes.to_vec())));
        }

        pub(crate) fn close(&self, code: u16, reason: &str) {
            let _ = self.inbound.send(Ok(Frame::Closed {
                code: Some(code),
                reason: reason.to_string(),
            }));
        }

        pub(crate) async fn next_sent(&mut self) -> Option<Sent> {
            tokio::time::timeout(Duration::from_secs(3600), self.outbound.recv())
                .await
                .ok()
                .flatten()
        }

        /// Next envelope written by the client, failing on close.
        pub(crate) async fn next_envelope(&mut self) -> Envelope {
            match self.next_sent().await {
                Some(Sent::Frame(bytes)) => Envelope::from_bytes(&bytes).expect("decode"),
                other => panic!("expected a frame, got {other:?}"),
            }
        }

        /// Next envelope with the given opcode, skipping heartbeats.
        pub(crate) async fn expect(&mut self, op: Opcode) -> Envelope {
            loop {
                let envelope = self.next_envelope().await;
                if envelope.op == op {
                    return envelope;
                }
                assert_eq!(envelope.op, Opcode::Heartbeat, "unexpected {envelope:?}");
            }
        }

        /// Next close code, skipping heartbeats.
        pub(crate) async fn expect_close(&mut self) -> u16 {
            loop {
                match self.next_sent().await {
                    Some(Sent::Close(code)) => return code,
                    Some(Sent::Frame(bytes)) => {
                        let envelope = Envelope::from_bytes(&bytes).expect("decode");
                        assert_eq!(envelope.op, Opcode::Heartbeat, "unexpected {envelope:?}");
                    }
                    None => panic!("connection ended without close"),
                }
            }
        }
    }

    pub(crate) struct MockTransport {
        peers: mpsc::UnboundedSender<MockPeer>,
        refuse: Arc<AtomicU32>,
    }

    impl MockTransport {
        pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
            let (peers, rx) = mpsc::unbounded_channel();
            (
                Self {
                    peers,
                    refuse: Arc::new(AtomicU32::new(0)),
                },
                rx,
            )
        }

        /// Make the next `n` opens fail.
        pub(crate) fn refuse_next(self, n: u32) -> Self {
            self.refuse.store(n, Ordering::SeqCst);
            self
        }
    }

    impl Transport for MockTransport {
        type Sender = MockSender;
        type Receiver = MockReceiver;

        async fn open(&self, url: &Url) -> Result<(MockSender, MockReceiver), GatewayError> {
            let refused = self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(GatewayError::Transport("connection refused".to_string()));
            }

            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let peer = MockPeer {
                url: url.clone(),
                inbound: in_tx,
                outbound: out_rx,
            };
            self.peers
                .send(peer)
                .map_err(|_| GatewayError::Transport("test dropped".to_string()))?;
            Ok((MockSender(out_tx), MockReceiver(in_rx)))
        }
    }

    pub(crate) struct MockSender(mpsc::UnboundedSender<Sent>);

    impl FrameSender for MockSender {
        async fn send(&mut self, frame: Vec<u8>) -> Result<(), GatewayError> {
            self.0
                .send(Sent::Frame(frame))
                .map_err(|_| GatewayError::Transport("peer gone".to_string()))
        }

        async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
            self.0
                .send(Sent::Close(code))
                .map_err(|_| GatewayError::Transport("peer gone".to_string()))
        }
    }

    pub(crate) struct MockReceiver(mpsc::UnboundedReceiver<Result<Frame, GatewayError>>);

    impl FrameReceiver for MockReceiver {
        async fn receive(&mut self) -> Result<Frame, GatewayError> {
            match self.0.recv().await {
                Some(frame) => frame,
                None => Ok(Frame::Closed {
                    code: None,
                    reason: "peer dropped".to_string(),
                }),
            }
        }
    }
}
