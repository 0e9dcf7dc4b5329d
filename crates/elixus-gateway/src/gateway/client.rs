//! Gateway client: keeps a session alive across connections.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

use super::events::GatewayEvent;
use super::handle::GatewayHandle;
use super::reconnect::{DisconnectCause, ReconnectAction, ReconnectMode, ReconnectPolicy};
use super::router::EventRouter;
use super::session::Session;
use super::state::{AtomicConnectionState, ConnectionState};
use super::transport::{Transport, WsTransport};

/// Gateway client.
///
/// Owns the session, the reconnection policy, and the router. [`run`] drives
/// one connection at a time and consults the policy whenever a connection
/// ends, until shutdown is requested or an unrecoverable error occurs.
///
/// [`run`]: GatewayClient::run
pub struct GatewayClient<T: Transport = WsTransport> {
    pub(crate) config: GatewayConfig,
    pub(crate) transport: T,
    pub(crate) session: Session,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) router: EventRouter,
    pub(crate) state: Arc<AtomicConnectionState>,
    events: Option<mpsc::Sender<GatewayEvent>>,
    shutdown: CancellationToken,
}

impl GatewayClient<WsTransport> {
    /// Create a client that connects over WebSocket.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_transport(config, WsTransport::default())
    }
}

impl<T: Transport> GatewayClient<T> {
    /// Create a client over a custom transport.
    #[must_use]
    pub fn with_transport(config: GatewayConfig, transport: T) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect_config());
        Self {
            config,
            transport,
            session: Session::new(),
            policy,
            router: EventRouter::new(),
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected)),
            events: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the event router.
    #[must_use]
    pub fn with_router(mut self, router: EventRouter) -> Self {
        self.router = router;
        self
    }

    /// Send lifecycle events to the given channel.
    ///
    /// Events are dropped rather than awaited when the channel is full.
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<GatewayEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stop when `token` is cancelled, in addition to [`GatewayHandle::shutdown`].
    #[must_use]
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.shutdown = token.child_token();
        self
    }

    /// Mutable access to the router, for registering handlers.
    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    /// Handle for observing and stopping the client from other tasks.
    #[must_use]
    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Current session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Connect and keep the session alive until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the gateway rejects
    /// authentication or closes with another fatal code, or the reconnection
    /// attempt limit is reached.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        self.config.validate()?;
        info!(url = %self.config.url, intents = self.config.intents, "starting gateway client");

        let shutdown = self.shutdown.clone();
        let result = self.drive(&shutdown).await;
        self.state.store(ConnectionState::Disconnected);
        result
    }

    async fn drive(&mut self, shutdown: &CancellationToken) -> Result<(), GatewayError> {
        loop {
            let cause = match self.run_connection(shutdown).await {
                Ok(cause) => cause,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "gateway connection failed permanently");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "gateway connection failed");
                    DisconnectCause::network(e.to_string())
                }
            };

            let failed_in = self.state.load();
            self.state.store(ConnectionState::Disconnected);
            self.emit(GatewayEvent::Disconnected {
                cause: cause.clone(),
            });

            match self.policy.decide(&cause, &self.session) {
                ReconnectAction::Shutdown => {
                    info!("gateway client stopped");
                    return Ok(());
                }
                ReconnectAction::GiveUp { attempts } => {
                    error!(attempts, "giving up on the gateway");
                    return Err(GatewayError::ReconnectExhausted { attempts });
                }
                ReconnectAction::Reconnect {
                    mode,
                    delay,
                    attempt,
                } => {
                    if mode == ReconnectMode::FreshIdentify {
                        self.session.reset();
                    }
                    warn!(
                        state = %failed_in,
                        %cause,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        ?mode,
                        "reconnecting to gateway"
                    );
                    self.emit(GatewayEvent::Reconnecting {
                        attempt,
                        delay,
                        mode,
                    });

                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            () = shutdown.cancelled() => {
                                info!("gateway client stopped during backoff");
                                return Ok(());
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn emit(&self, event: GatewayEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "dropping lifecycle event");
            }
        }
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for GatewayClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("session", &self.session)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}
