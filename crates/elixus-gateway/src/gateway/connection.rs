//! One connection's lifetime: open, handshake, steady state, teardown.
//!
//! The reader task and the heartbeat timer both feed a single channel. The
//! loop in [`GatewayClient::run_connection`] is the only consumer, so it alone
//! mutates the session, the heartbeat status, and the connection state, and
//! it alone writes to the transport.

use std::time::Duration;

use elixus_proto::{
    decode, invalid_session_resumable, CloseAction, CloseCode, Envelope, Hello, Opcode, Ready,
    Resume,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::client::GatewayClient;
use super::events::GatewayEvent;
use super::heartbeat::{
    deadline_after, initial_jitter, start_heartbeat_task, Beat, BeatOutcome, HeartbeatHandle,
    HeartbeatStatus, MAX_HEARTBEAT_INTERVAL,
};
use super::reconnect::DisconnectCause;
use super::state::ConnectionState;
use super::transport::{Frame, FrameReceiver, FrameSender, Transport};
use crate::error::GatewayError;

const EVENT_BUFFER: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Inputs to the connection loop.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// Something arrived from the transport.
    Inbound(Result<Frame, GatewayError>),
    /// The heartbeat timer fired.
    Beat,
}

impl From<Beat> for LoopEvent {
    fn from(_: Beat) -> Self {
        Self::Beat
    }
}

/// State that lives and dies with one transport.
struct Link<S> {
    sender: S,
    phase: ConnectionState,
    status: Option<HeartbeatStatus>,
    heartbeat: Option<HeartbeatHandle>,
    events_tx: mpsc::Sender<LoopEvent>,
    cancel: CancellationToken,
}

/// `Ok(None)` keeps going, `Ok(Some)` ends the connection recoverably, `Err`
/// ends the client.
type Step = Result<Option<DisconnectCause>, GatewayError>;

impl<T: Transport> GatewayClient<T> {
    /// Run one connection until it ends.
    ///
    /// Returns why it ended, or an error the client cannot recover from.
    pub(crate) async fn run_connection(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<DisconnectCause, GatewayError> {
        self.state.store(ConnectionState::Connecting);
        let url = match self.config.connect_url(self.session.resume_url()) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "unusable resume url, falling back to the configured url");
                self.config.connect_url(None)?
            }
        };

        info!(%url, resuming = self.session.is_resumable(), "connecting to gateway");
        let opened = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(DisconnectCause::UserCancelled),
            opened = self.transport.open(&url) => opened,
        };
        let (sender, receiver) = match opened {
            Ok(halves) => halves,
            Err(e) => {
                warn!(error = %e, "failed to open gateway connection");
                return Ok(DisconnectCause::network(e.to_string()));
            }
        };

        let cancel = shutdown.child_token();
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
        spawn_reader(receiver, events_tx.clone(), cancel.clone());

        let mut link = Link {
            sender,
            phase: ConnectionState::Connecting,
            status: None,
            heartbeat: None,
            events_tx,
            cancel,
        };
        self.transition(&mut link, ConnectionState::AwaitingHello);
        let hello_timeout = self.config.hello_timeout();
        let hello_deadline = deadline_after(hello_timeout);

        let outcome = loop {
            let awaiting_hello = link.phase == ConnectionState::AwaitingHello;
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(DisconnectCause::UserCancelled),
                () = tokio::time::sleep_until(hello_deadline), if awaiting_hello => {
                    warn!(?hello_timeout, "gateway sent no hello");
                    break Ok(DisconnectCause::network("timed out waiting for hello"));
                }
                event = events_rx.recv() => event,
            };
            let Some(event) = event else {
                break Ok(DisconnectCause::network("connection event channel closed"));
            };
            match self.handle_event(&mut link, event).await {
                Ok(None) => {}
                Ok(Some(cause)) => break Ok(cause),
                Err(e) => break Err(e),
            }
        };

        // Stop the reader and the timer before anything else can be sent.
        link.cancel.cancel();
        if let Some(heartbeat) = link.heartbeat.take() {
            heartbeat.stop();
            debug!(
                beats = heartbeat.beats(),
                running = heartbeat.is_running(),
                "heartbeat stopped"
            );
        }

        let code = if matches!(outcome, Ok(DisconnectCause::UserCancelled)) {
            self.transition(&mut link, ConnectionState::Closing);
            CloseCode::NORMAL
        } else {
            CloseCode::RECONNECT
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, link.sender.close(code.0)).await {
            Ok(Ok(())) => debug!(code = code.0, "closed gateway connection"),
            Ok(Err(e)) => debug!(error = %e, "close failed"),
            Err(_) => debug!("close timed out"),
        }

        outcome
    }

    fn transition<S>(&self, link: &mut Link<S>, to: ConnectionState) {
        debug!(from = %link.phase, %to, "connection state change");
        link.phase = to;
        self.state.store(to);
    }

    async fn handle_event<S: FrameSender>(&mut self, link: &mut Link<S>, event: LoopEvent) -> Step {
        match event {
            LoopEvent::Beat => Ok(self.on_beat(link).await),
            LoopEvent::Inbound(Err(e)) => {
                warn!(error = %e, "gateway connection failed");
                Ok(Some(DisconnectCause::network(e.to_string())))
            }
            LoopEvent::Inbound(Ok(Frame::Closed { code, reason })) => classify_close(code, reason),
            LoopEvent::Inbound(Ok(Frame::Data(bytes))) => match decode(&bytes) {
                Ok(envelope) => Ok(self.on_envelope(link, envelope).await),
                Err(e) => {
                    warn!(error = %e, len = bytes.len(), "malformed frame from gateway");
                    Ok(Some(DisconnectCause::network(format!("malformed frame: {e}"))))
                }
            },
        }
    }

    async fn on_beat<S: FrameSender>(&mut self, link: &mut Link<S>) -> Option<DisconnectCause> {
        let status = link.status.as_mut()?;
        match status.on_beat(Instant::now()) {
            BeatOutcome::Missed => {
                warn!(interval = ?status.interval(), "heartbeat was not acknowledged");
                Some(DisconnectCause::HeartbeatTimeout)
            }
            BeatOutcome::Send => {
                let seq = self.session.last_sequence();
                trace!(?seq, "sending heartbeat");
                send_envelope(&mut link.sender, &Envelope::heartbeat(seq)).await.err()
            }
        }
    }

    async fn on_envelope<S: FrameSender>(
        &mut self,
        link: &mut Link<S>,
        envelope: Envelope,
    ) -> Option<DisconnectCause> {
        self.session.observe(&envelope);
        if !envelope.op.is_known() {
            debug!(op = %envelope.op, "unknown opcode from gateway");
        }

        let outcome = match envelope.op {
            Opcode::Hello => self.on_hello(link, &envelope).await,
            Opcode::Dispatch => self.on_dispatch(link, &envelope),
            Opcode::Heartbeat => {
                debug!("gateway requested a heartbeat");
                let seq = self.session.last_sequence();
                send_envelope(&mut link.sender, &Envelope::heartbeat(seq)).await.err()
            }
            Opcode::HeartbeatAck => {
                self.on_heartbeat_ack(link);
                None
            }
            Opcode::Reconnect => {
                info!("gateway requested a reconnect");
                Some(DisconnectCause::ServerRequestedReconnect)
            }
            Opcode::InvalidSession => Some(on_invalid_session(link.phase, &envelope)),
            Opcode::Identify | Opcode::Resume => {
                warn!(op = %envelope.op, "ignoring client opcode sent by gateway");
                None
            }
            Opcode::Unknown(_) => None,
        };

        self.router.route(&envelope);
        outcome
    }

    async fn on_hello<S: FrameSender>(
        &mut self,
        link: &mut Link<S>,
        envelope: &Envelope,
    ) -> Option<DisconnectCause> {
        if link.phase != ConnectionState::AwaitingHello {
            warn!(state = %link.phase, "ignoring repeated hello");
            return None;
        }

        let hello = match envelope.payload_as::<Hello>() {
            Ok(hello) if hello.heartbeat_interval == 0 => {
                return Some(DisconnectCause::network("hello with zero heartbeat interval"));
            }
            Ok(hello)
                if Duration::from_millis(hello.heartbeat_interval) > MAX_HEARTBEAT_INTERVAL =>
            {
                warn!(interval_ms = hello.heartbeat_interval, "heartbeat interval out of range");
                return Some(DisconnectCause::network(format!(
                    "hello heartbeat interval {}ms out of range",
                    hello.heartbeat_interval
                )));
            }
            Ok(hello) => hello,
            Err(e) => {
                warn!(error = %e, "malformed hello");
                return Some(DisconnectCause::network(format!("malformed hello: {e}")));
            }
        };
        self.session.set_heartbeat_interval(hello);

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let jitter = initial_jitter(interval);
        debug!(
            interval_ms = hello.heartbeat_interval,
            jitter_ms = jitter.as_millis() as u64,
            "received hello"
        );
        link.status = Some(HeartbeatStatus::new(interval));
        link.heartbeat = Some(start_heartbeat_task(
            interval,
            jitter,
            link.events_tx.clone(),
            link.cancel.clone(),
        ));

        let resume = match (self.session.session_id(), self.session.last_sequence()) {
            (Some(session_id), Some(seq)) => Some(Resume {
                token: self.config.token.clone(),
                session_id: session_id.to_string(),
                seq,
            }),
            _ => None,
        };
        let (handshake, next) = match resume {
            Some(resume) => {
                info!(session_id = %resume.session_id, seq = resume.seq, "resuming session");
                (resume.into_envelope(), ConnectionState::Resuming)
            }
            None => {
                info!(intents = self.config.intents, "identifying");
                (self.config.identify().into_envelope(), ConnectionState::Identifying)
            }
        };
        let handshake = match handshake {
            Ok(envelope) => envelope,
            Err(e) => return Some(DisconnectCause::network(format!("encode failed: {e}"))),
        };

        if let Err(cause) = send_envelope(&mut link.sender, &handshake).await {
            return Some(cause);
        }
        self.transition(link, next);
        None
    }

    fn on_dispatch<S>(&mut self, link: &mut Link<S>, envelope: &Envelope) -> Option<DisconnectCause> {
        match (link.phase, envelope.event_name()) {
            (ConnectionState::Identifying, Some("READY")) => {
                let ready: Ready = match envelope.payload_as() {
                    Ok(ready) => ready,
                    Err(e) => {
                        warn!(error = %e, "malformed READY");
                        return Some(DisconnectCause::network(format!("malformed READY: {e}")));
                    }
                };
                self.session.establish(&ready);
                self.on_connected(link, false);
            }
            (ConnectionState::Resuming, Some("RESUMED")) => self.on_connected(link, true),
            _ => {}
        }
        None
    }

    fn on_connected<S>(&mut self, link: &mut Link<S>, resumed: bool) {
        self.transition(link, ConnectionState::Connected);
        self.policy.reset();

        let session_id = self.session.session_id().map(str::to_owned);
        info!(
            session_id = session_id.as_deref().unwrap_or("<none>"),
            resumed,
            "gateway session ready"
        );
        self.emit(GatewayEvent::Connected {
            session_id,
            resumed,
        });
    }

    fn on_heartbeat_ack<S>(&self, link: &mut Link<S>) {
        let Some(status) = link.status.as_mut() else {
            return;
        };
        if let Some(latency) = status.on_ack(Instant::now()) {
            trace!(latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
            self.emit(GatewayEvent::HeartbeatAcked { latency });
        }
    }
}

fn on_invalid_session(phase: ConnectionState, envelope: &Envelope) -> DisconnectCause {
    let flagged = invalid_session_resumable(envelope).unwrap_or_else(|e| {
        warn!(error = %e, "malformed invalid session payload");
        false
    });
    // A rejected resume is never retried as a resume.
    let resumable = flagged && phase != ConnectionState::Resuming;
    warn!(resumable, state = %phase, "gateway invalidated the session");
    DisconnectCause::InvalidSession { resumable }
}

/// Map a close frame from the gateway to a disconnect cause or a fatal error.
fn classify_close(code: Option<u16>, reason: String) -> Step {
    let Some(code) = code else {
        warn!(%reason, "gateway closed without a close code");
        return Ok(Some(DisconnectCause::network(format!(
            "closed without code: {reason}"
        ))));
    };

    let close = CloseCode(code);
    match close.action() {
        CloseAction::Fatal if close.is_authentication_failure() => {
            Err(GatewayError::AuthenticationRejected { code, reason })
        }
        CloseAction::Fatal => Err(GatewayError::FatalClose { code, reason }),
        CloseAction::Reidentify => {
            warn!(code, %reason, "gateway closed; session cannot be resumed");
            Ok(Some(DisconnectCause::InvalidSession { resumable: false }))
        }
        CloseAction::Resume => {
            warn!(code, %reason, "gateway closed the connection");
            Ok(Some(DisconnectCause::network(format!(
                "closed with code {code}: {reason}"
            ))))
        }
    }
}

async fn send_envelope<S: FrameSender>(sender: &mut S, envelope: &Envelope) -> Result<(), DisconnectCause> {
    let bytes = envelope
        .to_bytes()
        .map_err(|e| DisconnectCause::network(format!("encode failed: {e}")))?;
    sender.send(bytes).await.map_err(|e| {
        warn!(error = %e, op = %envelope.op, "failed to send to gateway");
        DisconnectCause::network(e.to_string())
    })
}

/// Forward frames into the connection loop until the transport ends or the
/// connection is torn down.
fn spawn_reader<R: FrameReceiver>(
    mut receiver: R,
    tx: mpsc::Sender<LoopEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                frame = receiver.receive() => frame,
            };
            let last = !matches!(frame, Ok(Frame::Data(_)));

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(LoopEvent::Inbound(frame)) => sent,
            };
            if sent.is_err() || last {
                break;
            }
        }
        trace!("reader task stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use test_case::test_case;

    #[test_case(4000, DisconnectCause::network("closed with code 4000: unknown") ; "unknown error resumes")]
    #[test_case(4008, DisconnectCause::network("closed with code 4008: unknown") ; "rate limited resumes")]
    #[test_case(1001, DisconnectCause::network("closed with code 1001: unknown") ; "going away resumes")]
    #[test_case(4007, DisconnectCause::InvalidSession { resumable: false } ; "invalid seq reidentifies")]
    #[test_case(4009, DisconnectCause::InvalidSession { resumable: false } ; "timed out reidentifies")]
    fn test_recoverable_close_codes(code: u16, expected: DisconnectCause) {
        let cause = classify_close(Some(code), "unknown".to_string()).unwrap();
        assert_eq!(cause, Some(expected));
    }

    #[test]
    fn test_authentication_close_is_fatal() {
        let err = classify_close(Some(4004), "bad token".to_string()).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::AuthenticationRejected { code: 4004, ref reason } if reason == "bad token"
        ));
    }

    #[test_case(4010 ; "invalid shard")]
    #[test_case(4011 ; "sharding required")]
    #[test_case(4012 ; "invalid api version")]
    #[test_case(4013 ; "invalid intents")]
    #[test_case(4014 ; "disallowed intents")]
    fn test_fatal_close_codes(code: u16) {
        let err = classify_close(Some(code), String::new()).unwrap_err();
        assert!(matches!(err, GatewayError::FatalClose { code: c, .. } if c == code));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_close_without_code_is_network_error() {
        let cause = classify_close(None, "eof".to_string()).unwrap();
        assert!(matches!(cause, Some(DisconnectCause::NetworkError { .. })));
    }

    #[test_case(json!(true), ConnectionState::Connected, true ; "resumable while connected")]
    #[test_case(json!(false), ConnectionState::Connected, false ; "not resumable")]
    #[test_case(json!(true), ConnectionState::Resuming, false ; "rejected resume")]
    #[test_case(Value::Null, ConnectionState::Identifying, false ; "missing payload")]
    #[test_case(json!({"resumable": true}), ConnectionState::Connected, false ; "malformed payload")]
    fn test_invalid_session(d: Value, phase: ConnectionState, resumable: bool) {
        let envelope = Envelope::new(Opcode::InvalidSession, d);
        assert_eq!(
            on_invalid_session(phase, &envelope),
            DisconnectCause::InvalidSession { resumable }
        );
    }
}
