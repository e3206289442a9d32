//! # Reconnecting WebSocket Transport
//!
//! Maintains a logical, always-on connection to one WebSocket endpoint over a
//! physical connection that may drop at any time.
//!
//! ## Sessions
//!
//! Every physical attempt runs as its own Tokio task and carries a session
//! number. `disconnect` and every new attempt bump the number, so anything a
//! stale task reports afterwards (frames, closure, a late successful open) is
//! ignored. This is what makes cancellation deterministic: once `disconnect`
//! returns, nothing from the old socket can reach the sinks or trigger a
//! reconnection.
//!
//! ## Event ordering
//!
//! Status changes and decoded records go through one FIFO queue. They are
//! enqueued under the state lock, in the order they happen, and delivered
//! outside of it by whichever thread currently owns the queue. Sinks may
//! therefore call back into the transport (e.g. `send` from `on_status`)
//! without deadlocking.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use super::config::TransportConfig;
use crate::core::errors::FeedError;
use crate::core::scheduler::{Scheduler, TaskToken, Wake};
use crate::core::sinks::{MessageSink, StatusSink};
use crate::core::status::ConnectionState;

/// How long a manual close waits for the close handshake before dropping
/// the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest prefix of an undecodable frame that ends up in the log.
const LOG_PREVIEW_LEN: usize = 120;

enum Outbound {
    Frame(Message),
    Close,
}

enum Event<T> {
    Status(ConnectionState, Option<String>),
    Message(T),
    DecodeError(String, serde_json::Error),
}

struct EventQueue<T> {
    queue: VecDeque<Event<T>>,
    draining: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingReconnect {
    ticket: u64,
    token: TaskToken,
}

struct LinkState {
    status: ConnectionState,
    attempts: u32,
    manual_close: bool,
    session: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    socket_task: Option<AbortHandle>,
    reconnect: Option<PendingReconnect>,
    next_ticket: u64,
}

struct Shared<T> {
    config: TransportConfig,
    runtime: Handle,
    scheduler: Arc<dyn Scheduler>,
    messages: Arc<dyn MessageSink<T>>,
    status: Arc<dyn StatusSink>,
    state: Mutex<LinkState>,
    events: Mutex<EventQueue<T>>,
}

/// # Transport
///
/// Cheap to clone; all clones drive the same logical connection. An open
/// connection keeps the transport alive until `disconnect` is called.
pub struct Transport<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Transport<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Transport<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Creates a transport in the `Closed` state. Nothing connects until
    /// `connect` is called.
    ///
    /// # Errors
    /// - `FeedError::InvalidConfig` if the configuration does not validate.
    /// - `FeedError::RuntimeUnavailable` outside a Tokio runtime.
    pub fn new(
        config: TransportConfig,
        scheduler: Arc<dyn Scheduler>,
        messages: Arc<dyn MessageSink<T>>,
        status: Arc<dyn StatusSink>,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        let runtime = Handle::try_current()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                runtime,
                scheduler,
                messages,
                status,
                state: Mutex::new(LinkState {
                    status: ConnectionState::Closed,
                    attempts: 0,
                    manual_close: false,
                    session: 0,
                    outbound: None,
                    socket_task: None,
                    reconnect: None,
                    next_ticket: 0,
                }),
                events: Mutex::new(EventQueue {
                    queue: VecDeque::new(),
                    draining: false,
                }),
            }),
        })
    }

    /// Starts connecting. No-op while open, and while an attempt is already
    /// in flight.
    ///
    /// A caller-initiated connect clears the manual-disconnect flag, resets
    /// the reconnection budget and supersedes any pending reconnection wait.
    pub fn connect(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.status == ConnectionState::Open {
                return;
            }
            let waiting = state.reconnect.is_some();
            if state.status == ConnectionState::Connecting && !waiting {
                log::debug!("Connect requested while an attempt is in flight; ignoring.");
                return;
            }
            if let Some(pending) = state.reconnect.take() {
                self.shared.scheduler.cancel(pending.token);
            }
            state.manual_close = false;
            state.attempts = 0;
            self.shared
                .transition(&mut state, ConnectionState::Connecting, None);
            Shared::start_attempt(&self.shared, &mut state);
        }
        self.shared.dispatch();
    }

    /// Closes the connection and cancels any pending reconnection.
    ///
    /// Safe to call at any time. Nothing reconnects afterwards until the
    /// caller calls `connect` again.
    pub fn disconnect(&self) {
        {
            let mut state = self.shared.lock_state();
            state.manual_close = true;
            state.session += 1;
            if let Some(pending) = state.reconnect.take() {
                self.shared.scheduler.cancel(pending.token);
                log::debug!("Pending reconnection cancelled by disconnect.");
            }

            let was_open = state.status == ConnectionState::Open;
            let task = state.socket_task.take();
            match state.outbound.take() {
                Some(outbound) if outbound.send(Outbound::Close).is_ok() => {}
                _ => {
                    if let Some(task) = task {
                        task.abort();
                    }
                }
            }

            if was_open {
                self.shared
                    .transition(&mut state, ConnectionState::Closing, None);
            }
            self.shared
                .transition(&mut state, ConnectionState::Closed, None);
            log::info!("Disconnected from {}", self.shared.config.url);
        }
        self.shared.dispatch();
    }

    /// Transmits a text payload. Returns `false` unless the connection is
    /// open; nothing is queued for later.
    pub fn send(&self, payload: &str) -> bool {
        let state = self.shared.lock_state();
        if state.status != ConnectionState::Open {
            return false;
        }
        match &state.outbound {
            Some(outbound) => outbound
                .send(Outbound::Frame(Message::text(payload.to_owned())))
                .is_ok(),
            None => false,
        }
    }

    /// Current state. Side-effect free.
    pub fn status(&self) -> ConnectionState {
        self.shared.lock_state().status
    }

    /// Consecutive abnormal closures since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.lock_state().attempts
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }
}

impl<T> Shared<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().expect("Transport state lock poisoned")
    }

    fn lock_events(&self) -> MutexGuard<'_, EventQueue<T>> {
        self.events.lock().expect("Transport event lock poisoned")
    }

    /// Records a state change and queues its notification. Must be called
    /// with the state lock held so queue order matches transition order.
    fn transition(&self, state: &mut LinkState, to: ConnectionState, detail: Option<String>) {
        if state.status == to {
            return;
        }
        log::debug!("Transport {:?} -> {:?}", state.status, to);
        state.status = to;
        self.lock_events().queue.push_back(Event::Status(to, detail));
    }

    fn start_attempt(shared: &Arc<Self>, state: &mut LinkState) {
        state.session += 1;
        let session = state.session;
        state.outbound = None;
        if let Some(task) = state.socket_task.take() {
            task.abort();
        }
        let owner = Arc::clone(shared);
        let join = shared
            .runtime
            .spawn(async move { owner.run_session(session).await });
        state.socket_task = Some(join.abort_handle());
    }

    async fn run_session(self: Arc<Self>, session: u64) {
        log::info!("Connecting to {}", self.config.url);

        let stream = match connect_async(self.config.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.on_closed(session, format!("connect failed: {}", e));
                return;
            }
        };
        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        let current = {
            let mut state = self.lock_state();
            if state.session == session && !state.manual_close {
                // Queued ahead of anything a caller can send.
                if let Some(handshake) = &self.config.handshake {
                    let _ = outbound_tx.send(Outbound::Frame(Message::text(handshake.clone())));
                }
                state.outbound = Some(outbound_tx);
                state.attempts = 0;
                self.transition(&mut state, ConnectionState::Open, None);
                true
            } else {
                false
            }
        };
        if !current {
            log::debug!("Session {} superseded before it opened; closing.", session);
            let _ = write.close().await;
            return;
        }
        log::info!("Connected to {}", self.config.url);
        self.dispatch();

        let reason = loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(Outbound::Frame(message)) => {
                        if let Err(e) = write.send(message).await {
                            break format!("send failed: {}", e);
                        }
                    }
                    Some(Outbound::Close) => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: String::from("Manual disconnect").into(),
                        };
                        let closing = async {
                            let _ = write.send(Message::Close(Some(frame))).await;
                            let _ = write.close().await;
                        };
                        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
                            log::warn!("Close handshake with {} timed out.", self.config.url);
                        }
                        return;
                    }
                    // The session was replaced; the new one owns the link now.
                    None => return,
                },
                inbound = read.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let text: &str = &text;
                        self.on_frame(session, text);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.on_frame(session, text),
                        Err(e) => log::warn!("Dropping non-UTF-8 binary frame ({} bytes): {}", bytes.len(), e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => {
                                let reason: &str = &frame.reason;
                                format!("closed by peer ({}): {}", u16::from(frame.code), reason)
                            }
                            None => "closed by peer".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read error: {}", e),
                    None => break "stream ended".to_string(),
                },
            }
        };

        self.on_closed(session, reason);
    }

    fn on_frame(&self, session: u64, text: &str) {
        let event = match serde_json::from_str::<T>(text) {
            Ok(item) => Event::Message(item),
            Err(e) => {
                log::warn!(
                    "Dropping undecodable frame ({}): {}",
                    e,
                    preview(text, LOG_PREVIEW_LEN)
                );
                Event::DecodeError(text.to_string(), e)
            }
        };
        {
            let state = self.lock_state();
            if state.session != session {
                return;
            }
            self.lock_events().queue.push_back(event);
        }
        self.dispatch();
    }

    fn on_closed(self: &Arc<Self>, session: u64, reason: String) {
        {
            let mut state = self.lock_state();
            if state.session != session || state.manual_close {
                return;
            }
            state.outbound = None;
            state.socket_task = None;

            let policy = self.config.reconnect;
            if policy.should_retry(state.attempts) {
                state.attempts += 1;
                let delay = policy.delay_for(state.attempts);
                log::warn!(
                    "Connection to {} lost: {}. Reconnect attempt {}/{} in {}ms.",
                    self.config.url,
                    reason,
                    state.attempts,
                    policy.max_attempts,
                    delay.as_millis()
                );
                let schedule = format!(
                    "reconnect attempt {}/{} in {}ms",
                    state.attempts,
                    policy.max_attempts,
                    delay.as_millis()
                );
                self.transition(&mut state, ConnectionState::Closed, Some(reason));
                self.transition(&mut state, ConnectionState::Connecting, Some(schedule));

                state.next_ticket += 1;
                let ticket = state.next_ticket;
                let owner = Arc::clone(self);
                let token = self.scheduler.schedule(
                    Wake::After(delay),
                    Box::new(move || Shared::reconnect_due(&owner, ticket)),
                );
                state.reconnect = Some(PendingReconnect { ticket, token });
            } else {
                log::error!(
                    "Connection to {} lost: {}. Giving up after {} reconnect attempts.",
                    self.config.url,
                    reason,
                    state.attempts
                );
                let detail = format!(
                    "{}; gave up after {} reconnect attempts",
                    reason, state.attempts
                );
                self.transition(&mut state, ConnectionState::Closed, Some(detail));
            }
        }
        self.dispatch();
    }

    fn reconnect_due(shared: &Arc<Self>, ticket: u64) {
        let mut state = shared.lock_state();
        match state.reconnect {
            Some(pending) if pending.ticket == ticket => state.reconnect = None,
            _ => return,
        }
        if state.manual_close {
            return;
        }
        log::info!(
            "Reconnecting to {} (attempt {}/{})",
            shared.config.url,
            state.attempts,
            shared.config.reconnect.max_attempts
        );
        Shared::start_attempt(shared, &mut state);
    }

    /// Delivers queued events in order. Only one thread drains at a time;
    /// others just enqueue and leave the delivery to it.
    fn dispatch(&self) {
        {
            let mut events = self.lock_events();
            if events.draining {
                return;
            }
            events.draining = true;
        }
        loop {
            let event = {
                let mut events = self.lock_events();
                match events.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        events.draining = false;
                        return;
                    }
                }
            };
            let delivered = catch_unwind(AssertUnwindSafe(|| match event {
                Event::Status(state, detail) => self.status.on_status(state, detail.as_deref()),
                Event::Message(item) => self.messages.on_message(item),
                Event::DecodeError(raw, error) => self.messages.on_decode_error(&raw, &error),
            }));
            if delivered.is_err() {
                log::error!("Transport sink panicked; continuing with the next event.");
            }
        }
    }
}

fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
