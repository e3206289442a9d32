#![allow(dead_code)]

use lib_feed::{ConnectionState, MessageSink, StatusSink};
use serde::Deserialize;
use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub id: u32,
}

pub enum Received {
    Record(Record),
    DecodeError(String),
}

/// Forwards everything the transport reports into channels the test awaits.
pub struct Recorder {
    statuses: mpsc::UnboundedSender<(ConnectionState, Option<String>)>,
    messages: mpsc::UnboundedSender<Received>,
}

impl Recorder {
    pub fn new() -> (
        Recorder,
        mpsc::UnboundedReceiver<(ConnectionState, Option<String>)>,
        mpsc::UnboundedReceiver<Received>,
    ) {
        let (statuses, status_rx) = mpsc::unbounded_channel();
        let (messages, message_rx) = mpsc::unbounded_channel();
        (Recorder { statuses, messages }, status_rx, message_rx)
    }
}

impl StatusSink for Recorder {
    fn on_status(&self, state: ConnectionState, detail: Option<&str>) {
        let _ = self.statuses.send((state, detail.map(str::to_owned)));
    }
}

impl MessageSink<Record> for Recorder {
    fn on_message(&self, item: Record) {
        let _ = self.messages.send(Received::Record(item));
    }

    fn on_decode_error(&self, raw: &str, _error: &dyn Error) {
        let _ = self.messages.send(Received::DecodeError(raw.to_string()));
    }
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed")
}

/// Collects statuses until `done` matches one of them (inclusive).
pub async fn statuses_until(
    rx: &mut mpsc::UnboundedReceiver<(ConnectionState, Option<String>)>,
    done: impl Fn(&(ConnectionState, Option<String>)) -> bool,
) -> Vec<(ConnectionState, Option<String>)> {
    let mut seen = Vec::new();
    loop {
        let event = next(rx).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

pub fn states(events: &[(ConnectionState, Option<String>)]) -> Vec<ConnectionState> {
    events.iter().map(|(state, _)| *state).collect()
}

pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    (listener, format!("ws://{}", addr))
}

/// A URL nothing listens on.
pub async fn refused_url() -> String {
    let (listener, url) = bind().await;
    drop(listener);
    url
}
