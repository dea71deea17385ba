use crate::ai;
use crate::error::ChannelError;
use crate::message::{ChannelMode, ChatMessage};
use crate::session::Session;
use crate::transport::MessageTransport;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Connection lifecycle of the push subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// What to do when the push connection breaks.
///
/// `Never` is the inherited behavior: the subscription is terminal and
/// recovery is user-initiated. `Backoff` retries with capped exponential
/// delays so a dead server cannot be hot-looped.
#[derive(Debug, Clone, Default)]
pub enum ReconnectPolicy {
    #[default]
    Never,
    Backoff {
        initial: Duration,
        max: Duration,
    },
}

/// What the channel reports to its driver, one item per `next_event` call.
#[derive(Debug)]
pub enum ChannelEvent {
    Connected,
    Message(ChatMessage),
    Reconnecting {
        error: Option<String>,
        delay: Duration,
    },
    Disconnected {
        error: Option<String>,
    },
}

enum StreamEvent {
    Connected,
    Frame(String),
    Retrying {
        error: Option<String>,
        delay: Duration,
    },
    Closed {
        error: Option<String>,
    },
}

/// The live chat channel: one push subscription per session, two
/// append-only message logs, and the paired send paths.
///
/// All log mutation happens on the task driving `next_event` and the send
/// methods; the subscription task only forwards raw frames over an mpsc
/// queue. Each `open` creates a fresh queue, so frames from a torn-down
/// subscription can never reach a later incarnation of the channel.
pub struct LiveChannel {
    transport: Arc<dyn MessageTransport>,
    session: Session,
    reconnect: ReconnectPolicy,
    state: ChannelState,
    mode: ChannelMode,
    peer_log: Vec<ChatMessage>,
    ai_log: Vec<ChatMessage>,
    high_water: Option<DateTime<Utc>>,
    rx: Option<mpsc::Receiver<StreamEvent>>,
    task: Option<JoinHandle<()>>,
}

impl LiveChannel {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        session: Session,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            session,
            reconnect,
            state: ChannelState::Disconnected,
            mode: ChannelMode::Peer,
            peer_log: Vec::new(),
            ai_log: Vec::new(),
            high_water: None,
            rx: None,
            task: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    /// Switch which log is displayed. Neither log is merged or cleared.
    pub fn set_mode(&mut self, mode: ChannelMode) {
        self.mode = mode;
    }

    pub fn log(&self, mode: ChannelMode) -> &[ChatMessage] {
        match mode {
            ChannelMode::Peer => &self.peer_log,
            ChannelMode::Ai => &self.ai_log,
        }
    }

    pub fn active_log(&self) -> &[ChatMessage] {
        self.log(self.mode)
    }

    /// Establish the push subscription. Any previous subscription is
    /// released first, so at most one is ever live.
    pub fn open(&mut self) {
        self.close();
        info!("Opening chat channel for {}", self.session.base_url);
        self.state = ChannelState::Connecting;

        let (tx, rx) = mpsc::channel(64);
        let transport = self.transport.clone();
        let url = self.session.endpoint("/chat");
        let policy = self.reconnect.clone();
        self.task = Some(tokio::spawn(run_subscription(transport, url, policy, tx)));
        self.rx = Some(rx);
    }

    /// Release the subscription. Safe to call at any time, any number of
    /// times; in-flight frames from the released subscription are dropped
    /// with the queue and can never be appended.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Chat subscription released");
        }
        self.rx = None;
        self.state = ChannelState::Disconnected;
    }

    /// Next reportable channel event. Filtered-out frames are consumed
    /// internally; when no subscription is open this pends forever, which
    /// makes it safe to park in a `select!` arm.
    pub async fn next_event(&mut self) -> ChannelEvent {
        loop {
            let received = match self.rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => {
                    std::future::pending::<()>().await;
                    unreachable!();
                }
            };
            match received {
                Some(StreamEvent::Connected) => {
                    self.state = ChannelState::Connected;
                    return ChannelEvent::Connected;
                }
                Some(StreamEvent::Frame(frame)) => {
                    if let Some(msg) = self.on_frame(&frame) {
                        return ChannelEvent::Message(msg);
                    }
                }
                Some(StreamEvent::Retrying { error, delay }) => {
                    self.state = ChannelState::Connecting;
                    return ChannelEvent::Reconnecting { error, delay };
                }
                Some(StreamEvent::Closed { error }) => {
                    self.close();
                    return ChannelEvent::Disconnected { error };
                }
                None => {
                    // Subscription task ended without a close notice.
                    self.close();
                    return ChannelEvent::Disconnected { error: None };
                }
            }
        }
    }

    /// Apply the inbound filter to one raw frame and append on acceptance.
    ///
    /// A frame is accepted only if it decodes, was not authored by the
    /// local identity (own sends are appended optimistically at send time),
    /// and its timestamp is strictly newer than the last accepted one. The
    /// high-water mark replaces the last accepted timestamp only — this is
    /// deliberately weaker than set-based dedup.
    ///
    /// Accepted messages always land in the peer log: the push endpoint
    /// only ever carries peer traffic, so routing by the currently viewed
    /// mode would misfile (or lose) messages while the AI view is open.
    fn on_frame(&mut self, frame: &str) -> Option<ChatMessage> {
        let msg = ChatMessage::decode(frame)?;
        if msg.author == self.session.identity {
            return None;
        }
        if let Some(mark) = self.high_water {
            if msg.sent_at <= mark {
                debug!("Dropping stale message from {} at {}", msg.author, msg.sent_at);
                return None;
            }
        }
        self.high_water = Some(msg.sent_at);
        self.peer_log.push(msg.clone());
        Some(msg)
    }

    /// Post a message to the peer room and append it optimistically.
    /// The push channel never echoes our own messages back (they are
    /// filtered by author), so the local append is the only copy we keep.
    pub async fn send_peer(&mut self, body: &str) -> Result<ChatMessage, ChannelError> {
        if body.trim().is_empty() {
            return Err(ChannelError::Validation("Please enter a message.".into()));
        }

        let msg = ChatMessage::new(self.session.identity.clone(), body);
        let wire = serde_json::to_value(&msg).map_err(ChannelError::transport)?;
        self.transport
            .post_json(&self.session.endpoint("/send-message"), &wire)
            .await?;

        self.peer_log.push(msg.clone());
        Ok(msg)
    }

    /// Send a prompt to the AI backend. On success the AI log gains the
    /// prompt and then the model's reply; on failure neither is appended.
    pub async fn send_ai(
        &mut self,
        model: &str,
        prompt: &str,
    ) -> Result<(ChatMessage, ChatMessage), ChannelError> {
        if prompt.trim().is_empty() {
            return Err(ChannelError::Validation("Please enter a message.".into()));
        }
        if model.is_empty() {
            return Err(ChannelError::Validation("Please select a model.".into()));
        }

        let answer =
            ai::generate(self.transport.as_ref(), &self.session, model, prompt).await?;

        let sent = ChatMessage::new(self.session.identity.clone(), prompt);
        let reply = ChatMessage::new(model, answer);
        self.ai_log.push(sent.clone());
        self.ai_log.push(reply.clone());
        Ok((sent, reply))
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_subscription(
    transport: Arc<dyn MessageTransport>,
    url: String,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut delay = match &policy {
        ReconnectPolicy::Backoff { initial, .. } => *initial,
        ReconnectPolicy::Never => Duration::ZERO,
    };

    loop {
        let failure = match transport.subscribe(&url).await {
            Ok(mut frames) => {
                if tx.send(StreamEvent::Connected).await.is_err() {
                    return;
                }
                if let ReconnectPolicy::Backoff { initial, .. } = &policy {
                    delay = *initial;
                }
                let mut failure = None;
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(text) => {
                            if tx.send(StreamEvent::Frame(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                }
                failure
            }
            Err(e) => Some(e.to_string()),
        };

        match &policy {
            ReconnectPolicy::Never => {
                let _ = tx.send(StreamEvent::Closed { error: failure }).await;
                return;
            }
            ReconnectPolicy::Backoff { max, .. } => {
                if tx
                    .send(StreamEvent::Retrying {
                        error: failure,
                        delay,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(*max);
            }
        }
    }
}
