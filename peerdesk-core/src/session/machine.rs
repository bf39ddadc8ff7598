//! The session actor.
//!
//! One task owns everything a session touches: both legs, the transfer
//! table, the frame pipeline and the pending inbound call. The UI talks to
//! it through a cloneable [`SessionHandle`] and observes it through a
//! `watch` of [`SessionState`] plus a stream of [`SessionEvent`]s.
//!
//! Every transport or capture call that can take a while runs on a helper
//! task and reports back on an internal channel, so the actor never stops
//! reading the control leg while a leg opens or a capture target is
//! enumerated.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::codec::encode_message;
use crate::config::SessionConfig;
use crate::dispatch::{Dispatched, Dispatcher};
use crate::error::{CaptureError, PeerdeskError, ProtocolViolation, TransportError};
use crate::input::{InputInjector, MoveThrottle, PointerSample, UnavailableInjector, map_pointer};
use crate::media::{
    CaptureProvider, CaptureStream, CaptureTarget, FramePipeline, PipelineOutputs, VideoFrame,
    choose_target,
};
use crate::protocol::{InputEvent, Message, MouseButton, TransferId};
use crate::session::state::{CloseCause, Role, SessionState};
use crate::task::{SaveEvent, SaveQueue};
use crate::transfer::{
    ArtifactSink, DirectorySink, MessageSink, OutgoingFile, SentFile, TransferIdIssuer, send_file,
};
use crate::transport::{
    DataLeg, IncomingCall, IncomingData, MediaLeg, MediaSource, PeerId, Transport, TransportEvent,
};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const INTERNAL_CHANNEL_CAPACITY: usize = 64;
/// Control messages held while the session is still opening.
const EARLY_MESSAGE_LIMIT: usize = 256;

/// Where received files go when no sink is configured.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

// ── Capabilities ─────────────────────────────────────────────────

bitflags! {
    /// What this side of the session can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// A capture provider is present; otherwise accepting falls back
        /// to the platform picker.
        const CAPTURE         = 0b0000_0001;
        /// Received input is injected into the OS.
        const INPUT_INJECTION = 0b0000_0010;
        const FILE_TRANSFER   = 0b0000_0100;
    }
}

// ── SessionEvent ─────────────────────────────────────────────────

/// Notifications for the UI layer. State changes travel separately on
/// the state `watch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A peer is calling; answer with `accept_call` or `reject_call`.
    IncomingCall { remote: PeerId },
    /// The acceptance timeout expired and the call was rejected.
    OfferExpired { remote: PeerId },
    /// Accepting failed locally; the call is still pending.
    CaptureFailed(CaptureError),
    TransferStarted {
        id: TransferId,
        name: String,
        size: u64,
    },
    TransferCompleted {
        id: TransferId,
        name: String,
        bytes: u64,
        /// BLAKE3 hex digest of the content.
        digest: String,
    },
    TransferFailed { id: TransferId, reason: String },
    FileSaved {
        id: TransferId,
        name: String,
        location: String,
    },
    SaveFailed {
        id: TransferId,
        name: String,
        reason: String,
    },
    FileSent {
        id: TransferId,
        name: String,
        bytes: u64,
    },
    FileSendFailed {
        id: TransferId,
        name: String,
        reason: String,
    },
    /// A control message was dropped.
    ProtocolViolation(ProtocolViolation),
    Closed(CloseCause),
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

// ── Commands ─────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T, PeerdeskError>>;

enum Command {
    Connect {
        remote: PeerId,
        reply: Reply<()>,
    },
    Accept {
        target: Option<String>,
        reply: Reply<()>,
    },
    Reject {
        reply: Reply<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SendFile {
        file: OutgoingFile,
        reply: Reply<TransferId>,
    },
    SetRemoteControl(bool),
    PointerMove(PointerSample),
    PointerClick {
        button: MouseButton,
        at: Option<PointerSample>,
    },
    KeyPress(String),
}

/// Results from helper tasks.
enum Internal {
    DataOpened {
        remote: PeerId,
        result: Result<Box<dyn DataLeg>, TransportError>,
    },
    MediaOpened(Result<Box<dyn MediaLeg>, TransportError>),
    Accepted {
        reply: Reply<()>,
        outcome: AcceptOutcome,
    },
    Outbound {
        message: Message,
        ack: Reply<()>,
    },
    SendFinished {
        id: TransferId,
        name: String,
        result: Result<SentFile, PeerdeskError>,
    },
}

enum AcceptOutcome {
    Answered {
        media: Box<dyn MediaLeg>,
        capture: Option<(CaptureTarget, CaptureStream)>,
    },
    CaptureFailed {
        call: IncomingCall,
        error: CaptureError,
    },
    TransportFailed(TransportError),
}

impl Internal {
    /// Release whatever a result holds when nobody will consume it.
    async fn discard(self, capture: Option<&dyn CaptureProvider>) {
        match self {
            Self::DataOpened { result: Ok(mut leg), .. } => leg.close().await,
            Self::MediaOpened(Ok(mut leg)) => leg.close().await,
            Self::Accepted {
                outcome:
                    AcceptOutcome::Answered {
                        mut media,
                        capture: stream,
                    },
                ..
            } => {
                media.close().await;
                if let (Some(provider), Some(_)) = (capture, stream) {
                    provider.stop_capture().await;
                }
            }
            _ => {}
        }
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    local_id: watch::Receiver<Option<PeerId>>,
    remote_frames: watch::Receiver<Option<VideoFrame>>,
    capabilities: Capabilities,
}

impl SessionHandle {
    /// Dial `remote`. Returns once the attempt has started; watch the
    /// state for `Active` or `Closed`.
    pub async fn connect(&self, remote: impl Into<PeerId>) -> Result<(), PeerdeskError> {
        let remote = remote.into();
        self.request(|reply| Command::Connect { remote, reply })
            .await
    }

    /// Accept the pending call, sharing `target` or the default target.
    pub async fn accept_call(&self, target: Option<String>) -> Result<(), PeerdeskError> {
        self.request(|reply| Command::Accept { target, reply }).await
    }

    pub async fn reject_call(&self) -> Result<(), PeerdeskError> {
        self.request(|reply| Command::Reject { reply }).await
    }

    /// Tear the session down. Safe from any state and idempotent; once it
    /// returns no further messages are delivered.
    pub async fn disconnect(&self) -> Result<(), PeerdeskError> {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Disconnect { reply })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }

    /// Send a local file to the peer. Returns its transfer id once queued.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<TransferId, PeerdeskError> {
        let file = OutgoingFile::open(path).await?;
        self.send(file).await
    }

    pub async fn send(&self, file: OutgoingFile) -> Result<TransferId, PeerdeskError> {
        self.request(|reply| Command::SendFile { file, reply }).await
    }

    pub async fn set_remote_control(&self, enabled: bool) -> Result<(), PeerdeskError> {
        self.notify(Command::SetRemoteControl(enabled)).await
    }

    pub async fn pointer_move(&self, sample: PointerSample) -> Result<(), PeerdeskError> {
        self.notify(Command::PointerMove(sample)).await
    }

    /// `button_code` follows the DOM convention: 0 left, 2 right.
    pub async fn pointer_click(
        &self,
        button_code: i16,
        at: Option<PointerSample>,
    ) -> Result<(), PeerdeskError> {
        let button = MouseButton::from_button_code(button_code);
        self.notify(Command::PointerClick { button, at }).await
    }

    pub async fn key_press(&self, key: impl Into<String>) -> Result<(), PeerdeskError> {
        self.notify(Command::KeyPress(key.into())).await
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState, PeerdeskError> {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(predicate)
            .await
            .map_err(|_| PeerdeskError::SessionClosed)?
            .clone();
        Ok(matched)
    }

    /// The transport-assigned id, once registration has completed.
    pub async fn local_id(&self) -> Result<PeerId, PeerdeskError> {
        let mut local_id = self.local_id.clone();
        let id = local_id
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PeerdeskError::SessionClosed)?
            .clone();
        id.ok_or(PeerdeskError::SessionClosed)
    }

    /// Latest frame received on the media leg.
    pub fn remote_frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.remote_frames.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PeerdeskError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| PeerdeskError::SessionClosed)?;
        response.await.map_err(|_| PeerdeskError::SessionClosed)?
    }

    async fn notify(&self, command: Command) -> Result<(), PeerdeskError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PeerdeskError::SessionClosed)
    }
}

// ── SessionBuilder ───────────────────────────────────────────────

pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    capture: Option<Arc<dyn CaptureProvider>>,
    injector: Arc<dyn InputInjector>,
    sink: Arc<dyn ArtifactSink>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn with_capture(mut self, capture: Arc<dyn CaptureProvider>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_injector(mut self, injector: Arc<dyn InputInjector>) -> Self {
        self.injector = injector;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::FILE_TRANSFER;
        caps.set(Capabilities::CAPTURE, self.capture.is_some());
        caps.set(Capabilities::INPUT_INJECTION, self.injector.is_available());
        caps
    }

    /// Start the session task. It registers with the transport first.
    pub fn spawn(self) -> (SessionHandle, SessionEvents) {
        let capabilities = self.capabilities();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (local_id_tx, local_id_rx) = watch::channel(None);
        let (frames_tx, frames_rx) = watch::channel(None);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let outputs = Outputs {
            state: state_tx,
            local_id: local_id_tx,
            remote_frames: frames_tx,
            events: events_tx,
        };
        tokio::spawn(Session::start(self, command_rx, outputs));

        let handle = SessionHandle {
            commands: command_tx,
            state: state_rx,
            local_id: local_id_rx,
            remote_frames: frames_rx,
            capabilities,
        };
        (handle, events_rx)
    }
}

// ── Session actor ────────────────────────────────────────────────

struct Outputs {
    state: watch::Sender<SessionState>,
    local_id: watch::Sender<Option<PeerId>>,
    remote_frames: watch::Sender<Option<VideoFrame>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

struct RunningPipeline {
    task: JoinHandle<()>,
    outputs: PipelineOutputs,
    target: CaptureTarget,
}

/// Owns one session for its whole life.
pub struct Session {
    transport: Arc<dyn Transport>,
    capture: Option<Arc<dyn CaptureProvider>>,
    config: SessionConfig,
    local_id: PeerId,

    state: SessionState,
    out: Outputs,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    transport_events: mpsc::Receiver<TransportEvent>,

    control: Option<Box<dyn DataLeg>>,
    control_remote: Option<PeerId>,
    media: Option<Box<dyn MediaLeg>>,
    pending_call: Option<IncomingCall>,
    /// A rejected caller whose control leg has not arrived yet.
    declined: Option<PeerId>,
    accepting: bool,
    acceptance_deadline: Option<Instant>,
    leg_tasks: Vec<AbortHandle>,
    early: Vec<Bytes>,

    dispatcher: Dispatcher,
    saves: SaveQueue,
    issuer: TransferIdIssuer,
    sends: HashMap<TransferId, AbortHandle>,

    pipeline: Option<RunningPipeline>,
    resample: Interval,
    throttle: MoveThrottle,
    remote_control: bool,
}

impl Session {
    pub fn builder(transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder {
            transport,
            capture: None,
            injector: Arc::new(UnavailableInjector),
            sink: Arc::new(DirectorySink::new(DEFAULT_DOWNLOAD_DIR)),
            config: SessionConfig::default(),
        }
    }

    async fn start(builder: SessionBuilder, mut commands: mpsc::Receiver<Command>, out: Outputs) {
        // Commands that arrive while registering are replayed afterwards,
        // except a disconnect, which ends the session on the spot.
        let mut deferred = Vec::new();
        let registered = {
            let identify = builder.transport.identify();
            tokio::pin!(identify);
            loop {
                tokio::select! {
                    result = &mut identify => break result,
                    command = commands.recv() => match command {
                        Some(Command::Disconnect { reply }) => {
                            close_unregistered(&out, CloseCause::LocalDisconnect);
                            let _ = reply.send(());
                            return;
                        }
                        Some(command) => deferred.push(command),
                        None => {
                            close_unregistered(&out, CloseCause::LocalDisconnect);
                            return;
                        }
                    },
                }
            }
        };
        let identity = match registered {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(kind = %e.kind, detail = %e.detail, "transport registration failed");
                close_unregistered(&out, CloseCause::Transport(e));
                return;
            }
        };

        let SessionBuilder {
            transport,
            capture,
            injector,
            sink,
            config,
        } = builder;

        let mut resample = tokio::time::interval(config.media.resample_period());
        resample.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);

        let mut session = Session {
            dispatcher: Dispatcher::new(injector, config.transfer.max_file_size),
            saves: SaveQueue::new(sink),
            issuer: TransferIdIssuer::new(identity.local_id.as_str()),
            throttle: MoveThrottle::new(config.input.move_interval()),
            remote_control: config.input.remote_control_enabled,
            transport,
            capture,
            config,
            local_id: identity.local_id,
            state: SessionState::Idle,
            out,
            commands,
            internal_tx,
            internal_rx,
            transport_events: identity.events,
            control: None,
            control_remote: None,
            media: None,
            pending_call: None,
            declined: None,
            accepting: false,
            acceptance_deadline: None,
            leg_tasks: Vec::new(),
            early: Vec::new(),
            sends: HashMap::new(),
            pipeline: None,
            resample,
        };

        if session.state.advertise(session.local_id.clone()).is_ok() {
            session.out.local_id.send_replace(Some(session.local_id.clone()));
            session.publish();
        }
        for command in deferred {
            session.on_command(command).await;
        }
        session.run().await;
    }

    async fn run(mut self) {
        while !self.state.is_closed() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => self.finish(CloseCause::LocalDisconnect).await,
                },
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await,
                Some(event) = self.transport_events.recv() => self.on_transport_event(event).await,
                inbound = recv_control(&mut self.control) => self.on_control(inbound).await,
                frame = recv_media(&mut self.media) => self.on_remote_frame(frame).await,
                Some(saved) = self.saves.recv() => self.on_saved(saved),
                _ = self.resample.tick(), if self.pipeline.is_some() && self.media.is_some() => {
                    self.push_surface().await
                }
                _ = sleep_until(self.acceptance_deadline) => self.expire_offer().await,
            }
        }
        tracing::debug!(pending_saves = self.saves.running(), "session task finished");
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { remote, reply } => {
                let result = self.connect(remote).await;
                let _ = reply.send(result);
            }
            Command::Accept { target, reply } => self.accept(target, reply),
            Command::Reject { reply } => {
                let result = self.reject().await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.finish(CloseCause::LocalDisconnect).await;
                let _ = reply.send(());
            }
            Command::SendFile { file, reply } => {
                let _ = reply.send(self.start_send(file));
            }
            Command::SetRemoteControl(enabled) => {
                tracing::info!(enabled, "remote control toggled");
                self.remote_control = enabled;
                self.throttle.reset();
            }
            Command::PointerMove(sample) => {
                if !self.input_allowed() {
                    return;
                }
                let Some(point) = map_pointer(&sample) else {
                    return;
                };
                if self.throttle.admit(Instant::now()) {
                    let event = InputEvent::MouseMove {
                        x: point.x,
                        y: point.y,
                    };
                    self.send_input(event).await;
                }
            }
            Command::PointerClick { button, at } => {
                if !self.input_allowed() {
                    return;
                }
                let point = at.as_ref().and_then(map_pointer);
                let event = InputEvent::MouseClick {
                    button,
                    x: point.map(|p| p.x),
                    y: point.map(|p| p.y),
                };
                self.send_input(event).await;
            }
            Command::KeyPress(key) => {
                if self.input_allowed() {
                    self.send_input(InputEvent::KeyPress { key }).await;
                }
            }
        }
    }

    async fn connect(&mut self, remote: PeerId) -> Result<(), PeerdeskError> {
        self.state.begin_connect(remote.clone())?;
        self.publish();
        tracing::info!(%remote, "connecting");

        // An inbound control leg from an unanswered peer is not ours to keep.
        self.drop_control().await;

        let limit = self.config.session.connect_timeout();

        let transport = Arc::clone(&self.transport);
        let tx = self.internal_tx.clone();
        let target = remote.clone();
        let data = tokio::spawn(async move {
            let result = with_timeout(limit, transport.connect_data(&target)).await;
            deliver(&tx, Internal::DataOpened { remote: target, result }, None).await;
        });

        let transport = Arc::clone(&self.transport);
        let tx = self.internal_tx.clone();
        let media = tokio::spawn(async move {
            let result = with_timeout(limit, transport.call(&remote, MediaSource::Placeholder)).await;
            deliver(&tx, Internal::MediaOpened(result), None).await;
        });

        self.leg_tasks.push(data.abort_handle());
        self.leg_tasks.push(media.abort_handle());
        Ok(())
    }

    fn accept(&mut self, target: Option<String>, reply: Reply<()>) {
        let call = match (&self.state, self.accepting) {
            (SessionState::AwaitingAcceptance { .. }, false) => self.pending_call.take(),
            _ => None,
        };
        let Some(call) = call else {
            let _ = reply.send(Err(self.invalid("accept")));
            return;
        };

        self.accepting = true;
        self.acceptance_deadline = None;
        tracing::info!(remote = %call.remote, ?target, "accepting call");

        let transport = Arc::clone(&self.transport);
        let capture = self.capture.clone();
        let tx = self.internal_tx.clone();
        let limit = self.config.session.connect_timeout();
        let task = tokio::spawn(async move {
            let outcome = answer_call(transport, capture.clone(), call, target, limit).await;
            deliver(&tx, Internal::Accepted { reply, outcome }, capture.as_deref()).await;
        });
        self.leg_tasks.push(task.abort_handle());
    }

    async fn reject(&mut self) -> Result<(), PeerdeskError> {
        if !matches!(self.state, SessionState::AwaitingAcceptance { .. }) || self.accepting {
            return Err(self.invalid("reject"));
        }
        let Some(call) = self.pending_call.take() else {
            return Err(self.invalid("reject"));
        };

        let remote = call.remote.clone();
        tracing::info!(%remote, "rejecting call");
        self.transport.reject(call).await;
        if self.control_remote.as_ref() == Some(&remote) {
            self.drop_control().await;
        } else {
            self.declined = Some(remote);
        }

        self.acceptance_deadline = None;
        self.state.call_rejected(self.local_id.clone())?;
        self.publish();
        Ok(())
    }

    fn start_send(&mut self, file: OutgoingFile) -> Result<TransferId, PeerdeskError> {
        if !self.state.is_active() || self.control.is_none() {
            return Err(self.invalid("send a file"));
        }

        let id = self.issuer.issue(&file.name, file.size);
        let name = file.name.clone();
        tracing::info!(transfer = %id, %name, size = file.size, "sending file");

        let chunk_size = self.config.transfer.chunk_size;
        let tx = self.internal_tx.clone();
        let mut sink = OutboundSink {
            tx: self.internal_tx.clone(),
        };
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let result = send_file(file, task_id.clone(), chunk_size, &mut sink).await;
            let finished = Internal::SendFinished {
                id: task_id,
                name,
                result,
            };
            let _ = tx.send(finished).await;
        });
        self.sends.insert(id.clone(), task.abort_handle());
        Ok(id)
    }

    fn input_allowed(&self) -> bool {
        self.remote_control && self.state.is_active() && self.control.is_some()
    }

    async fn send_input(&mut self, event: InputEvent) {
        tracing::trace!(kind = event.kind(), "sending input");
        // Failures close the session inside `send_control`.
        let _ = self.send_control(&Message::input(event)).await;
    }

    // ── Helper results ───────────────────────────────────────────

    async fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::DataOpened { remote, result } => self.on_data_opened(remote, result).await,
            Internal::MediaOpened(result) => self.on_media_opened(result).await,
            Internal::Accepted { reply, outcome } => self.on_accepted(reply, outcome).await,
            Internal::Outbound { message, ack } => {
                let result = self.send_control(&message).await;
                let _ = ack.send(result);
            }
            Internal::SendFinished { id, name, result } => {
                self.sends.remove(&id);
                match result {
                    Ok(sent) => {
                        tracing::info!(transfer = %id, bytes = sent.bytes, chunks = sent.chunks, "file sent");
                        self.emit(SessionEvent::FileSent {
                            id,
                            name,
                            bytes: sent.bytes,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(transfer = %id, error = %e, "file send failed");
                        self.emit(SessionEvent::FileSendFailed {
                            id,
                            name,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn on_data_opened(
        &mut self,
        remote: PeerId,
        result: Result<Box<dyn DataLeg>, TransportError>,
    ) {
        let mut leg = match result {
            Ok(leg) => leg,
            Err(e) if matches!(self.state, SessionState::Connecting { .. }) => {
                return self.fail(e).await;
            }
            Err(e) => {
                tracing::warn!(%remote, error = %e, "inbound control leg failed to open");
                return;
            }
        };

        if self.declined.as_ref() == Some(&remote) {
            self.declined = None;
            tracing::debug!(%remote, "closing control leg of a rejected caller");
            leg.close().await;
            return;
        }

        let wanted = self.control.is_none()
            && match &self.state {
                SessionState::Advertising { .. } => true,
                SessionState::AwaitingAcceptance { remote: caller }
                | SessionState::Connecting { remote: caller, .. } => *caller == remote,
                _ => false,
            };
        if !wanted {
            tracing::debug!(%remote, state = %self.state, "closing surplus control leg");
            leg.close().await;
            return;
        }

        tracing::debug!(%remote, "control leg open");
        self.control = Some(leg);
        self.control_remote = Some(remote);

        if matches!(self.state, SessionState::Connecting { .. }) {
            self.mark_open(SessionState::mark_data_open);
        }
    }

    async fn on_media_opened(&mut self, result: Result<Box<dyn MediaLeg>, TransportError>) {
        let connecting = matches!(
            self.state,
            SessionState::Connecting {
                role: Role::Initiator,
                ..
            }
        );
        match result {
            Ok(mut leg) if !connecting || self.media.is_some() => leg.close().await,
            Ok(leg) => {
                tracing::debug!("media leg open");
                self.media = Some(leg);
                self.mark_open(SessionState::mark_media_open);
            }
            Err(e) if connecting => self.fail(e).await,
            Err(e) => tracing::debug!(error = %e, "late media leg failure ignored"),
        }
    }

    fn mark_open(&mut self, mark: fn(&mut SessionState) -> Result<bool, PeerdeskError>) {
        match mark(&mut self.state) {
            Ok(activated) => {
                self.publish();
                if activated {
                    self.on_activated();
                }
            }
            Err(e) => tracing::warn!(error = %e, "leg open ignored"),
        }
    }

    async fn on_accepted(&mut self, reply: Reply<()>, outcome: AcceptOutcome) {
        self.accepting = false;
        match outcome {
            AcceptOutcome::Answered { mut media, capture } => {
                let remote = match &self.state {
                    SessionState::AwaitingAcceptance { remote } => remote.clone(),
                    _ => {
                        media.close().await;
                        if let (Some(provider), Some(_)) = (&self.capture, capture) {
                            provider.stop_capture().await;
                        }
                        let _ = reply.send(Err(self.invalid("accept")));
                        return;
                    }
                };

                self.media = Some(media);
                if let Some((target, stream)) = capture {
                    self.start_pipeline(target, stream);
                }

                // A control leg from some other peer cannot serve this call.
                if self.control_remote.as_ref().is_some_and(|r| *r != remote) {
                    self.drop_control().await;
                }

                let data_open = self.control.is_some();
                match self.state.call_answered(data_open) {
                    Ok(activated) => {
                        self.publish();
                        if activated {
                            self.on_activated();
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            AcceptOutcome::CaptureFailed { call, error } => {
                tracing::warn!(remote = %call.remote, %error, "capture unavailable; call still pending");
                self.pending_call = Some(call);
                self.arm_acceptance_deadline();
                self.emit(SessionEvent::CaptureFailed(error.clone()));
                let _ = reply.send(Err(error.into()));
            }
            AcceptOutcome::TransportFailed(e) => {
                let _ = reply.send(Err(e.clone().into()));
                self.fail(e).await;
            }
        }
    }

    fn start_pipeline(&mut self, target: CaptureTarget, stream: CaptureStream) {
        tracing::info!(
            capture_target = %target.id,
            width = target.width,
            height = target.height,
            "sharing capture target"
        );
        let (pipeline, outputs) = FramePipeline::new(
            &target,
            self.config.media.target_fps,
            self.config.media.codec.decoder(),
        );
        let task = pipeline.spawn(stream);
        self.pipeline = Some(RunningPipeline {
            task,
            outputs,
            target,
        });
    }

    // ── Transport events ─────────────────────────────────────────

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingCall(call) => self.on_incoming_call(call).await,
            TransportEvent::IncomingData(incoming) => self.on_incoming_data(incoming),
            TransportEvent::Error(e) => self.fail(e).await,
        }
    }

    async fn on_incoming_call(&mut self, call: IncomingCall) {
        let foreign_control = self
            .control_remote
            .as_ref()
            .is_some_and(|r| *r != call.remote);
        if !self.state.is_advertising() || foreign_control {
            tracing::info!(remote = %call.remote, state = %self.state, "busy; rejecting call");
            self.transport.reject(call).await;
            return;
        }

        let remote = call.remote.clone();
        if let Err(e) = self.state.offer_received(remote.clone()) {
            tracing::warn!(error = %e, "call ignored");
            self.transport.reject(call).await;
            return;
        }
        self.publish();
        tracing::info!(%remote, "incoming call");

        self.pending_call = Some(call);
        self.arm_acceptance_deadline();
        self.emit(SessionEvent::IncomingCall { remote });
    }

    fn on_incoming_data(&mut self, incoming: IncomingData) {
        // Accepted straight away regardless of the call decision; the
        // result decides whether the leg is kept.
        tracing::debug!(remote = %incoming.remote, "accepting control leg");
        let transport = Arc::clone(&self.transport);
        let tx = self.internal_tx.clone();
        let task = tokio::spawn(async move {
            let remote = incoming.remote.clone();
            let result = transport.accept_data(incoming).await;
            deliver(&tx, Internal::DataOpened { remote, result }, None).await;
        });
        self.leg_tasks.push(task.abort_handle());
    }

    // ── Legs ─────────────────────────────────────────────────────

    async fn on_control(&mut self, inbound: Option<Result<Bytes, TransportError>>) {
        match inbound {
            None => {
                self.control = None;
                let remote = self.control_remote.take();
                let pre_session = matches!(
                    self.state,
                    SessionState::Advertising { .. } | SessionState::AwaitingAcceptance { .. }
                );
                if pre_session {
                    tracing::debug!(remote = ?remote, "pre-session control leg closed");
                } else {
                    self.finish(CloseCause::PeerClosed).await;
                }
            }
            Some(Err(e)) => self.fail(e).await,
            Some(Ok(bytes)) if self.state.is_active() => {
                let outcome = self.dispatcher.dispatch(&bytes);
                self.on_dispatched(outcome);
            }
            Some(Ok(bytes)) => {
                // The peer may go active first and start sending.
                if self.early.len() < EARLY_MESSAGE_LIMIT {
                    self.early.push(bytes);
                } else {
                    tracing::warn!(state = %self.state, "control message before activation dropped");
                }
            }
        }
    }

    fn on_activated(&mut self) {
        tracing::info!(remote = ?self.state.remote(), held = self.early.len(), "session active");
        for bytes in std::mem::take(&mut self.early) {
            let outcome = self.dispatcher.dispatch(&bytes);
            self.on_dispatched(outcome);
        }
    }

    fn on_dispatched(&mut self, outcome: Dispatched) {
        match outcome {
            Dispatched::Input { .. } => {}
            Dispatched::TransferStarted { id, meta } => {
                self.emit(SessionEvent::TransferStarted {
                    id,
                    name: meta.name,
                    size: meta.size,
                });
            }
            Dispatched::ChunkStored { id, progress } => {
                tracing::trace!(transfer = %id, received = progress.received, "chunk stored");
            }
            Dispatched::TransferCompleted(file) => {
                self.emit(SessionEvent::TransferCompleted {
                    id: file.id.clone(),
                    name: file.name.clone(),
                    bytes: file.len(),
                    digest: file.digest.to_hex().to_string(),
                });
                self.saves.submit(file);
            }
            Dispatched::TransferFailed { id, violation } => {
                self.emit(SessionEvent::TransferFailed {
                    id,
                    reason: violation.to_string(),
                });
            }
            Dispatched::Dropped(violation) => {
                self.emit(SessionEvent::ProtocolViolation(violation));
            }
        }
    }

    async fn on_remote_frame(&mut self, frame: Option<Result<VideoFrame, TransportError>>) {
        match frame {
            Some(Ok(frame)) => {
                self.out.remote_frames.send_replace(Some(frame));
            }
            Some(Err(e)) => self.fail(e).await,
            None => {
                self.media = None;
                self.finish(CloseCause::PeerClosed).await;
            }
        }
    }

    fn on_saved(&mut self, event: SaveEvent) {
        match event {
            SaveEvent::Saved { id, name, location } => {
                self.emit(SessionEvent::FileSaved { id, name, location });
            }
            SaveEvent::Failed { id, name, error } => {
                tracing::warn!(transfer = %id, %name, %error, "could not save received file");
                self.emit(SessionEvent::SaveFailed {
                    id,
                    name,
                    reason: error,
                });
            }
        }
    }

    async fn push_surface(&mut self) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        let frame = pipeline.outputs.surface.borrow().clone();
        let Some(media) = self.media.as_mut() else {
            return;
        };
        if let Err(e) = media.send_frame(frame).await {
            self.fail(e).await;
        }
    }

    async fn send_control(&mut self, message: &Message) -> Result<(), PeerdeskError> {
        let Some(leg) = self.control.as_mut() else {
            return Err(PeerdeskError::SessionClosed);
        };
        let payload = encode_message(message)?;
        if let Err(e) = leg.send(payload).await {
            self.fail(e.clone()).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn drop_control(&mut self) {
        self.control_remote = None;
        self.early.clear();
        if let Some(mut leg) = self.control.take() {
            leg.close().await;
        }
    }

    // ── Acceptance timeout ───────────────────────────────────────

    fn arm_acceptance_deadline(&mut self) {
        self.acceptance_deadline = self
            .config
            .session
            .acceptance_timeout()
            .map(|limit| Instant::now() + limit);
    }

    async fn expire_offer(&mut self) {
        self.acceptance_deadline = None;
        let remote = match &self.state {
            SessionState::AwaitingAcceptance { remote } if !self.accepting => remote.clone(),
            _ => return,
        };
        tracing::info!(%remote, "call not answered in time");
        if self.reject().await.is_ok() {
            self.emit(SessionEvent::OfferExpired { remote });
        }
    }

    // ── Teardown ─────────────────────────────────────────────────

    async fn fail(&mut self, error: TransportError) {
        tracing::error!(kind = %error.kind, detail = %error.detail, "transport failure");
        self.finish(CloseCause::Transport(error)).await;
    }

    /// Release everything and enter `Closed`. Does nothing once closed.
    async fn finish(&mut self, cause: CloseCause) {
        if self.state.is_closed() {
            return;
        }
        if self.state.begin_terminate().is_ok() {
            self.publish();
        }
        tracing::info!(%cause, "closing session");

        if let Some(call) = self.pending_call.take() {
            self.transport.reject(call).await;
        }
        self.acceptance_deadline = None;

        for (_, task) in self.sends.drain() {
            task.abort();
        }
        for task in self.leg_tasks.drain(..) {
            task.abort();
        }

        // An aborted answer may already hold a running capture.
        let capturing = self.pipeline.is_some() || self.accepting;
        self.accepting = false;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.task.abort();
            let stats = pipeline.outputs.stats.borrow().clone();
            tracing::info!(
                capture_target = %pipeline.target.id,
                presented = stats.presented,
                dropped = stats.dropped,
                "capture stopped"
            );
        }
        if let (true, Some(provider)) = (capturing, &self.capture) {
            provider.stop_capture().await;
        }

        self.drop_control().await;
        if let Some(mut leg) = self.media.take() {
            leg.close().await;
        }

        for id in self.dispatcher.abort_transfers() {
            self.emit(SessionEvent::TransferFailed {
                id,
                reason: String::from("session closed"),
            });
        }

        self.state.close(cause.clone());
        self.publish();
        self.emit(SessionEvent::Closed(cause));
    }

    // ── Plumbing ─────────────────────────────────────────────────

    fn publish(&self) {
        tracing::info!(state = %self.state, "session state");
        self.out.state.send_replace(self.state.clone());
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.out.events.send(event);
    }

    fn invalid(&self, action: &'static str) -> PeerdeskError {
        PeerdeskError::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn close_unregistered(out: &Outputs, cause: CloseCause) {
    out.state.send_replace(SessionState::Closed {
        cause: cause.clone(),
    });
    let _ = out.events.send(SessionEvent::Closed(cause));
}

/// Hands file-sender messages to the actor and waits for the transport.
struct OutboundSink {
    tx: mpsc::Sender<Internal>,
}

#[async_trait]
impl MessageSink for OutboundSink {
    async fn send(&mut self, message: Message) -> Result<(), PeerdeskError> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(Internal::Outbound { message, ack })
            .await
            .map_err(|_| PeerdeskError::SessionClosed)?;
        acked.await.map_err(|_| PeerdeskError::SessionClosed)?
    }
}

async fn answer_call(
    transport: Arc<dyn Transport>,
    capture: Option<Arc<dyn CaptureProvider>>,
    call: IncomingCall,
    target: Option<String>,
    limit: Option<Duration>,
) -> AcceptOutcome {
    let (source, stream) = match &capture {
        None => (MediaSource::PlatformPicker, None),
        Some(provider) => match start_capture(provider.as_ref(), target.as_deref()).await {
            Ok((target, stream)) => (
                MediaSource::Capture {
                    target: target.clone(),
                },
                Some((target, stream)),
            ),
            Err(error) => return AcceptOutcome::CaptureFailed { call, error },
        },
    };

    match with_timeout(limit, transport.answer(call, source)).await {
        Ok(media) => AcceptOutcome::Answered {
            media,
            capture: stream,
        },
        Err(e) => {
            if let (Some(provider), Some(_)) = (&capture, stream) {
                provider.stop_capture().await;
            }
            AcceptOutcome::TransportFailed(e)
        }
    }
}

async fn start_capture(
    provider: &dyn CaptureProvider,
    requested: Option<&str>,
) -> Result<(CaptureTarget, CaptureStream), CaptureError> {
    let targets = provider.list_targets().await?;
    let target = choose_target(&targets, requested)?.clone();
    let stream = provider.start_capture(&target.id).await?;
    Ok((target, stream))
}

async fn deliver(
    tx: &mpsc::Sender<Internal>,
    internal: Internal,
    capture: Option<&dyn CaptureProvider>,
) {
    if let Err(mpsc::error::SendError(unsent)) = tx.send(internal).await {
        unsent.discard(capture).await;
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    attempt: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .unwrap_or_else(|_| Err(TransportError::timeout(limit))),
        None => attempt.await,
    }
}

async fn recv_control(
    leg: &mut Option<Box<dyn DataLeg>>,
) -> Option<Result<Bytes, TransportError>> {
    match leg {
        Some(leg) => leg.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_media(
    leg: &mut Option<Box<dyn MediaLeg>>,
) -> Option<Result<VideoFrame, TransportError>> {
    match leg {
        Some(leg) => leg.recv_frame().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
