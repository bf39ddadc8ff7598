//! In-process transport.
//!
//! Every [`MemoryTransport`] created from the same [`MemoryNetwork`] can
//! reach the others by peer id. Data legs are pairs of unbounded channels:
//! ordered and reliable, and like a data channel's send buffer they never
//! block the sender. Media legs are small bounded channels that drop
//! frames when the receiver falls behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::{
    DataLeg, IncomingCall, IncomingData, Identity, MediaLeg, MediaSource, PeerId, Transport,
    TransportEvent,
};
use crate::error::TransportError;
use crate::media::frame::VideoFrame;

pub const MEDIA_CHANNEL_CAPACITY: usize = 4;
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

// ── MemoryNetwork ────────────────────────────────────────────────

/// A shared registry of in-process peers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    peers: HashMap<PeerId, mpsc::Sender<TransportEvent>>,
    next_peer: u64,
    next_token: u64,
    data_offers: HashMap<u64, oneshot::Sender<MemoryDataLeg>>,
    call_offers: HashMap<u64, oneshot::Sender<Result<MemoryMediaLeg, TransportError>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that is assigned a generated id on `identify`.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            requested: None,
            local: Mutex::new(None),
        }
    }

    /// A transport that registers under a fixed id.
    pub fn transport_with_id(&self, id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            requested: Some(PeerId::new(id)),
            local: Mutex::new(None),
        }
    }

    /// Push a transport error to a registered peer.
    pub async fn report_error(&self, peer: &PeerId, error: TransportError) -> bool {
        let Some(events) = self.events_for(peer) else {
            return false;
        };
        events.send(TransportEvent::Error(error)).await.is_ok()
    }

    /// Currently registered peer ids, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self
            .registry
            .lock()
            .map(|r| r.peers.keys().cloned().collect())
            .unwrap_or_default();
        peers.sort();
        peers
    }

    fn events_for(&self, peer: &PeerId) -> Option<mpsc::Sender<TransportEvent>> {
        self.registry
            .lock()
            .ok()
            .and_then(|r| r.peers.get(peer).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registry>, TransportError> {
        self.registry
            .lock()
            .map_err(|_| TransportError::new("internal", "peer registry poisoned"))
    }
}

// ── MemoryTransport ──────────────────────────────────────────────

pub struct MemoryTransport {
    network: MemoryNetwork,
    requested: Option<PeerId>,
    local: Mutex<Option<PeerId>>,
}

impl MemoryTransport {
    fn local_id(&self) -> Result<PeerId, TransportError> {
        self.local
            .lock()
            .ok()
            .and_then(|id| id.clone())
            .ok_or_else(|| TransportError::new("not-identified", "identify has not completed"))
    }

    /// Look up `remote`, park an offer under a fresh token and return the
    /// remote's event sender.
    fn park<T>(
        &self,
        remote: &PeerId,
        park: impl FnOnce(&mut Registry, u64, T),
        value: T,
    ) -> Result<(u64, mpsc::Sender<TransportEvent>), TransportError> {
        let mut registry = self.network.lock()?;
        let events = registry
            .peers
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::peer_unavailable(remote.as_str()))?;
        registry.next_token += 1;
        let token = registry.next_token;
        park(&mut *registry, token, value);
        Ok((token, events))
    }

    fn forget_data_offer(&self, token: u64) {
        if let Ok(mut registry) = self.network.lock() {
            registry.data_offers.remove(&token);
        }
    }

    fn forget_call_offer(&self, token: u64) {
        if let Ok(mut registry) = self.network.lock() {
            registry.call_offers.remove(&token);
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn identify(&self) -> Result<Identity, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let local_id = {
            let mut registry = self.network.lock()?;
            let id = match &self.requested {
                Some(id) => id.clone(),
                None => {
                    registry.next_peer += 1;
                    PeerId::new(format!("peer-{}", registry.next_peer))
                }
            };
            if registry.peers.contains_key(&id) {
                return Err(TransportError::new(
                    "unavailable-id",
                    format!("peer id {id} is taken"),
                ));
            }
            registry.peers.insert(id.clone(), tx);
            id
        };

        if let Ok(mut local) = self.local.lock() {
            *local = Some(local_id.clone());
        }
        tracing::debug!(peer = %local_id, "registered on memory network");

        Ok(Identity {
            local_id,
            events: rx,
        })
    }

    async fn connect_data(&self, remote: &PeerId) -> Result<Box<dyn DataLeg>, TransportError> {
        let local = self.local_id()?;
        let (opened_tx, opened_rx) = oneshot::channel();
        let (token, events) = self.park(
            remote,
            |r, token, tx| {
                r.data_offers.insert(token, tx);
            },
            opened_tx,
        )?;

        let offer = TransportEvent::IncomingData(IncomingData {
            remote: local,
            token,
        });
        if events.send(offer).await.is_err() {
            self.forget_data_offer(token);
            return Err(TransportError::peer_unavailable(remote.as_str()));
        }

        match opened_rx.await {
            Ok(leg) => Ok(Box::new(leg)),
            Err(_) => Err(TransportError::new(
                "negotiation-failed",
                format!("{remote} dropped the data connection"),
            )),
        }
    }

    async fn accept_data(&self, incoming: IncomingData) -> Result<Box<dyn DataLeg>, TransportError> {
        let opened = self
            .network
            .lock()?
            .data_offers
            .remove(&incoming.token)
            .ok_or_else(|| TransportError::new("negotiation-failed", "data offer expired"))?;

        let (ours, theirs) = MemoryDataLeg::pair();
        opened
            .send(theirs)
            .map_err(|_| TransportError::peer_unavailable(incoming.remote.as_str()))?;
        Ok(Box::new(ours))
    }

    async fn call(
        &self,
        remote: &PeerId,
        source: MediaSource,
    ) -> Result<Box<dyn MediaLeg>, TransportError> {
        let local = self.local_id()?;
        let (answered_tx, answered_rx) = oneshot::channel();
        let (token, events) = self.park(
            remote,
            |r, token, tx| {
                r.call_offers.insert(token, tx);
            },
            answered_tx,
        )?;

        tracing::trace!(%remote, ?source, "placing call");
        let offer = TransportEvent::IncomingCall(IncomingCall {
            remote: local,
            token,
        });
        if events.send(offer).await.is_err() {
            self.forget_call_offer(token);
            return Err(TransportError::peer_unavailable(remote.as_str()));
        }

        match answered_rx.await {
            Ok(Ok(leg)) => Ok(Box::new(leg)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::new(
                "negotiation-failed",
                format!("{remote} dropped the call"),
            )),
        }
    }

    async fn answer(
        &self,
        call: IncomingCall,
        source: MediaSource,
    ) -> Result<Box<dyn MediaLeg>, TransportError> {
        let answered = self
            .network
            .lock()?
            .call_offers
            .remove(&call.token)
            .ok_or_else(|| TransportError::new("negotiation-failed", "call offer expired"))?;

        tracing::trace!(remote = %call.remote, ?source, "answering call");
        let (ours, theirs) = MemoryMediaLeg::pair();
        answered
            .send(Ok(theirs))
            .map_err(|_| TransportError::peer_unavailable(call.remote.as_str()))?;
        Ok(Box::new(ours))
    }

    async fn reject(&self, call: IncomingCall) {
        let answered = self
            .network
            .lock()
            .ok()
            .and_then(|mut r| r.call_offers.remove(&call.token));
        if let Some(answered) = answered {
            let _ = answered.send(Err(TransportError::new(
                "call-rejected",
                format!("{} declined the call", call.remote),
            )));
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let local = self.local.get_mut().ok().and_then(|id| id.take());
        if let (Some(id), Ok(mut registry)) = (local, self.network.registry.lock()) {
            registry.peers.remove(&id);
        }
    }
}

// ── Legs ─────────────────────────────────────────────────────────

struct MemoryDataLeg {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryDataLeg {
    fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: b_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

#[async_trait]
impl DataLeg for MemoryDataLeg {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::closed("data leg closed locally"))?;
        tx.send(payload)
            .map_err(|_| TransportError::closed("remote closed the data leg"))
    }

    async fn recv(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

struct MemoryMediaLeg {
    tx: Option<mpsc::Sender<VideoFrame>>,
    rx: mpsc::Receiver<VideoFrame>,
}

impl MemoryMediaLeg {
    fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(MEDIA_CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(MEDIA_CHANNEL_CAPACITY);
        (
            Self {
                tx: Some(a_tx),
                rx: b_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

#[async_trait]
impl MediaLeg for MemoryMediaLeg {
    async fn send_frame(&mut self, frame: VideoFrame) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::closed("media leg closed locally"))?;
        match tx.try_send(frame) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportError::closed("remote closed the media leg"))
            }
        }
    }

    async fn recv_frame(&mut self) -> Option<Result<VideoFrame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn expect_event(identity: &mut Identity) -> TransportEvent {
        identity.events.recv().await.unwrap()
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let net = MemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let ia = a.identify().await.unwrap();
        let ib = b.identify().await.unwrap();
        assert_ne!(ia.local_id, ib.local_id);
        assert_eq!(net.peers().len(), 2);
    }

    #[tokio::test]
    async fn fixed_id_cannot_be_taken_twice() {
        let net = MemoryNetwork::new();
        let a = net.transport_with_id("desk");
        let b = net.transport_with_id("desk");
        a.identify().await.unwrap();
        assert_eq!(b.identify().await.unwrap_err().kind, "unavailable-id");
    }

    #[tokio::test]
    async fn unknown_peer_is_unavailable() {
        let net = MemoryNetwork::new();
        let a = net.transport();
        a.identify().await.unwrap();
        let err = a.connect_data(&PeerId::new("nobody")).await.err().unwrap();
        assert_eq!(err.kind, "peer-unavailable");
    }

    #[tokio::test]
    async fn data_leg_carries_bytes_both_ways() {
        let net = MemoryNetwork::new();
        let a = Arc::new(net.transport_with_id("a"));
        let b = net.transport_with_id("b");
        a.identify().await.unwrap();
        let mut ib = b.identify().await.unwrap();

        let a2 = Arc::clone(&a);
        let connect = tokio::spawn(async move { a2.connect_data(&PeerId::new("b")).await });

        let TransportEvent::IncomingData(incoming) = expect_event(&mut ib).await else {
            panic!("expected data offer");
        };
        assert_eq!(incoming.remote, PeerId::new("a"));
        let mut theirs = b.accept_data(incoming).await.unwrap();
        let mut ours = connect.await.unwrap().unwrap();

        ours.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(theirs.recv().await.unwrap().unwrap().as_ref(), b"ping");
        theirs.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(ours.recv().await.unwrap().unwrap().as_ref(), b"pong");

        theirs.close().await;
        assert!(ours.recv().await.is_none());
        assert!(ours.send(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn rejected_call_fails_caller() {
        let net = MemoryNetwork::new();
        let a = Arc::new(net.transport_with_id("a"));
        let b = net.transport_with_id("b");
        a.identify().await.unwrap();
        let mut ib = b.identify().await.unwrap();

        let a2 = Arc::clone(&a);
        let call = tokio::spawn(async move {
            a2.call(&PeerId::new("b"), MediaSource::Placeholder)
                .await
                .map(|_| ())
        });

        let TransportEvent::IncomingCall(incoming) = expect_event(&mut ib).await else {
            panic!("expected call");
        };
        b.reject(incoming).await;
        assert_eq!(call.await.unwrap().unwrap_err().kind, "call-rejected");
    }

    #[tokio::test]
    async fn answered_call_streams_frames() {
        let net = MemoryNetwork::new();
        let a = Arc::new(net.transport_with_id("a"));
        let b = net.transport_with_id("b");
        a.identify().await.unwrap();
        let mut ib = b.identify().await.unwrap();

        let a2 = Arc::clone(&a);
        let call =
            tokio::spawn(async move { a2.call(&PeerId::new("b"), MediaSource::Placeholder).await });

        let TransportEvent::IncomingCall(incoming) = expect_event(&mut ib).await else {
            panic!("expected call");
        };
        let mut sharer = b
            .answer(incoming, MediaSource::PlatformPicker)
            .await
            .unwrap();
        let mut viewer = call.await.unwrap().unwrap();

        sharer.send_frame(VideoFrame::blank(2, 2)).await.unwrap();
        let frame = viewer.recv_frame().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (2, 2));
    }

    #[tokio::test]
    async fn errors_can_be_injected() {
        let net = MemoryNetwork::new();
        let a = net.transport_with_id("a");
        let mut ia = a.identify().await.unwrap();
        assert!(
            net.report_error(&PeerId::new("a"), TransportError::new("network", "lost"))
                .await
        );
        assert!(matches!(
            expect_event(&mut ia).await,
            TransportEvent::Error(e) if e.kind == "network"
        ));
    }

    #[tokio::test]
    async fn dropping_transport_unregisters() {
        let net = MemoryNetwork::new();
        let a = net.transport_with_id("a");
        a.identify().await.unwrap();
        drop(a);
        assert!(net.peers().is_empty());
    }
}
