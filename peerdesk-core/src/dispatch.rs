//! Routing of inbound control-leg messages.
//!
//! Input events go to the [`InputInjector`]; file messages go to the
//! [`TransferTable`]. Nothing here touches the transport or the disk, so
//! every call returns promptly and the caller decides what to emit.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::decode_message;
use crate::error::{InjectionError, ProtocolViolation};
use crate::input::InputInjector;
use crate::protocol::{Message, TransferId};
use crate::transfer::{ChunkProgress, FileMetadata, ReceivedFile, TransferTable};

/// What handling one message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// An input event was handed to the injector.
    Input {
        kind: &'static str,
        result: Result<(), InjectionError>,
    },
    TransferStarted {
        id: TransferId,
        meta: FileMetadata,
    },
    ChunkStored {
        id: TransferId,
        progress: ChunkProgress,
    },
    TransferCompleted(ReceivedFile),
    /// The transfer was corrupt and has been discarded.
    TransferFailed {
        id: TransferId,
        violation: ProtocolViolation,
    },
    /// The message was dropped; no state changed.
    Dropped(ProtocolViolation),
}

pub struct Dispatcher {
    injector: Arc<dyn InputInjector>,
    transfers: TransferTable,
}

impl Dispatcher {
    pub fn new(injector: Arc<dyn InputInjector>, max_file_size: u64) -> Self {
        Self {
            injector,
            transfers: TransferTable::new(max_file_size),
        }
    }

    /// Decode and handle raw control-leg bytes.
    pub fn dispatch(&mut self, bytes: &[u8]) -> Dispatched {
        match decode_message(bytes) {
            Ok(message) => self.dispatch_message(message),
            Err(violation) => {
                match &violation {
                    ProtocolViolation::UnknownType(kind) => {
                        tracing::debug!(%kind, "ignoring unknown message type")
                    }
                    other => tracing::warn!(violation = %other, "dropping message"),
                }
                Dispatched::Dropped(violation)
            }
        }
    }

    pub fn dispatch_message(&mut self, message: Message) -> Dispatched {
        tracing::trace!(kind = message.kind(), "dispatching");
        match message {
            Message::InputEvent { payload } => {
                let result = self.injector.inject(&payload);
                if let Err(e) = &result {
                    // Browser-hosted peers have no injector; this is routine.
                    tracing::debug!(kind = payload.kind(), error = %e, "input not injected");
                }
                Dispatched::Input {
                    kind: payload.kind(),
                    result,
                }
            }
            Message::FileMeta {
                name,
                size,
                mime_type,
                transfer_id,
            } => {
                let id = TransferId::or_legacy(transfer_id);
                let meta = FileMetadata {
                    name,
                    size,
                    mime_type,
                };
                match self.transfers.open(id.clone(), meta.clone()) {
                    Ok(()) => {
                        tracing::info!(transfer = %id, name = %meta.name, size, "receiving file");
                        Dispatched::TransferStarted { id, meta }
                    }
                    Err(violation) => self.dropped(violation),
                }
            }
            Message::FileChunk {
                transfer_id,
                sequence,
                data,
            } => {
                let id = TransferId::or_legacy(transfer_id);
                match self.transfers.append(&id, sequence, Bytes::from(data)) {
                    Ok(progress) => Dispatched::ChunkStored { id, progress },
                    Err(violation @ ProtocolViolation::UnknownTransfer(_)) => {
                        self.dropped(violation)
                    }
                    Err(violation) => self.failed(id, violation),
                }
            }
            Message::FileEnd { transfer_id } => {
                let id = TransferId::or_legacy(transfer_id);
                match self.transfers.finish(&id) {
                    Ok(file) => {
                        tracing::info!(
                            transfer = %id,
                            name = %file.name,
                            bytes = file.len(),
                            "file received"
                        );
                        Dispatched::TransferCompleted(file)
                    }
                    Err(violation @ ProtocolViolation::UnknownTransfer(_)) => {
                        self.dropped(violation)
                    }
                    Err(violation) => self.failed(id, violation),
                }
            }
        }
    }

    /// Discard every open inbound transfer.
    pub fn abort_transfers(&mut self) -> Vec<TransferId> {
        self.transfers.abort_all()
    }

    pub fn open_transfers(&self) -> usize {
        self.transfers.open_count()
    }

    fn dropped(&self, violation: ProtocolViolation) -> Dispatched {
        tracing::warn!(%violation, "dropping file message");
        Dispatched::Dropped(violation)
    }

    fn failed(&self, id: TransferId, violation: ProtocolViolation) -> Dispatched {
        tracing::warn!(transfer = %id, %violation, "transfer discarded");
        Dispatched::TransferFailed { id, violation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_message;
    use crate::input::{RecordingInjector, UnavailableInjector};
    use crate::protocol::{InputEvent, MouseButton};
    use crate::transfer::DEFAULT_MAX_FILE_SIZE;

    fn dispatcher(injector: Arc<dyn InputInjector>) -> Dispatcher {
        Dispatcher::new(injector, DEFAULT_MAX_FILE_SIZE)
    }

    fn wire(message: &Message) -> Vec<u8> {
        encode_message(message).unwrap().to_vec()
    }

    fn meta(id: &str, size: u64) -> Message {
        Message::FileMeta {
            name: format!("{id}.bin"),
            size,
            mime_type: "application/octet-stream".into(),
            transfer_id: Some(TransferId::new(id)),
        }
    }

    fn chunk(id: &str, sequence: u64, data: &[u8]) -> Message {
        Message::FileChunk {
            transfer_id: Some(TransferId::new(id)),
            sequence: Some(sequence),
            data: data.to_vec(),
        }
    }

    fn end(id: &str) -> Message {
        Message::FileEnd {
            transfer_id: Some(TransferId::new(id)),
        }
    }

    #[test]
    fn input_reaches_injector() {
        let injector = Arc::new(RecordingInjector::new());
        let mut d = dispatcher(injector.clone());
        let click = InputEvent::MouseClick {
            button: MouseButton::Right,
            x: Some(3),
            y: Some(4),
        };
        let out = d.dispatch(&wire(&Message::input(click.clone())));
        assert_eq!(
            out,
            Dispatched::Input {
                kind: "MouseClick",
                result: Ok(())
            }
        );
        assert_eq!(injector.events(), vec![click]);
    }

    #[test]
    fn injection_failure_is_swallowed() {
        let mut d = dispatcher(Arc::new(UnavailableInjector));
        let out = d.dispatch_message(Message::input(InputEvent::KeyPress { key: "a".into() }));
        assert!(matches!(
            out,
            Dispatched::Input {
                result: Err(InjectionError::Unavailable),
                ..
            }
        ));
    }

    #[test]
    fn full_transfer_over_the_wire() {
        let mut d = dispatcher(Arc::new(UnavailableInjector));
        assert!(matches!(
            d.dispatch(&wire(&meta("t", 5))),
            Dispatched::TransferStarted { .. }
        ));
        d.dispatch(&wire(&chunk("t", 0, b"hel")));
        d.dispatch(&wire(&chunk("t", 1, b"lo")));

        match d.dispatch(&wire(&end("t"))) {
            Dispatched::TransferCompleted(file) => {
                assert_eq!(file.data.as_ref(), b"hello");
                assert_eq!(file.name, "t.bin");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(d.open_transfers(), 0);
    }

    #[test]
    fn stray_chunk_and_end_are_dropped() {
        let mut d = dispatcher(Arc::new(UnavailableInjector));
        assert!(matches!(
            d.dispatch_message(chunk("ghost", 0, b"x")),
            Dispatched::Dropped(ProtocolViolation::UnknownTransfer(_))
        ));
        assert!(matches!(
            d.dispatch_message(end("ghost")),
            Dispatched::Dropped(ProtocolViolation::UnknownTransfer(_))
        ));
    }

    #[test]
    fn corrupt_transfer_does_not_affect_others() {
        let mut d = dispatcher(Arc::new(UnavailableInjector));
        d.dispatch_message(meta("good", 2));
        d.dispatch_message(meta("bad", 4));
        d.dispatch_message(chunk("bad", 0, b"xx"));

        assert!(matches!(
            d.dispatch_message(chunk("bad", 5, b"yy")),
            Dispatched::TransferFailed { .. }
        ));

        d.dispatch_message(chunk("good", 0, b"ok"));
        assert!(matches!(
            d.dispatch_message(end("good")),
            Dispatched::TransferCompleted(_)
        ));
    }

    #[test]
    fn unknown_and_malformed_messages_are_dropped() {
        let mut d = dispatcher(Arc::new(UnavailableInjector));
        assert!(matches!(
            d.dispatch(br#"{"type":"clipboard","text":"hi"}"#),
            Dispatched::Dropped(ProtocolViolation::UnknownType(_))
        ));
        assert!(matches!(
            d.dispatch(b"not json"),
            Dispatched::Dropped(ProtocolViolation::Malformed(_))
        ));
    }

    #[test]
    fn legacy_untagged_transfer() {
        let mut d = dispatcher(Arc::new(UnavailableInjector));
        d.dispatch(br#"{"type":"file-meta","name":"old.txt","size":2,"mimeType":"text/plain"}"#);
        d.dispatch(br#"{"type":"file-chunk","data":[111,107]}"#);
        match d.dispatch(br#"{"type":"file-end"}"#) {
            Dispatched::TransferCompleted(file) => {
                assert_eq!(file.id, TransferId::legacy());
                assert_eq!(file.data.as_ref(), b"ok");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
