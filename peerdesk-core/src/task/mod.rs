//! Tracked background persistence.
//!
//! Completed transfers are handed to a [`SaveQueue`], which writes each one
//! through the session's [`ArtifactSink`] on its own task. The session keeps
//! dispatching control-leg messages while writes are in flight and learns
//! about results from [`SaveQueue::recv`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::TransferId;
use crate::transfer::{ArtifactSink, ReceivedFile};

pub type SaveEventSender = mpsc::Sender<SaveEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    Saved {
        id: TransferId,
        name: String,
        location: String,
    },
    Failed {
        id: TransferId,
        name: String,
        error: String,
    },
}

impl SaveEvent {
    pub fn id(&self) -> &TransferId {
        match self {
            Self::Saved { id, .. } | Self::Failed { id, .. } => id,
        }
    }
}

// ── SaveTask ─────────────────────────────────────────────────────

struct SaveTask {
    name: String,
    handle: JoinHandle<()>,
}

impl SaveTask {
    fn spawn(sink: Arc<dyn ArtifactSink>, file: ReceivedFile, event_tx: SaveEventSender) -> Self {
        let name = file.name.clone();
        let handle = tokio::spawn(async move {
            let id = file.id.clone();
            let name = file.name.clone();
            let event = match sink.save(file).await {
                Ok(location) => SaveEvent::Saved { id, name, location },
                Err(e) => SaveEvent::Failed {
                    id,
                    name,
                    error: e.to_string(),
                },
            };
            let _ = event_tx.send(event).await;
        });
        Self { name, handle }
    }
}

// ── SaveQueue ────────────────────────────────────────────────────

pub struct SaveQueue {
    sink: Arc<dyn ArtifactSink>,
    tasks: HashMap<TransferId, SaveTask>,
    event_rx: mpsc::Receiver<SaveEvent>,
    event_tx: SaveEventSender,
}

impl SaveQueue {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            sink,
            tasks: HashMap::new(),
            event_rx,
            event_tx,
        }
    }

    /// Start persisting `file` in the background.
    pub fn submit(&mut self, file: ReceivedFile) {
        let id = file.id.clone();
        let task = SaveTask::spawn(Arc::clone(&self.sink), file, self.event_tx.clone());
        if let Some(previous) = self.tasks.insert(id.clone(), task) {
            // Same id reused after completion; the earlier write keeps running.
            tracing::debug!(transfer = %id, name = %previous.name, "replacing tracked save");
        }
    }

    /// Next finished save. Never yields `None` while the queue is alive.
    pub async fn recv(&mut self) -> Option<SaveEvent> {
        let event = self.event_rx.recv().await?;
        self.tasks.remove(event.id());
        Some(event)
    }

    /// Saves whose result has not been received yet.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Saves whose task is still writing.
    pub fn running(&self) -> usize {
        self.tasks.values().filter(|t| !t.handle.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MemorySink;
    use bytes::Bytes;

    fn file(id: &str, name: &str) -> ReceivedFile {
        let data = Bytes::from(name.as_bytes().to_vec());
        ReceivedFile {
            id: TransferId::new(id),
            name: name.into(),
            mime_type: "text/plain".into(),
            digest: blake3::hash(&data),
            data,
        }
    }

    #[tokio::test]
    async fn reports_saved_files() {
        let sink = Arc::new(MemorySink::new());
        let mut queue = SaveQueue::new(sink.clone());
        queue.submit(file("a", "a.txt"));
        queue.submit(file("b", "b.txt"));
        assert_eq!(queue.pending(), 2);

        let mut ids = vec![
            queue.recv().await.unwrap().id().clone(),
            queue.recv().await.unwrap().id().clone(),
        ];
        ids.sort();
        assert_eq!(ids, vec![TransferId::new("a"), TransferId::new("b")]);
        assert_eq!(queue.pending(), 0);
        assert_eq!(sink.saved().len(), 2);
    }

    #[tokio::test]
    async fn reports_failures() {
        let mut queue = SaveQueue::new(Arc::new(MemorySink::failing()));
        queue.submit(file("x", "x.bin"));
        match queue.recv().await.unwrap() {
            SaveEvent::Failed { name, error, .. } => {
                assert_eq!(name, "x.bin");
                assert!(error.contains("x.bin"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
