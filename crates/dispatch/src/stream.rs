use std::collections::VecDeque;

use async_trait::async_trait;
use decode::{DecodeTask, DecodeWorker};
use tokio::sync::mpsc;

use crate::types::{DispatchError, Strategy};

/// Runs decode tasks and yields their serialized records.
///
/// Implementations are chosen once at startup with [`Strategy::probe`].
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Start decoding `tasks`. Records arrive in completion order; each one
    /// carries its own index.
    async fn map(&self, tasks: Vec<DecodeTask>) -> Result<RecordStream, DispatchError>;

    /// Release workers. The dispatcher must not be used afterwards.
    async fn shutdown(&self);
}

enum Source {
    Lazy {
        worker: DecodeWorker,
        pending: VecDeque<DecodeTask>,
    },
    Channel(mpsc::Receiver<String>),
}

/// Stream of newline-terminated record lines, one per submitted task.
pub struct RecordStream {
    total: usize,
    yielded: usize,
    source: Source,
}

impl RecordStream {
    /// Decode `tasks` one at a time, only as `next` is called.
    pub fn lazy(worker: DecodeWorker, tasks: Vec<DecodeTask>) -> Self {
        Self {
            total: tasks.len(),
            yielded: 0,
            source: Source::Lazy {
                worker,
                pending: tasks.into(),
            },
        }
    }

    /// Yield lines produced elsewhere. The stream ends when every sender is
    /// dropped.
    pub fn channel(total: usize, rx: mpsc::Receiver<String>) -> Self {
        Self {
            total,
            yielded: 0,
            source: Source::Channel(rx),
        }
    }

    /// Number of tasks submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub async fn next(&mut self) -> Option<String> {
        let line = match &mut self.source {
            Source::Lazy { worker, pending } => {
                let task = pending.pop_front()?;
                worker.decode_line(&task).await
            }
            Source::Channel(rx) => rx.recv().await?,
        };
        self.yielded += 1;
        Some(line)
    }
}

/// Decodes in this process with a single model instance.
///
/// Used for accelerators and single-process runs.
#[derive(Clone)]
pub struct SequentialDispatcher {
    worker: DecodeWorker,
}

impl SequentialDispatcher {
    pub fn new(worker: DecodeWorker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl Dispatcher for SequentialDispatcher {
    fn strategy(&self) -> Strategy {
        Strategy::Sequential
    }

    async fn map(&self, tasks: Vec<DecodeTask>) -> Result<RecordStream, DispatchError> {
        tracing::info!(tasks = tasks.len(), "Decoding sequentially");
        Ok(RecordStream::lazy(self.worker.clone(), tasks))
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use decode::mocks::{make_beam, task, MockParser};
    use decode::DecodeOptions;
    use records::InferenceRecord;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sequential_preserves_order_and_count() {
        let mut parser = MockParser::with_default(vec![make_beam(
            serde_json::json!({"select": {"items": [{"val": {"kind": "column", "col_id": 8}}]}}),
            -0.1,
        )]);
        parser.add_failure("q1");
        let dispatcher = SequentialDispatcher::new(DecodeWorker::new(
            Arc::new(parser),
            DecodeOptions::default(),
        ));

        let tasks = vec![task(0, "q0", 1), task(1, "q1", 1), task(2, "q2", 1)];
        let mut stream = dispatcher.map(tasks).await.unwrap();
        assert_eq!(stream.total(), 3);

        let mut records = Vec::new();
        while let Some(line) = stream.next().await {
            records.push(serde_json::from_str::<InferenceRecord>(&line).unwrap());
        }
        assert_eq!(stream.yielded(), 3);
        assert_eq!(
            records.iter().map(|r| r.index()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(records[1].is_failed());
        assert_eq!(records[0].top1_code(), Some("SELECT singer.Name FROM singer"));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_channel_stream_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = RecordStream::channel(2, rx);
        tx.send("{\"index\":1,\"beams\":[]}\n".to_string()).await.unwrap();
        tx.send("{\"index\":0,\"beams\":[]}\n".to_string()).await.unwrap();
        drop(tx);
        assert!(stream.next().await.unwrap().contains("\"index\":1"));
        assert!(stream.next().await.unwrap().contains("\"index\":0"));
        assert!(stream.next().await.is_none());
    }
}
