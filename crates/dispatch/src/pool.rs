use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use decode::DecodeTask;
use tokio::sync::{mpsc, Mutex};

use crate::protocol::{check_record_line, encode_task, failure_line};
use crate::stream::{Dispatcher, RecordStream};
use crate::types::{DispatchError, PoolConfig, Strategy};
use crate::worker::DecodeProcess;

type TaskQueue = Arc<Mutex<VecDeque<(usize, String)>>>;

/// Pool of decode worker processes.
///
/// Each worker is a child process with its own read-only model replica.
/// During [`map`](Dispatcher::map) every worker gets one driver task that
/// pulls from a shared queue and sends finished records through a bounded
/// channel. Workers that die are replaced; workers that cannot be replaced
/// retire, and the last retiring driver fails whatever is left in the queue
/// so that every submitted index gets a record.
pub struct ProcessPool {
    workers: Arc<Mutex<Vec<DecodeProcess>>>,
    config: Arc<PoolConfig>,
}

impl ProcessPool {
    /// Spawn `config.num_workers` worker processes and wait until each is ready.
    pub async fn spawn(config: PoolConfig) -> Result<Self, DispatchError> {
        if config.num_workers == 0 {
            return Err(DispatchError::Protocol(
                "num_workers must be at least 1".into(),
            ));
        }

        let mut workers = Vec::with_capacity(config.num_workers);
        for _ in 0..config.num_workers {
            match DecodeProcess::spawn(&config).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in workers {
                        worker.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(num_workers = config.num_workers, "Decode pool initialized");
        Ok(Self {
            workers: Arc::new(Mutex::new(workers)),
            config: Arc::new(config),
        })
    }

    /// Number of idle workers.
    pub async fn available_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    async fn checkout_all(&self) -> Result<Vec<DecodeProcess>, DispatchError> {
        let mut idle = std::mem::take(&mut *self.workers.lock().await);
        // Replace workers retired by a previous run.
        while idle.len() < self.config.num_workers {
            match DecodeProcess::spawn(&self.config).await {
                Ok(worker) => idle.push(worker),
                Err(e) if idle.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not replace retired decode worker");
                    break;
                }
            }
        }
        Ok(idle)
    }
}

#[async_trait]
impl Dispatcher for ProcessPool {
    fn strategy(&self) -> Strategy {
        Strategy::ProcessPool {
            num_workers: self.config.num_workers,
        }
    }

    async fn map(&self, tasks: Vec<DecodeTask>) -> Result<RecordStream, DispatchError> {
        let total = tasks.len();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let mut queue = VecDeque::with_capacity(total);
        let mut unsendable = Vec::new();
        for task in &tasks {
            match encode_task(task) {
                Ok(line) => queue.push_back((task.index, line)),
                Err(e) => {
                    let err = DispatchError::Protocol(format!("failed to encode task: {e}"));
                    unsendable.push(failure_line(task.index, "failed to dispatch example", &err));
                }
            }
        }
        drop(tasks);
        if !unsendable.is_empty() {
            let tx = tx.clone();
            tokio::spawn(async move {
                for line in unsendable {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        let workers = self.checkout_all().await?;
        tracing::info!(tasks = total, workers = workers.len(), "Dispatching to decode pool");

        let queue: TaskQueue = Arc::new(Mutex::new(queue));
        let live = Arc::new(AtomicUsize::new(workers.len()));
        for worker in workers {
            let driver = Driver {
                queue: Arc::clone(&queue),
                live: Arc::clone(&live),
                tx: tx.clone(),
                config: Arc::clone(&self.config),
                idle: Arc::clone(&self.workers),
            };
            tokio::spawn(driver.run(worker));
        }

        Ok(RecordStream::channel(total, rx))
    }

    async fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        let count = workers.len();
        for worker in workers {
            worker.shutdown().await;
        }
        tracing::info!(workers = count, "Decode pool shut down");
    }
}

/// Feeds one worker from the shared queue until the queue is empty.
struct Driver {
    queue: TaskQueue,
    live: Arc<AtomicUsize>,
    tx: mpsc::Sender<String>,
    config: Arc<PoolConfig>,
    idle: Arc<Mutex<Vec<DecodeProcess>>>,
}

impl Driver {
    async fn run(self, worker: DecodeProcess) {
        let mut worker = Some(worker);

        while let Some(current) = worker.as_mut() {
            let Some((index, line)) = self.queue.lock().await.pop_front() else {
                break;
            };

            let record = match current.request(&line).await {
                Ok(response) => check_record_line(&response, index).unwrap_or_else(|e| {
                    tracing::warn!(index, error = %e, "Decode worker returned an invalid record");
                    failure_line(index, "decode worker returned an invalid record", &e)
                }),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Decode worker died, respawning");
                    current.kill().await;
                    worker = match DecodeProcess::spawn(&self.config).await {
                        Ok(fresh) => Some(fresh),
                        Err(spawn_err) => {
                            tracing::error!(error = %spawn_err, "Could not respawn decode worker, retiring it");
                            None
                        }
                    };
                    failure_line(index, "decode worker died while decoding example", &e)
                }
            };

            if self.tx.send(record).await.is_err() {
                // The stream was dropped; nobody is waiting for results.
                break;
            }
        }

        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.fail_remaining().await;
        }
        if let Some(worker) = worker {
            self.idle.lock().await.push(worker);
        }
    }

    async fn fail_remaining(&self) {
        let remaining: Vec<_> = self.queue.lock().await.drain(..).collect();
        if remaining.is_empty() {
            return;
        }
        tracing::error!(tasks = remaining.len(), "No decode workers left, failing remaining tasks");
        for (index, _) in remaining {
            let line = failure_line(
                index,
                "no decode worker available for example",
                &DispatchError::ProcessDied,
            );
            if self.tx.send(line).await.is_err() {
                break;
            }
        }
    }
}
