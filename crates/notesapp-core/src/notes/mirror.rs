//! Best-effort remote mirroring of local note mutations.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::backend::BackendClient;
use crate::models::{Note, NoteId};
use crate::util::now_millis;

/// How many failures the diagnostic log keeps.
pub const MIRROR_FAILURE_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for MirrorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A remote write that did not reach the backend. The local copy stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub operation: MirrorOperation,
    pub note_id: NoteId,
    pub message: String,
    pub failed_at: i64,
}

pub(crate) enum MirrorJob {
    Insert(Note),
    Update(Note),
    Delete { user_id: String, id: NoteId },
}

impl MirrorJob {
    const fn operation(&self) -> MirrorOperation {
        match self {
            Self::Insert(_) => MirrorOperation::Insert,
            Self::Update(_) => MirrorOperation::Update,
            Self::Delete { .. } => MirrorOperation::Delete,
        }
    }

    fn note_id(&self) -> &NoteId {
        match self {
            Self::Insert(note) | Self::Update(note) => &note.id,
            Self::Delete { id, .. } => id,
        }
    }

    async fn run(&self, client: &dyn BackendClient) -> crate::backend::BackendResult<()> {
        match self {
            Self::Insert(note) => client.insert_note(note).await,
            Self::Update(note) => client.update_note(note).await,
            Self::Delete { user_id, id } => client.delete_note(user_id, id).await,
        }
    }
}

enum Queued {
    Job(Arc<dyn BackendClient>, MirrorJob),
    Settle(oneshot::Sender<()>),
}

/// Runs remote writes one at a time, in commit order, on a single worker
/// task, and keeps the most recent failures.
#[derive(Default)]
pub(crate) struct Mirror {
    queue: Mutex<Option<mpsc::UnboundedSender<Queued>>>,
    failures: Arc<Mutex<VecDeque<MirrorFailure>>>,
}

impl Mirror {
    pub(crate) fn spawn(&self, client: Arc<dyn BackendClient>, job: MirrorJob) {
        let mut queue = lock(&self.queue);
        let job = match queue.as_ref() {
            Some(sender) => match sender.send(Queued::Job(client, job)) {
                Ok(()) => return,
                // Worker ended with its runtime.
                Err(mpsc::error::SendError(queued)) => queued,
            },
            None => Queued::Job(client, job),
        };

        let Ok(handle) = Handle::try_current() else {
            *queue = None;
            if let Queued::Job(_, job) = job {
                tracing::debug!(
                    "No async runtime; skipping remote {} of note {}",
                    job.operation(),
                    job.note_id()
                );
            }
            return;
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(drain(receiver, Arc::clone(&self.failures)));
        let _ = sender.send(job);
        *queue = Some(sender);
    }

    /// Wait for every remote write queued so far.
    pub(crate) async fn settle(&self) {
        let (done, settled) = oneshot::channel();
        let queued = lock(&self.queue)
            .as_ref()
            .is_some_and(|sender| sender.send(Queued::Settle(done)).is_ok());
        if queued && settled.await.is_err() {
            tracing::warn!("Mirror worker stopped before draining its queue");
        }
    }

    pub(crate) fn failures(&self) -> Vec<MirrorFailure> {
        lock(&self.failures).iter().cloned().collect()
    }
}

async fn drain(
    mut receiver: mpsc::UnboundedReceiver<Queued>,
    failures: Arc<Mutex<VecDeque<MirrorFailure>>>,
) {
    while let Some(queued) = receiver.recv().await {
        match queued {
            Queued::Job(client, job) => {
                if let Err(error) = job.run(client.as_ref()).await {
                    tracing::warn!(
                        "Remote {} of note {} failed: {}",
                        job.operation(),
                        job.note_id(),
                        error
                    );
                    record_failure(&failures, &job, error.to_string());
                }
            }
            Queued::Settle(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn record_failure(failures: &Mutex<VecDeque<MirrorFailure>>, job: &MirrorJob, message: String) {
    let mut failures = lock(failures);
    if failures.len() == MIRROR_FAILURE_LIMIT {
        failures.pop_front();
    }
    failures.push_back(MirrorFailure {
        operation: job.operation(),
        note_id: job.note_id().clone(),
        message,
        failed_at: now_millis(),
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
