use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::domain::error::{StoreError, SubscriptionError, TaskError};
use crate::domain::identity::Identity;
use crate::domain::store::{Partition, TaskStore};
use crate::domain::task::{NewTask, TaskId, TaskPatch, TaskSnapshot};

/// What the presentation layer renders. Every value replaces the
/// previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListState {
    /// No identity; nothing to show.
    SignedOut,
    /// Live under the current identity's partition.
    Live(TaskSnapshot),
    /// The live query failed after being established. The list stays
    /// here until the next auth transition or an explicit `resync`.
    Unavailable { reason: String },
}

impl ListState {
    pub fn snapshot(&self) -> Option<&TaskSnapshot> {
        match self {
            ListState::Live(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Keeps one live subscription aligned with the current identity and
/// publishes full ordered snapshots.
///
/// The in-memory list is owned here and mutated only by snapshot
/// delivery; the write methods issue store operations and their effect
/// becomes visible through a later snapshot. A single driver task owns
/// the subscription handle, so at most one live query exists at any
/// instant, and it is cancelled before a successor may open.
pub struct SyncService<S: TaskStore> {
    store: Arc<S>,
    identity: watch::Receiver<Option<Identity>>,
    state_rx: watch::Receiver<ListState>,
    resync: Arc<Notify>,
    driver: JoinHandle<()>,
}

impl<S: TaskStore> SyncService<S> {
    /// Spawns the driver task; the service follows `identity` until
    /// shut down or dropped.
    pub fn start(store: Arc<S>, identity: watch::Receiver<Option<Identity>>) -> Self {
        let (state_tx, state_rx) = watch::channel(ListState::SignedOut);
        let resync = Arc::new(Notify::new());
        let driver = tokio::spawn(drive(store.clone(), identity.clone(), state_tx, resync.clone()));
        Self { store, identity, state_rx, resync, driver }
    }

    pub fn observe(&self) -> watch::Receiver<ListState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> ListState {
        self.state_rx.borrow().clone()
    }

    /// Deliberate re-subscription after the list became unavailable.
    /// No-op while signed out or live.
    pub fn resync(&self) {
        self.resync.notify_one();
    }

    /// Cancels any active subscription and stops publishing.
    pub fn shutdown(&self) {
        self.driver.abort();
    }

    pub async fn create_task(&self, title: &str, detail: &str) -> Result<TaskId, TaskError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        let partition = self.partition()?;
        let new = NewTask { title: title.to_string(), detail: detail.trim().to_string() };
        Ok(self.store.insert(&partition, new).await?)
    }

    /// Flips `completed` based on the latest live snapshot; the flip is
    /// observable only via the next snapshot.
    pub async fn toggle_task(&self, id: TaskId) -> Result<(), TaskError> {
        let partition = self.partition()?;
        let completed = self
            .state_rx
            .borrow()
            .snapshot()
            .and_then(|s| s.get(id))
            .map(|t| t.completed)
            .ok_or(TaskError::Store(StoreError::NotFound))?;
        let patch = TaskPatch { completed: Some(!completed), ..TaskPatch::default() };
        Ok(self.store.update(&partition, id, patch).await?)
    }

    pub async fn delete_task(&self, id: TaskId) -> Result<(), TaskError> {
        let partition = self.partition()?;
        Ok(self.store.remove(&partition, id).await?)
    }

    fn partition(&self) -> Result<Partition, TaskError> {
        match &*self.identity.borrow() {
            Some(identity) => Ok(Partition::for_identity(identity)),
            None => Err(TaskError::NotAuthenticated),
        }
    }
}

impl<S: TaskStore> Drop for SyncService<S> {
    fn drop(&mut self) {
        // Subscription release on every exit path: aborting the driver
        // drops any live handle, which cancels on drop.
        self.driver.abort();
    }
}

async fn drive<S: TaskStore>(
    store: Arc<S>,
    mut identity: watch::Receiver<Option<Identity>>,
    state: watch::Sender<ListState>,
    resync: Arc<Notify>,
) {
    loop {
        let current = identity.borrow_and_update().clone();
        let Some(who) = current else {
            state.send_replace(ListState::SignedOut);
            if identity.changed().await.is_err() {
                return;
            }
            continue;
        };

        let partition = Partition::for_identity(&who);
        tracing::debug!(uid = %who.uid, "opening live query");
        let mut live = match store.subscribe(&partition).await {
            Ok(live) => live,
            Err(err) => {
                tracing::warn!(uid = %who.uid, %err, "live query failed to open");
                state.send_replace(ListState::Unavailable { reason: err.to_string() });
                if park(&mut identity, &resync).await.is_err() {
                    return;
                }
                continue;
            }
        };

        // Seeded with the initial result set.
        publish(&state, live.snapshots.borrow_and_update().clone());

        loop {
            tokio::select! {
                // Auth transitions win over pending snapshots, so a
                // stale result set can never be published once the
                // identity has moved on.
                biased;

                changed = identity.changed() => {
                    // Cancel before the outer loop may open the next
                    // subscription; nothing from this partition is
                    // observable past this point.
                    live.handle.cancel();
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                changed = live.snapshots.changed() => {
                    let event = match changed {
                        Ok(()) => live.snapshots.borrow_and_update().clone(),
                        Err(_) => Err(SubscriptionError { reason: "live query ended".into() }),
                    };
                    let lost = event.is_err();
                    publish(&state, event);
                    if lost {
                        live.handle.cancel();
                        if park(&mut identity, &resync).await.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}

fn publish(state: &watch::Sender<ListState>, event: Result<TaskSnapshot, SubscriptionError>) {
    match event {
        Ok(snapshot) => {
            state.send_replace(ListState::Live(snapshot));
        }
        Err(err) => {
            tracing::warn!(%err, "live query lost");
            state.send_replace(ListState::Unavailable { reason: err.reason });
        }
    }
}

/// Wait out an unavailable list: only an auth transition or an explicit
/// resync may leave it. Err means the identity stream is gone.
async fn park(
    identity: &mut watch::Receiver<Option<Identity>>,
    resync: &Notify,
) -> Result<(), watch::error::RecvError> {
    tokio::select! {
        changed = identity.changed() => changed,
        () = resync.notified() => Ok(()),
    }
}
