use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use super::error::{StoreError, SubscriptionError};
use super::identity::Identity;
use super::task::{NewTask, TaskId, TaskPatch, TaskSnapshot};

/// Storage sub-path owning one identity's tasks. Partition membership
/// is the only ownership relation: a subscription on a partition never
/// observes documents outside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    uid: String,
}

impl Partition {
    pub fn for_identity(identity: &Identity) -> Self {
        Self { uid: identity.uid.clone() }
    }

    pub fn for_uid(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Full collection path in the document store.
    pub fn path(&self) -> String {
        format!("root/Todo/user/{}/tasks", self.uid)
    }
}

/// Cancellation handle for a live query. `cancel` is synchronous and
/// idempotent, and also runs on drop, so a subscription cannot outlive
/// its owner. Callers must not read the paired snapshot receiver after
/// cancelling.
pub struct SubscriptionHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Mutex::new(Some(Box::new(cancel))) }
    }

    pub fn cancel(&self) {
        let f = self.cancel.lock().unwrap().take();
        if let Some(f) = f {
            f();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One open live query: `snapshots` is seeded with the initial result
/// set and replaced wholesale on every change to the partition. A
/// mid-session failure arrives as a single `Err` value, after which no
/// further snapshots follow.
pub struct LiveList {
    pub snapshots: watch::Receiver<Result<TaskSnapshot, SubscriptionError>>,
    pub handle: SubscriptionHandle,
}

/// Document-store boundary. All operations are asynchronous; writes
/// become observable through the live queries of the affected
/// partition, not through the call's return value.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn subscribe(&self, partition: &Partition) -> Result<LiveList, StoreError>;

    /// Creates a document; the store assigns id and creation timestamp.
    async fn insert(&self, partition: &Partition, new: NewTask) -> Result<TaskId, StoreError>;

    async fn update(
        &self,
        partition: &Partition,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<(), StoreError>;

    async fn remove(&self, partition: &Partition, id: TaskId) -> Result<(), StoreError>;
}
