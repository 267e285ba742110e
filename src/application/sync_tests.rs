#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::watch;
    use uuid::Uuid;

    use crate::application::sync::{ListState, SyncService};
    use crate::domain::error::{StoreError, SubscriptionError, TaskError};
    use crate::domain::identity::Identity;
    use crate::domain::store::{LiveList, Partition, SubscriptionHandle, TaskStore};
    use crate::domain::task::{NewTask, Task, TaskId, TaskPatch, TaskSnapshot};

    struct Feed {
        path: String,
        tx: watch::Sender<Result<TaskSnapshot, SubscriptionError>>,
        cancelled: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct Inner {
        docs: HashMap<String, Vec<Task>>,
        feeds: Vec<Feed>,
        seq: i64,
    }

    /// In-memory document store double, instrumented so tests can check
    /// how many live queries are open at once.
    #[derive(Default)]
    struct MemoryStore {
        inner: Arc<Mutex<Inner>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl MemoryStore {
        fn active(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        /// Pushes a mid-session failure into every open feed.
        fn break_feeds(&self, reason: &str) {
            let inner = self.inner.lock().unwrap();
            for feed in inner.feeds.iter().filter(|f| !f.cancelled.load(Ordering::SeqCst)) {
                let _ = feed.tx.send(Err(SubscriptionError { reason: reason.to_string() }));
            }
        }

        fn snapshot_of(docs: &HashMap<String, Vec<Task>>, path: &str) -> TaskSnapshot {
            let mut tasks = docs.get(path).cloned().unwrap_or_default();
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.0.cmp(&b.id.0)));
            TaskSnapshot { tasks }
        }

        fn fan_out(inner: &mut Inner, path: &str) {
            let snapshot = Self::snapshot_of(&inner.docs, path);
            for feed in inner
                .feeds
                .iter()
                .filter(|f| f.path == path && !f.cancelled.load(Ordering::SeqCst))
            {
                let _ = feed.tx.send(Ok(snapshot.clone()));
            }
        }
    }

    #[async_trait]
    impl TaskStore for MemoryStore {
        async fn subscribe(&self, partition: &Partition) -> Result<LiveList, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            let path = partition.path();
            let initial = Self::snapshot_of(&inner.docs, &path);
            let (tx, rx) = watch::channel(Ok(initial));
            let cancelled = Arc::new(AtomicBool::new(false));
            inner.feeds.push(Feed { path, tx, cancelled: cancelled.clone() });

            let n = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(n, Ordering::SeqCst);
            let active = self.active.clone();
            let handle = SubscriptionHandle::new(move || {
                cancelled.store(true, Ordering::SeqCst);
                active.fetch_sub(1, Ordering::SeqCst);
            });
            Ok(LiveList { snapshots: rx, handle })
        }

        async fn insert(&self, partition: &Partition, new: NewTask) -> Result<TaskId, StoreError> {
            let mut inner = self.inner.lock().unwrap();
            inner.seq += 1;
            let created_at = Utc.timestamp_opt(1_700_000_000 + inner.seq, 0).unwrap();
            let id = TaskId(Uuid::new_v4());
            let path = partition.path();
            inner.docs.entry(path.clone()).or_default().push(Task {
                id,
                title: new.title,
                detail: new.detail,
                completed: false,
                created_at,
            });
            Self::fan_out(&mut inner, &path);
            Ok(id)
        }

        async fn update(
            &self,
            partition: &Partition,
            id: TaskId,
            patch: TaskPatch,
        ) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            let path = partition.path();
            {
                let docs = inner.docs.entry(path.clone()).or_default();
                let Some(task) = docs.iter_mut().find(|t| t.id == id) else {
                    return Err(StoreError::NotFound);
                };
                if let Some(title) = patch.title {
                    task.title = title;
                }
                if let Some(detail) = patch.detail {
                    task.detail = detail;
                }
                if let Some(completed) = patch.completed {
                    task.completed = completed;
                }
            }
            Self::fan_out(&mut inner, &path);
            Ok(())
        }

        async fn remove(&self, partition: &Partition, id: TaskId) -> Result<(), StoreError> {
            let mut inner = self.inner.lock().unwrap();
            let path = partition.path();
            {
                let docs = inner.docs.entry(path.clone()).or_default();
                let before = docs.len();
                docs.retain(|t| t.id != id);
                if docs.len() == before {
                    return Err(StoreError::NotFound);
                }
            }
            Self::fan_out(&mut inner, &path);
            Ok(())
        }
    }

    fn identity(uid: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            email: Some(format!("{uid}@example.com")),
            display_name: None,
        }
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<ListState>, mut pred: F) -> ListState
    where
        F: FnMut(&ListState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let current = rx.borrow_and_update().clone();
                if pred(&current) {
                    return current;
                }
                rx.changed().await.expect("list state channel closed");
            }
        })
        .await
        .expect("timed out waiting for list state")
    }

    #[tokio::test]
    async fn sign_in_then_create_shows_up_in_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(None);
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();

        auth_tx.send_replace(Some(identity("u1")));
        wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.is_empty())).await;

        sync.create_task("Buy milk", "2%").await.unwrap();
        let state =
            wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.len() == 1)).await;
        let snap = state.snapshot().unwrap();
        assert_eq!(snap.tasks[0].title, "Buy milk");
        assert_eq!(snap.tasks[0].detail, "2%");
        assert!(!snap.tasks[0].completed);
        assert_eq!(snap.remaining(), 1);
    }

    #[tokio::test]
    async fn at_most_one_subscription_across_transitions() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert(&Partition::for_uid("u2"), NewTask { title: "theirs".into(), detail: String::new() })
            .await
            .unwrap();

        let (auth_tx, auth_rx) = watch::channel(None);
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();

        auth_tx.send_replace(Some(identity("u1")));
        wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.is_empty())).await;
        assert_eq!(store.active(), 1);

        auth_tx.send_replace(Some(identity("u2")));
        wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.len() == 1)).await;
        assert_eq!(store.active(), 1);

        auth_tx.send_replace(None);
        wait_for(&mut states, |s| matches!(s, ListState::SignedOut)).await;
        assert_eq!(store.active(), 0);
        assert_eq!(store.peak(), 1);

        drop(sync);
    }

    #[tokio::test]
    async fn identity_switch_never_leaks_the_old_partition() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert(&Partition::for_uid("u1"), NewTask { title: "mine".into(), detail: String::new() })
            .await
            .unwrap();
        store
            .insert(&Partition::for_uid("u2"), NewTask { title: "theirs".into(), detail: String::new() })
            .await
            .unwrap();

        let (auth_tx, auth_rx) = watch::channel(Some(identity("u1")));
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();

        wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.len() == 1)).await;

        auth_tx.send_replace(Some(identity("u2")));
        // The first live state after the switch must already be scoped
        // to the new partition.
        let state = wait_for(&mut states, |s| {
            matches!(s, ListState::Live(snap) if snap.tasks.iter().any(|t| t.title == "theirs"))
        })
        .await;
        let snap = state.snapshot().unwrap();
        assert!(snap.tasks.iter().all(|t| t.title == "theirs"));

        drop(sync);
    }

    #[tokio::test]
    async fn cancelling_a_subscription_twice_is_harmless() {
        let store = MemoryStore::default();
        let partition = Partition::for_uid("u1");
        let live = store.subscribe(&partition).await.unwrap();
        assert_eq!(store.active(), 1);

        live.handle.cancel();
        live.handle.cancel();
        assert_eq!(store.active(), 0);

        // Writes after cancellation are not delivered.
        store
            .insert(&partition, NewTask { title: "late".into(), detail: String::new() })
            .await
            .unwrap();
        assert!(matches!(&*live.snapshots.borrow(), Ok(snap) if snap.is_empty()));
    }

    #[tokio::test]
    async fn double_toggle_restores_completed() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(None);
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();

        auth_tx.send_replace(Some(identity("u1")));
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;

        let id = sync.create_task("Test", "").await.unwrap();
        wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.len() == 1)).await;

        sync.toggle_task(id).await.unwrap();
        let state = wait_for(&mut states, |s| {
            matches!(s, ListState::Live(snap) if snap.get(id).is_some_and(|t| t.completed))
        })
        .await;
        assert_eq!(state.snapshot().unwrap().remaining(), 0);

        sync.toggle_task(id).await.unwrap();
        let state = wait_for(&mut states, |s| {
            matches!(s, ListState::Live(snap) if snap.get(id).is_some_and(|t| !t.completed))
        })
        .await;
        assert_eq!(state.snapshot().unwrap().remaining(), 1);
    }

    #[tokio::test]
    async fn whitespace_title_is_rejected_locally() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(Some(identity("u1")));
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;

        let err = sync.create_task("   ", "detail").await.unwrap_err();
        assert_eq!(err, TaskError::EmptyTitle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(sync.state(), ListState::Live(snap) if snap.is_empty()));
        drop(auth_tx);
    }

    #[tokio::test]
    async fn sign_out_clears_the_list_and_stops_delivery() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(None);
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();

        auth_tx.send_replace(Some(identity("u1")));
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;
        sync.create_task("Test", "").await.unwrap();
        wait_for(&mut states, |s| matches!(s, ListState::Live(snap) if snap.len() == 1)).await;

        auth_tx.send_replace(None);
        wait_for(&mut states, |s| matches!(s, ListState::SignedOut)).await;
        assert_eq!(store.active(), 0);

        // An external writer keeps changing the old partition; none of
        // it reaches the signed-out list.
        store
            .insert(&Partition::for_uid("u1"), NewTask { title: "external".into(), detail: String::new() })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.state(), ListState::SignedOut);
    }

    #[tokio::test]
    async fn lost_subscription_parks_until_resync() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(Some(identity("u1")));
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;

        store.break_feeds("permission revoked");
        let state = wait_for(&mut states, |s| matches!(s, ListState::Unavailable { .. })).await;
        assert_eq!(state, ListState::Unavailable { reason: "permission revoked".into() });

        // No automatic reconnect.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.active(), 0);
        assert!(matches!(sync.state(), ListState::Unavailable { .. }));

        sync.resync();
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;
        assert_eq!(store.active(), 1);
        drop(auth_tx);
    }

    #[tokio::test]
    async fn toggling_an_unknown_task_is_not_found() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(Some(identity("u1")));
        let sync = SyncService::start(store, auth_rx);
        let mut states = sync.observe();
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;

        let err = sync.toggle_task(TaskId(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(err, TaskError::Store(StoreError::NotFound));
        drop(auth_tx);
    }

    #[tokio::test]
    async fn writes_fail_fast_without_an_identity() {
        let store = Arc::new(MemoryStore::default());
        let (_auth_tx, auth_rx) = watch::channel(None);
        let sync = SyncService::start(store, auth_rx);

        let err = sync.create_task("Test", "").await.unwrap_err();
        assert_eq!(err, TaskError::NotAuthenticated);
        let err = sync.toggle_task(TaskId(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(err, TaskError::NotAuthenticated);
        let err = sync.delete_task(TaskId(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(err, TaskError::NotAuthenticated);
    }

    #[tokio::test]
    async fn dropping_the_service_releases_the_subscription() {
        let store = Arc::new(MemoryStore::default());
        let (auth_tx, auth_rx) = watch::channel(Some(identity("u1")));
        let sync = SyncService::start(store.clone(), auth_rx);
        let mut states = sync.observe();
        wait_for(&mut states, |s| matches!(s, ListState::Live(_))).await;
        assert_eq!(store.active(), 1);

        drop(sync);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.active(), 0);
        drop(auth_tx);
    }
}
