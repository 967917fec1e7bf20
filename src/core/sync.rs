use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Notify};

use crate::core::donation::Donation;
use crate::core::participant::Participant;
use crate::core::store::{Table, TripStore};
use crate::error::Error;

/// What the backend reported happening to a row. The bridge reloads the
/// whole list either way; the kind only matters for logging.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Synthetic event emitted after (re)joining a change channel, covering
    /// rows changed while no subscription was open.
    Resync,
}

/// A change notification for one watched table.
#[derive(Debug, Clone, Copy)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Last fetch error per table, cleared by the next successful reload.
/// Pages render this next to the (possibly stale) list.
#[derive(PartialEq, Debug, Clone, Default, Serialize)]
pub struct SyncErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donations: Option<String>,
}

/// Read side of the bridge: current list state per table plus the error
/// state. Cheap to clone into every page and websocket task.
#[derive(Clone)]
pub struct ListFeeds {
    pub participants: watch::Receiver<Vec<Participant>>,
    pub donations: watch::Receiver<Vec<Donation>>,
    pub errors: watch::Receiver<SyncErrors>,
}

/// Reload-on-signal synchronization.
///
/// Change events only mark a table stale; a reconciler re-runs the full-list
/// fetch and replaces the in-memory list wholesale. There is no diffing and
/// no merge, so there is nothing to resolve on conflict. A failed reload
/// keeps the last good list and surfaces the error.
pub struct SyncBridge {
    store: TripStore,
    stale: DashMap<Table, ()>,
    wake: Notify,
    participants_tx: watch::Sender<Vec<Participant>>,
    donations_tx: watch::Sender<Vec<Donation>>,
    errors_tx: watch::Sender<SyncErrors>,
}

impl SyncBridge {
    pub fn new(store: TripStore) -> (Self, ListFeeds) {
        let (participants_tx, participants) = watch::channel(Vec::new());
        let (donations_tx, donations) = watch::channel(Vec::new());
        let (errors_tx, errors) = watch::channel(SyncErrors::default());

        (
            SyncBridge {
                store,
                stale: DashMap::new(),
                wake: Notify::new(),
                participants_tx,
                donations_tx,
                errors_tx,
            },
            ListFeeds {
                participants,
                donations,
                errors,
            },
        )
    }

    /// Flag a table for reload and wake the reconciler.
    pub fn mark_stale(&self, table: Table) {
        self.stale.insert(table, ());
        self.wake.notify_one();
    }

    /// Reload every table currently flagged stale.
    pub async fn reconcile(&self) {
        let tables: Vec<Table> = self.stale.iter().map(|entry| *entry.key()).collect();
        for table in tables {
            self.stale.remove(&table);
            match table {
                Table::Participants => {
                    self.apply_participants(self.store.participants().await)
                }
                Table::Donations => self.apply_donations(self.store.donations().await),
            }
        }
    }

    fn apply_participants(&self, fetched: Result<Vec<Participant>, Error>) {
        match fetched {
            Ok(list) => {
                log::debug!("Loaded {} participants", list.len());
                self.participants_tx.send_replace(list);
                self.errors_tx.send_if_modified(|errors| {
                    errors.participants.take().is_some()
                });
            }
            Err(e) => {
                log::warn!("Error refreshing participants: {}", e);
                self.errors_tx.send_if_modified(|errors| {
                    let message = Some(e.to_string());
                    if errors.participants != message {
                        errors.participants = message;
                        true
                    } else {
                        false
                    }
                });
            }
        }
    }

    fn apply_donations(&self, fetched: Result<Vec<Donation>, Error>) {
        match fetched {
            Ok(list) => {
                log::debug!("Loaded {} donations", list.len());
                self.donations_tx.send_replace(list);
                self.errors_tx.send_if_modified(|errors| {
                    errors.donations.take().is_some()
                });
            }
            Err(e) => {
                log::warn!("Error refreshing donations: {}", e);
                self.errors_tx.send_if_modified(|errors| {
                    let message = Some(e.to_string());
                    if errors.donations != message {
                        errors.donations = message;
                        true
                    } else {
                        false
                    }
                });
            }
        }
    }

    /// Drive the bridge until the event sender is dropped.
    ///
    /// Both lists are fetched concurrently up front; afterwards the loop
    /// waits for change notifications. Either initial fetch failing surfaces
    /// independently without cancelling the other.
    pub async fn run(self, mut events: UnboundedReceiver<ChangeEvent>) {
        let (participants, donations) =
            tokio::join!(self.store.participants(), self.store.donations());
        self.apply_participants(participants);
        self.apply_donations(donations);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        log::debug!("{:?} change on {}", event.kind, event.table.name());
                        self.mark_stale(event.table);
                    }
                    None => break,
                },
                _ = self.wake.notified() => self.reconcile().await,
            }
        }

        log::debug!("Change feed closed, sync bridge stopping");
    }
}

/// One `()` per change on any feed, for consumers that only need a "render
/// again" signal. Ends when the bridge stops.
pub fn change_stream(feeds: &ListFeeds) -> impl tokio_stream::Stream<Item = ()> + Unpin {
    use tokio_stream::{wrappers::WatchStream, StreamExt};

    WatchStream::from_changes(feeds.participants.clone())
        .map(|_| ())
        .merge(WatchStream::from_changes(feeds.donations.clone()).map(|_| ()))
        .merge(WatchStream::from_changes(feeds.errors.clone()).map(|_| ()))
}

/// Spawn the bridge, or an inert stand-in when the backend is unconfigured
/// (lists stay empty, events are drained and dropped).
pub fn spawn(store: Option<TripStore>, events: UnboundedReceiver<ChangeEvent>) -> ListFeeds {
    match store {
        Some(store) => {
            let (bridge, feeds) = SyncBridge::new(store);
            tokio::spawn(bridge.run(events));
            feeds
        }
        None => {
            let (participants_tx, participants) = watch::channel(Vec::new());
            let (donations_tx, donations) = watch::channel(Vec::new());
            let (errors_tx, errors) = watch::channel(SyncErrors::default());

            tokio::spawn(async move {
                let _hold = (participants_tx, donations_tx, errors_tx);
                let mut events = events;
                while events.recv().await.is_some() {}
                std::future::pending::<()>().await;
            });

            ListFeeds {
                participants,
                donations,
                errors,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::core::participant::{PaymentStatus, Registration};
    use crate::core::store::memory::MemoryBackend;

    fn registration(name: &str) -> Registration {
        Registration {
            full_name: name.to_string(),
            phone_number: "0712345678".to_string(),
            email: "a@b.co".to_string(),
            number_of_guests: 1,
            payment_status: PaymentStatus::Pending,
            amount_paid: 0.0,
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn test_event_triggers_full_reload() {
        let backend = Arc::new(MemoryBackend::default());
        let store = TripStore::new(backend);
        store.register_participant(&registration("First")).await.unwrap();

        let (bridge, feeds) = SyncBridge::new(store.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(bridge.run(rx));

        let mut participants = feeds.participants.clone();
        timeout(Duration::from_secs(1), participants.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(participants.borrow().len(), 1);

        store.register_participant(&registration("Second")).await.unwrap();
        tx.send(ChangeEvent {
            table: Table::Participants,
            kind: ChangeKind::Insert,
        })
        .unwrap();

        timeout(Duration::from_secs(1), participants.changed())
            .await
            .unwrap()
            .unwrap();
        let names: Vec<String> = participants
            .borrow()
            .iter()
            .map(|p| p.full_name.clone())
            .collect();
        assert_eq!(names, ["First", "Second"]);
    }

    #[tokio::test]
    async fn test_failed_reload_retains_last_good_list() {
        let backend = Arc::new(MemoryBackend::default());
        let store = TripStore::new(backend.clone());
        store.register_participant(&registration("Kept")).await.unwrap();

        let (bridge, feeds) = SyncBridge::new(store);
        bridge.mark_stale(Table::Participants);
        bridge.reconcile().await;
        assert_eq!(feeds.participants.borrow().len(), 1);

        backend.set_failure(Some("connection reset"));
        bridge.mark_stale(Table::Participants);
        bridge.reconcile().await;

        assert_eq!(feeds.participants.borrow()[0].full_name, "Kept");
        assert_eq!(
            feeds.errors.borrow().participants.as_deref(),
            Some("connection reset")
        );

        backend.set_failure(None);
        bridge.mark_stale(Table::Participants);
        bridge.reconcile().await;
        assert_eq!(feeds.errors.borrow().participants, None);
    }

    #[tokio::test]
    async fn test_first_load_failure_leaves_list_empty_with_error() {
        let backend = Arc::new(MemoryBackend::failing("timeout"));
        let store = TripStore::new(backend);

        let (bridge, feeds) = SyncBridge::new(store);
        bridge.mark_stale(Table::Donations);
        bridge.reconcile().await;

        assert!(feeds.donations.borrow().is_empty());
        assert_eq!(feeds.errors.borrow().donations.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_coalesces_pending_marks_per_table() {
        let backend = Arc::new(MemoryBackend::default());
        let store = TripStore::new(backend.clone());

        let (bridge, _feeds) = SyncBridge::new(store);
        let before = backend.select_calls.load(std::sync::atomic::Ordering::SeqCst);

        bridge.mark_stale(Table::Participants);
        bridge.mark_stale(Table::Participants);
        bridge.mark_stale(Table::Participants);
        bridge.reconcile().await;

        let after = backend.select_calls.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(after - before, 1);
    }
}
