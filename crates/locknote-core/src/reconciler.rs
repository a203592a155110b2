use crate::models::Note;
use crate::store::{NoteQuery, NoteSnapshot, NoteStore, Partition, SnapshotSink, WatchId};
use crate::telemetry::{Severity, Telemetry};
use crate::vault::CryptoVault;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const COMPONENT: &str = "reconciler";

pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_millis(5_000);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconciledNotes {
    pub revision: u64,
    pub active: Vec<Note>,
    pub archived: Vec<Note>,
}

#[derive(Clone, Debug)]
pub struct ReconcilerOptions {
    pub idle_grace: Duration,
    pub security_enabled: bool,
    pub private_mode: bool,
    pub search_query: String,
    pub suspended: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            idle_grace: DEFAULT_IDLE_GRACE,
            security_enabled: false,
            private_mode: false,
            search_query: String::new(),
            suspended: false,
        }
    }
}

enum Signal {
    PrivateMode(bool),
    SearchQuery(String),
    Security {
        enabled: bool,
        private_mode: bool,
    },
    Snapshot {
        generation: u64,
        snapshot: NoteSnapshot,
    },
    Subscribe {
        id: u64,
        sender: mpsc::Sender<Arc<ReconciledNotes>>,
    },
    Unsubscribe(u64),
    Suspend,
    Resume,
    Shutdown,
}

type SharedView = Arc<RwLock<Arc<ReconciledNotes>>>;

fn read_view(view: &SharedView) -> Arc<ReconciledNotes> {
    Arc::clone(&view.read().unwrap_or_else(|err| err.into_inner()))
}

fn write_view(view: &SharedView, next: Arc<ReconciledNotes>) {
    *view.write().unwrap_or_else(|err| err.into_inner()) = next;
}

/// Folds the mode flags, search text and live store queries into the active
/// and archived note lists. All inputs are owned by one worker thread, and every
/// change recomputes both lists from scratch.
pub struct Reconciler {
    sender: mpsc::Sender<Signal>,
    latest: SharedView,
    next_subscriber: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn spawn(
        store: Arc<dyn NoteStore>,
        vault: Arc<CryptoVault>,
        telemetry: Arc<dyn Telemetry>,
        options: ReconcilerOptions,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<Signal>();
        let latest: SharedView = Arc::new(RwLock::new(Arc::new(ReconciledNotes::default())));
        let worker = Worker {
            store,
            vault,
            telemetry,
            signals: sender.clone(),
            latest: Arc::clone(&latest),
            private_mode: options.private_mode,
            search_query: options.search_query,
            security_enabled: options.security_enabled,
            sources: HashMap::new(),
            watches: Vec::new(),
            generation: 0,
            subscribers: Vec::new(),
            idle_since: None,
            idle_grace: options.idle_grace,
            suspended: options.suspended,
            revision: 0,
        };
        let handle = std::thread::spawn(move || worker.run(receiver));

        Self {
            sender,
            latest,
            next_subscriber: AtomicU64::new(1),
            thread: Mutex::new(Some(handle)),
        }
    }

    fn send(&self, signal: Signal) {
        if self.sender.send(signal).is_err() {
            tracing::warn!("reconciler worker is gone");
        }
    }

    pub fn subscribe(&self) -> NotesSubscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();
        self.send(Signal::Subscribe { id, sender });
        NotesSubscription {
            id,
            receiver,
            latest: Arc::clone(&self.latest),
            signals: self.sender.clone(),
        }
    }

    pub fn current(&self) -> Arc<ReconciledNotes> {
        read_view(&self.latest)
    }

    pub fn set_private_mode(&self, enabled: bool) {
        self.send(Signal::PrivateMode(enabled));
    }

    pub fn set_search_query(&self, query: impl Into<String>) {
        self.send(Signal::SearchQuery(query.into()));
    }

    /// Applies both flags in one step so no emission sees only one of them.
    pub fn reset_security(&self, enabled: bool, private_mode: bool) {
        self.send(Signal::Security {
            enabled,
            private_mode,
        });
    }

    /// Drops store watches and the last output; nothing is emitted until `resume`.
    pub fn suspend(&self) {
        self.send(Signal::Suspend);
    }

    pub fn resume(&self) {
        self.send(Signal::Resume);
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        let _ = self.sender.send(Signal::Shutdown);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

pub struct NotesSubscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<ReconciledNotes>>,
    latest: SharedView,
    signals: mpsc::Sender<Signal>,
}

impl NotesSubscription {
    pub fn latest(&self) -> Arc<ReconciledNotes> {
        read_view(&self.latest)
    }

    /// Newest pending emission, if any arrived since the last call.
    pub fn try_next(&self) -> Option<Arc<ReconciledNotes>> {
        self.receiver.try_iter().last()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<Arc<ReconciledNotes>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Blocks until an emission satisfies `predicate` or the timeout passes.
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<Arc<ReconciledNotes>>
    where
        F: Fn(&ReconciledNotes) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let current = self.latest();
        if current.revision > 0 && predicate(&current) {
            return Some(current);
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(view) if predicate(&view) => return Some(view),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for NotesSubscription {
    fn drop(&mut self) {
        let _ = self.signals.send(Signal::Unsubscribe(self.id));
    }
}

struct Worker {
    store: Arc<dyn NoteStore>,
    vault: Arc<CryptoVault>,
    telemetry: Arc<dyn Telemetry>,
    signals: mpsc::Sender<Signal>,
    latest: SharedView,
    private_mode: bool,
    search_query: String,
    security_enabled: bool,
    sources: HashMap<NoteQuery, Vec<Note>>,
    watches: Vec<WatchId>,
    generation: u64,
    subscribers: Vec<(u64, mpsc::Sender<Arc<ReconciledNotes>>)>,
    idle_since: Option<Instant>,
    idle_grace: Duration,
    suspended: bool,
    revision: u64,
}

impl Worker {
    fn run(mut self, receiver: mpsc::Receiver<Signal>) {
        loop {
            let signal = match self.idle_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(wait) {
                        Ok(signal) => Some(signal),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match receiver.recv() {
                    Ok(signal) => Some(signal),
                    Err(_) => break,
                },
            };

            let mut dirty = match signal {
                Some(Signal::Shutdown) => break,
                Some(signal) => self.handle(signal),
                None => false,
            };
            // Fold everything already queued into a single emission.
            let mut shutdown = false;
            while let Ok(signal) = receiver.try_recv() {
                if matches!(signal, Signal::Shutdown) {
                    shutdown = true;
                    break;
                }
                dirty |= self.handle(signal);
            }
            if dirty {
                self.recombine();
            }
            if shutdown {
                break;
            }
            self.release_if_idle();
        }
        self.detach();
    }

    /// Applies one signal. Returns whether the output needs recombining.
    fn handle(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::PrivateMode(enabled) => {
                let changed = self.private_mode != enabled;
                self.private_mode = enabled;
                changed
            }
            Signal::SearchQuery(query) => {
                let changed = self.search_query != query;
                self.search_query = query;
                changed
            }
            Signal::Security {
                enabled,
                private_mode,
            } => {
                self.security_enabled = enabled;
                self.private_mode = private_mode;
                true
            }
            Signal::Snapshot {
                generation,
                snapshot,
            } => {
                // Snapshots queued before a detach belong to an older generation.
                if generation != self.generation {
                    return false;
                }
                let NoteSnapshot { query, notes } = snapshot;
                if self.sources.get(&query) == Some(&notes) {
                    return false;
                }
                self.sources.insert(query, notes);
                query.partition == self.partition()
            }
            Signal::Subscribe { id, sender } => {
                self.subscribers.push((id, sender));
                self.idle_since = None;
                if self.suspended {
                    return false;
                }
                if self.watches.is_empty() {
                    self.attach();
                } else {
                    let view = read_view(&self.latest);
                    if view.revision > 0 {
                        if let Some((_, sender)) = self.subscribers.last() {
                            let _ = sender.send(view);
                        }
                    }
                }
                false
            }
            Signal::Unsubscribe(id) => {
                self.subscribers.retain(|(subscriber, _)| *subscriber != id);
                if self.subscribers.is_empty() {
                    self.idle_since = Some(Instant::now());
                }
                false
            }
            Signal::Suspend => {
                self.suspended = true;
                self.detach();
                write_view(
                    &self.latest,
                    Arc::new(ReconciledNotes {
                        revision: self.revision,
                        ..ReconciledNotes::default()
                    }),
                );
                false
            }
            Signal::Resume => {
                self.suspended = false;
                if !self.subscribers.is_empty() && self.watches.is_empty() {
                    self.attach();
                }
                false
            }
            Signal::Shutdown => false,
        }
    }

    fn attach(&mut self) {
        self.generation += 1;
        self.sources.clear();
        for query in NoteQuery::LIVE {
            let signals = self.signals.clone();
            let generation = self.generation;
            let sink: SnapshotSink = Arc::new(move |snapshot: NoteSnapshot| {
                signals
                    .send(Signal::Snapshot {
                        generation,
                        snapshot,
                    })
                    .is_ok()
            });
            match self.store.watch(query, sink) {
                Ok(id) => self.watches.push(id),
                Err(err) => self.telemetry.report(
                    Severity::Error,
                    COMPONENT,
                    &format!("could not watch {query:?}"),
                    Some(&err),
                ),
            }
        }
        tracing::debug!(generation = self.generation, "store watches attached");
    }

    fn detach(&mut self) {
        if self.watches.is_empty() && self.sources.is_empty() {
            return;
        }
        for id in self.watches.drain(..) {
            self.store.unwatch(id);
        }
        self.sources.clear();
        self.generation += 1;
        tracing::debug!("store watches released");
    }

    fn idle_deadline(&self) -> Option<Instant> {
        if !self.subscribers.is_empty() || self.watches.is_empty() {
            return None;
        }
        self.idle_since.map(|since| since + self.idle_grace)
    }

    fn release_if_idle(&mut self) {
        if let Some(deadline) = self.idle_deadline() {
            if Instant::now() >= deadline {
                self.detach();
                self.idle_since = None;
            }
        }
    }

    fn partition(&self) -> Partition {
        if !self.security_enabled {
            Partition::All
        } else if self.private_mode {
            Partition::Private
        } else {
            Partition::Regular
        }
    }

    fn recombine(&mut self) {
        if self.suspended {
            return;
        }
        let partition = self.partition();
        let (Some(active), Some(archived)) = (
            self.sources.get(&NoteQuery::new(false, partition)),
            self.sources.get(&NoteQuery::new(true, partition)),
        ) else {
            return;
        };

        let mut active = self.project(active);
        let mut archived = self.project(archived);
        sort_active(&mut active);
        sort_archived(&mut archived);

        self.revision += 1;
        let view = Arc::new(ReconciledNotes {
            revision: self.revision,
            active,
            archived,
        });
        write_view(&self.latest, Arc::clone(&view));

        let had_subscribers = !self.subscribers.is_empty();
        self.subscribers
            .retain(|(_, sender)| sender.send(Arc::clone(&view)).is_ok());
        if had_subscribers && self.subscribers.is_empty() {
            self.idle_since = Some(Instant::now());
        }
    }

    fn project(&self, notes: &[Note]) -> Vec<Note> {
        notes
            .iter()
            .map(|note| {
                if note.encrypted && self.security_enabled {
                    self.vault.reveal_note(note)
                } else {
                    note.clone()
                }
            })
            .filter(|note| {
                self.search_query.trim().is_empty() || note.matches_query(&self.search_query)
            })
            .collect()
    }
}

pub fn sort_active(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}

pub fn sort_archived(notes: &mut [Note]) {
    notes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
