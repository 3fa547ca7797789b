//! Sequenced snapshot slot with optimistic patches.
//!
//! Every fetch takes a ticket from a monotonically increasing counter. A
//! result is applied only if its ticket is newer than the last applied one.
//!
//! Optimistic patches are applied on top of the fetched base right away.
//! Once the write behind a patch has committed, the patch remembers the last
//! ticket handed out. Fetches with that ticket or older started before the
//! write landed, so the patch is re-applied on top of them; the first newer
//! fetch reconciles the patch and drops it, whatever it returned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, trace};

use super::SyncError;

/// What consumers see. Always a whole, consistent list.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub items: Arc<Vec<T>>,
    /// Ticket of the fetch the items are based on; 0 before the first one.
    pub seq: u64,
    pub loaded: bool,
    /// Last failed read, cleared by the next successful one.
    pub last_error: Option<Arc<SyncError>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            seq: self.seq,
            loaded: self.loaded,
            last_error: self.last_error.clone(),
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            seq: 0,
            loaded: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn seq(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchId(u64);

type PatchFn<T> = Box<dyn Fn(&mut Vec<T>) + Send + Sync>;

struct OptimisticPatch<T> {
    id: PatchId,
    /// Set once the write is committed.
    reconcile_after: Option<u64>,
    apply: PatchFn<T>,
}

struct State<T> {
    issued: u64,
    applied: u64,
    base: Arc<Vec<T>>,
    patches: Vec<OptimisticPatch<T>>,
    next_patch: u64,
    loaded: bool,
    last_error: Option<Arc<SyncError>>,
}

pub struct MaterializedView<T> {
    state: Mutex<State<T>>,
    tx: watch::Sender<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> MaterializedView<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self {
            state: Mutex::new(State {
                issued: 0,
                applied: 0,
                base: Arc::new(Vec::new()),
                patches: Vec::new(),
                next_patch: 0,
                loaded: false,
                last_error: None,
            }),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.tx.subscribe()
    }

    /// Takes the ticket for a fetch that is about to start.
    pub fn begin_fetch(&self) -> FetchTicket {
        let mut state = self.lock();
        state.issued += 1;
        FetchTicket(state.issued)
    }

    /// Applies a fetch result. Returns whether it replaced the base.
    pub fn complete(&self, ticket: FetchTicket, result: Result<Vec<T>, SyncError>) -> bool {
        let mut state = self.lock();
        if ticket.0 <= state.applied {
            trace!(ticket = ticket.0, applied = state.applied, "discarding stale fetch");
            return false;
        }

        match result {
            Ok(items) => {
                state.applied = ticket.0;
                state.base = Arc::new(items);
                state.loaded = true;
                state.last_error = None;
                state.patches.retain(|p| match p.reconcile_after {
                    Some(after) if ticket.0 > after => {
                        debug!(patch = p.id.0, ticket = ticket.0, "optimistic patch reconciled");
                        false
                    }
                    _ => true,
                });
                self.publish(&state);
                true
            }
            Err(e) => {
                debug!(ticket = ticket.0, error = %e, "fetch failed; keeping last snapshot");
                state.last_error = Some(Arc::new(e));
                self.publish(&state);
                false
            }
        }
    }

    /// Records a failure that is not tied to a fetch, such as a lost feed.
    pub fn record_error(&self, error: SyncError) {
        let mut state = self.lock();
        state.last_error = Some(Arc::new(error));
        self.publish(&state);
    }

    /// Applies `patch` locally at once. The write behind it must end in
    /// `commit` or `rollback`.
    pub fn apply_optimistic(&self, patch: impl Fn(&mut Vec<T>) + Send + Sync + 'static) -> PatchId {
        let mut state = self.lock();
        state.next_patch += 1;
        let id = PatchId(state.next_patch);
        state.patches.push(OptimisticPatch {
            id,
            reconcile_after: None,
            apply: Box::new(patch),
        });
        self.publish(&state);
        id
    }

    /// The write landed; the next fetch that starts from now on reconciles it.
    pub fn commit(&self, id: PatchId) {
        let mut state = self.lock();
        let issued = state.issued;
        if let Some(patch) = state.patches.iter_mut().find(|p| p.id == id) {
            patch.reconcile_after = Some(issued);
        }
    }

    /// The write failed; the patch is withdrawn.
    pub fn rollback(&self, id: PatchId) {
        let mut state = self.lock();
        state.patches.retain(|p| p.id != id);
        self.publish(&state);
    }

    fn publish(&self, state: &State<T>) {
        let items = if state.patches.is_empty() {
            state.base.clone()
        } else {
            let mut items = state.base.as_ref().clone();
            for patch in &state.patches {
                (patch.apply)(&mut items);
            }
            Arc::new(items)
        };
        self.tx.send_replace(Snapshot {
            items,
            seq: state.applied,
            loaded: state.loaded,
            last_error: state.last_error.clone(),
        });
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MaterializedView<T> {
    fn default() -> Self {
        Self::new()
    }
}
