//! Schema probing and latest-request-wins coordination per source group.
//!
//! A [`SchemaProbe`] reads one item's column spec and may be slow. The
//! [`ProbeCoordinator`] hands out one [`ProbeTicket`] per request; starting a
//! new request for a group cancels the previous ticket, and only the current
//! ticket may commit a config. Failed or superseded probes leave the last
//! committed config untouched.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::ConversionCatalog,
    config::TableSpecConfig,
    error::{ProbeError, ReconciliationWarning, RefreshError},
    evolution::SchemaEvolution,
    reconcile::ReconcileOptions,
    spec::TableSpec,
};

/// Reads the raw column spec of a single source item.
pub trait SchemaProbe {
    type External;

    fn probe(&self, item_id: &str) -> Result<TableSpec<Self::External>, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct ProbeTicket {
    group_id: String,
    generation: u64,
    cancel: CancellationToken,
}

impl ProbeTicket {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_active(&self) -> Result<(), ProbeError> {
        if self.is_cancelled() {
            return Err(ProbeError::Cancelled {
                group: self.group_id.clone(),
            });
        }
        Ok(())
    }
}

/// Probes `item_ids` in order. The first failure aborts the whole group, and
/// cancellation is checked before every item.
pub fn probe_items<P>(
    probe: &P,
    item_ids: &[String],
    ticket: &ProbeTicket,
) -> Result<Vec<(String, TableSpec<P::External>)>, ProbeError>
where
    P: SchemaProbe + ?Sized,
{
    let mut specs = Vec::with_capacity(item_ids.len());
    for item_id in item_ids {
        ticket.ensure_active()?;
        let spec = probe.probe(item_id)?;
        debug!("Probed '{item_id}': {} column(s)", spec.len());
        specs.push((item_id.clone(), spec));
    }
    ticket.ensure_active()?;
    Ok(specs)
}

struct GroupSlot<T, U> {
    generation: u64,
    cancel: CancellationToken,
    config: Option<Arc<TableSpecConfig<T, U>>>,
}

pub struct ProbeCoordinator<T, U> {
    groups: Mutex<HashMap<String, GroupSlot<T, U>>>,
    next_generation: AtomicU64,
}

impl<T, U> Default for ProbeCoordinator<T, U> {
    fn default() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }
}

impl<T, U> fmt::Debug for ProbeCoordinator<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = self.lock();
        f.debug_struct("ProbeCoordinator")
            .field("groups", &groups.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T, U> ProbeCoordinator<T, U> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GroupSlot<T, U>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new probe request for `group_id`, superseding any in flight.
    pub fn begin(&self, group_id: &str) -> ProbeTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let mut groups = self.lock();
        match groups.get_mut(group_id) {
            Some(slot) => {
                slot.cancel.cancel();
                debug!(
                    "Probe {} for group '{group_id}' supersedes probe {}",
                    generation, slot.generation
                );
                slot.generation = generation;
                slot.cancel = cancel.clone();
            }
            None => {
                groups.insert(
                    group_id.to_string(),
                    GroupSlot {
                        generation,
                        cancel: cancel.clone(),
                        config: None,
                    },
                );
            }
        }
        ProbeTicket {
            group_id: group_id.to_string(),
            generation,
            cancel,
        }
    }

    pub fn is_current(&self, ticket: &ProbeTicket) -> bool {
        self.lock()
            .get(&ticket.group_id)
            .is_some_and(|slot| slot.generation == ticket.generation)
            && !ticket.is_cancelled()
    }

    /// Stores `config` if `ticket` is still the current request for its group.
    pub fn commit(&self, ticket: &ProbeTicket, config: TableSpecConfig<T, U>) -> Option<Arc<TableSpecConfig<T, U>>> {
        let mut groups = self.lock();
        let slot = groups
            .get_mut(&ticket.group_id)
            .filter(|slot| slot.generation == ticket.generation && !ticket.is_cancelled());
        match slot {
            Some(slot) => {
                let config = Arc::new(config);
                slot.config = Some(Arc::clone(&config));
                Some(config)
            }
            None => {
                warn!(
                    "Discarding stale probe result {} for group '{}'",
                    ticket.generation, ticket.group_id
                );
                None
            }
        }
    }

    /// Cancels the in-flight request for `group_id`, if any.
    pub fn cancel(&self, group_id: &str) {
        if let Some(slot) = self.lock().get(group_id) {
            slot.cancel.cancel();
        }
    }

    /// Drops all state kept for `group_id`, cancelling its in-flight request.
    /// Returns the config that was committed for it, if any.
    pub fn forget(&self, group_id: &str) -> Option<Arc<TableSpecConfig<T, U>>> {
        let slot = self.lock().remove(group_id)?;
        slot.cancel.cancel();
        debug!("Forgot group '{group_id}' at probe {}", slot.generation);
        slot.config
    }

    pub fn config(&self, group_id: &str) -> Option<Arc<TableSpecConfig<T, U>>> {
        self.lock().get(group_id).and_then(|slot| slot.config.clone())
    }
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome<T, U> {
    Committed {
        config: Arc<TableSpecConfig<T, U>>,
        evolution: SchemaEvolution,
        warnings: Vec<ReconciliationWarning>,
    },
    /// A newer request started before this one finished.
    Superseded,
}

/// Probes, reconciles against the group's committed config, and commits.
pub fn refresh<T, U, P, C>(
    coordinator: &ProbeCoordinator<T, U>,
    ticket: &ProbeTicket,
    item_ids: &[String],
    probe: &P,
    catalog: &C,
    options: ReconcileOptions,
) -> Result<RefreshOutcome<T, U>, RefreshError>
where
    T: Clone + PartialEq + fmt::Debug + fmt::Display,
    U: Clone + PartialEq + fmt::Debug + fmt::Display,
    P: SchemaProbe<External = T> + ?Sized,
    C: ConversionCatalog<External = T, Output = U>,
{
    let previous = coordinator.config(ticket.group_id());
    let items = match probe_items(probe, item_ids, ticket) {
        Ok(items) => items,
        Err(err) if err.is_cancelled() => {
            debug!("{err}");
            return Ok(RefreshOutcome::Superseded);
        }
        Err(err) => return Err(err.into()),
    };
    let computed = TableSpecConfig::compute(
        ticket.group_id(),
        items,
        previous.as_ref().map(|config| &config.transformation().columns),
        options,
        catalog,
    )?;
    match coordinator.commit(ticket, computed.config) {
        Some(config) => {
            info!(
                "Committed probe {} for group '{}'",
                ticket.generation(),
                ticket.group_id()
            );
            Ok(RefreshOutcome::Committed {
                config,
                evolution: computed.evolution,
                warnings: computed.warnings,
            })
        }
        None => Ok(RefreshOutcome::Superseded),
    }
}

/// Runs [`refresh`] on a background thread. The ticket is taken before the
/// thread starts, so requests are ordered by call order.
pub fn spawn_refresh<T, U, P, C>(
    coordinator: Arc<ProbeCoordinator<T, U>>,
    group_id: &str,
    item_ids: Vec<String>,
    probe: Arc<P>,
    catalog: Arc<C>,
    options: ReconcileOptions,
) -> (ProbeTicket, JoinHandle<Result<RefreshOutcome<T, U>, RefreshError>>)
where
    T: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static,
    U: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static,
    P: SchemaProbe<External = T> + Send + Sync + 'static,
    C: ConversionCatalog<External = T, Output = U> + Send + Sync + 'static,
{
    let ticket = coordinator.begin(group_id);
    let worker_ticket = ticket.clone();
    let handle = thread::spawn(move || {
        refresh(
            &coordinator,
            &worker_ticket,
            &item_ids,
            probe.as_ref(),
            catalog.as_ref(),
            options,
        )
    });
    (ticket, handle)
}
