mod conflict;
mod error;
mod materialize;
pub mod normalize;
pub mod recurrence;

pub use conflict::{contained_in, first_overlap, overlaps, ConflictPolicy};
pub use error::EngineError;
pub use materialize::{materialize, materialize_recurring, materialize_single, validate, Materialized};
pub use normalize::{derive_weekday, normalize};
pub use recurrence::{expand, Occurrences};

use std::sync::Arc;
use std::time::Instant;

use chrono::{Days, NaiveDate, NaiveTime};
use futures::future::join_all;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::observability as obs;
use crate::remote::{HttpRecurrenceJobClient, JobReceipt, RecurrenceJobClient};
use crate::store::{EventStore, InMemoryStore, StoreError, WalStore};

/// Outcome of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    Single(Event),
    /// Booking refused by the conflict check; nothing was saved.
    Rejected(Event, RejectReason),
    /// Accepted occurrences were saved; rejected ones are listed.
    Series(Series),
    /// Expansion was offloaded to the remote job.
    Remote(JobReceipt),
}

impl Created {
    /// Lifecycle state the outcome leaves the new event(s) in. A refused
    /// booking was validated but never saved.
    pub fn state(&self) -> EventState {
        match self {
            Created::Rejected(..) => EventState::Validated,
            Created::Series(series) if series.events.is_empty() => EventState::Validated,
            Created::Single(_) | Created::Series(_) | Created::Remote(_) => EventState::Persisted,
        }
    }
}

enum Plan {
    Offload,
    Local(Materialized),
}

impl Plan {
    /// Nothing would be saved: a refused single booking, or a series whose
    /// every occurrence was rejected.
    fn is_refusal(&self) -> bool {
        match self {
            Plan::Local(Materialized::Rejected(..)) => true,
            Plan::Local(Materialized::Series(series)) => {
                series.events.is_empty() && !series.rejected.is_empty()
            }
            _ => false,
        }
    }
}

/// Orchestrates materialization, conflict checks and the external
/// collaborators. Holds no event state of its own.
pub struct Engine {
    store: Arc<dyn EventStore>,
    remote: Option<Arc<dyn RecurrenceJobClient>>,
    config: EngineConfig,
}

/// Midnight of `start` through midnight two days after `end`, so windows that
/// cross midnight on the last day are still covered.
fn date_window(start: NaiveDate, end: NaiveDate) -> Option<Span> {
    let end = end.checked_add_days(Days::new(2))?;
    let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
    Some(Span::new(normalize::at(start, midnight), normalize::at(end, midnight)))
}

/// Background window relevant to a validated form. `None` means "all".
fn form_window(form: &EventForm, rule: Option<&RecurrenceRule>) -> Option<Span> {
    match rule {
        Some(rule) if rule.end < rule.start => None,
        Some(rule) => date_window(rule.start, rule.end),
        None => {
            let day = normalize::parse_date("date", form.date.as_deref()?).ok()?;
            date_window(day, day)
        }
    }
}

impl Engine {
    pub fn new(store: Arc<dyn EventStore>, config: EngineConfig) -> Self {
        Self {
            store,
            remote: None,
            config,
        }
    }

    pub fn with_remote(mut self, client: Arc<dyn RecurrenceJobClient>) -> Self {
        self.remote = Some(client);
        self
    }

    /// Wire collaborators from configuration: a durable store under
    /// `data_dir` (in-memory otherwise) and the HTTP job client if a remote
    /// URL is set.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let store: Arc<dyn EventStore> = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(StoreError::from)?;
                Arc::new(WalStore::open(&dir.join("events.wal"), config.compact_threshold)?)
            }
            None => Arc::new(InMemoryStore::new()),
        };
        let remote = match &config.remote_url {
            Some(url) => Some(Arc::new(HttpRecurrenceJobClient::new(url, config.remote_timeout)?)
                as Arc<dyn RecurrenceJobClient>),
            None => None,
        };
        info!(
            durable = config.data_dir.is_some(),
            remote = remote.is_some(),
            policy = ?config.conflict_policy,
            "engine configured"
        );
        Ok(Self {
            store,
            remote,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Background spans overlapping `window` (all of them if `None`).
    pub async fn background(&self, window: Option<Span>) -> Result<Vec<Span>, EngineError> {
        let filter = EventFilter {
            window,
            ..EventFilter::background()
        };
        let events = self.store.list(&filter).await?;
        Ok(events.iter().map(|e| e.span).collect())
    }

    /// Materialize a form and persist what the conflict check accepts.
    pub async fn create(&self, form: &EventForm) -> Result<Created, EngineError> {
        let plan = self.prepare(form, &[]).await?;
        self.commit(form, plan).await
    }

    /// Replace an event (or its whole series) with a fresh materialization.
    /// The form is validated and checked before anything is deleted.
    pub async fn update(&self, id: Ulid, form: &EventForm) -> Result<Created, EngineError> {
        let targets = self.resolve_targets(id).await?;
        let plan = self.prepare(form, &targets).await?;
        if plan.is_refusal() {
            // Keep the old event when its replacement would be refused.
            info!(%id, "replacement refused, original kept");
            return self.commit(form, plan).await;
        }
        if let Plan::Offload = plan {
            // The old events go only once the remote job has succeeded.
            let created = self.offload(form).await?;
            self.delete_ids(&targets).await?;
            info!(%id, replaced = targets.len(), "event re-materialized remotely");
            return Ok(created);
        }
        self.delete_ids(&targets).await?;
        info!(%id, replaced = targets.len(), "event re-materialized");
        self.commit(form, plan).await
    }

    /// Delete an event; a series member or root takes the whole series.
    pub async fn delete(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let targets = self.resolve_targets(id).await?;
        self.delete_ids(&targets).await?;
        info!(%id, deleted = targets.len(), "event deleted");
        Ok(targets)
    }

    async fn prepare(&self, form: &EventForm, exclude: &[Ulid]) -> Result<Plan, EngineError> {
        let rule = validate(form)?;
        if let Some(rule) = &rule
            && self.remote.is_some()
            && rule.estimated_len() > self.config.remote_threshold
        {
            return Ok(Plan::Offload);
        }

        let filter = EventFilter {
            window: form_window(form, rule.as_ref()),
            ..EventFilter::background()
        };
        let background: Vec<Span> = self
            .store
            .list(&filter)
            .await?
            .iter()
            .filter(|e| !exclude.contains(&e.id))
            .map(|e| e.span)
            .collect();

        let started = Instant::now();
        let materialized = materialize(form, &background, self.config.conflict_policy)?;
        let shape = if rule.is_some() { "series" } else { "single" };
        metrics::histogram!(obs::MATERIALIZE_DURATION_SECONDS, "shape" => shape)
            .record(started.elapsed().as_secs_f64());
        Ok(Plan::Local(materialized))
    }

    async fn commit(&self, form: &EventForm, plan: Plan) -> Result<Created, EngineError> {
        let materialized = match plan {
            Plan::Offload => return self.offload(form).await,
            Plan::Local(m) => m,
        };
        match materialized {
            Materialized::Single(event) => {
                self.persist_all(std::slice::from_ref(&event)).await?;
                info!(id = %event.id, background = event.is_background(), "event created");
                Ok(Created::Single(event))
            }
            Materialized::Rejected(event, reason) => {
                metrics::counter!(obs::OCCURRENCES_REJECTED_TOTAL, "reason" => obs::reject_label(&reason))
                    .increment(1);
                debug!(?reason, "single booking rejected");
                Ok(Created::Rejected(event, reason))
            }
            Materialized::Series(series) => {
                let expanded = (series.events.len() + series.rejected.len()) as u64;
                metrics::counter!(obs::OCCURRENCES_EXPANDED_TOTAL).increment(expanded);
                for r in &series.rejected {
                    metrics::counter!(obs::OCCURRENCES_REJECTED_TOTAL, "reason" => obs::reject_label(&r.reason))
                        .increment(1);
                }
                self.persist_all(&series.events).await?;
                info!(
                    root = %series.root_id,
                    created = series.events.len(),
                    rejected = series.rejected.len(),
                    "series created"
                );
                Ok(Created::Series(series))
            }
        }
    }

    async fn offload(&self, form: &EventForm) -> Result<Created, EngineError> {
        let Some(remote) = &self.remote else {
            return Err(EngineError::LimitExceeded("series too long"));
        };
        match remote.submit(form).await {
            Ok(receipt) => {
                metrics::counter!(obs::REMOTE_JOBS_TOTAL, "status" => "ok").increment(1);
                info!(created = receipt.created_count, "series offloaded to recurrence job");
                Ok(Created::Remote(receipt))
            }
            Err(e) => {
                metrics::counter!(obs::REMOTE_JOBS_TOTAL, "status" => "error").increment(1);
                warn!("recurrence job failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Save in order; stop at the first failure without rolling back.
    async fn persist_all(&self, events: &[Event]) -> Result<Vec<Ulid>, EngineError> {
        let mut persisted = Vec::with_capacity(events.len());
        for event in events {
            match self.store.save(event).await {
                Ok(id) => persisted.push(id),
                Err(source) => {
                    metrics::counter!(obs::PERSISTENCE_FAILURES_TOTAL).increment(1);
                    warn!(id = %event.id, saved = persisted.len(), "save failed: {source}");
                    return Err(EngineError::Persistence { persisted, source });
                }
            }
        }
        metrics::counter!(obs::EVENTS_PERSISTED_TOTAL).increment(persisted.len() as u64);
        Ok(persisted)
    }

    /// Ids touched by an edit or delete of `id`.
    async fn resolve_targets(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let root = match self.store.get(id).await? {
            Some(event) => match event.series_id() {
                Some(root) => root,
                None => return Ok(vec![id]),
            },
            // Not an event: maybe a series root.
            None => id,
        };
        let members = self.store.list(&EventFilter::series(root)).await?;
        if members.is_empty() {
            return Err(EngineError::NotFound(id));
        }
        Ok(members.into_iter().map(|e| e.id).collect())
    }

    async fn delete_ids(&self, ids: &[Ulid]) -> Result<(), EngineError> {
        let results = join_all(ids.iter().map(|id| self.store.delete(*id))).await;
        let mut deleted = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(true) => deleted.push(*id),
                Ok(false) => {}
                Err(source) => {
                    warn!(%id, "delete failed: {source}");
                    return Err(EngineError::Persistence {
                        persisted: deleted,
                        source,
                    });
                }
            }
        }
        metrics::counter!(obs::EVENTS_DELETED_TOTAL).increment(deleted.len() as u64);
        Ok(())
    }
}
