//! Per-company dashboard snapshots, recomputed when the document store
//! reports a change and on a fixed interval for backend discovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::lifecycle::account::company_profile;
use crate::lifecycle::views::{StatusSummary, active_requests, completed_requests, pending_requests};
use crate::models::company::CompanyIdentity;
use crate::models::request::Request;
use crate::normalize::normalize_backend_request;
use crate::state::AppState;
use crate::store::{ChangeEvent, Collection};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
    pub pending: Vec<Request>,
    pub active: Vec<Request>,
    pub completed: Vec<Request>,
    pub nearby: Vec<Request>,
    pub summary: StatusSummary,
}

/// Companies stop being refreshed after this many refresh intervals
/// without a dashboard visit.
pub const IDLE_INTERVALS: u32 = 5;

struct Tracked {
    company: CompanyIdentity,
    last_seen: Instant,
}

#[derive(Default)]
pub struct ViewCache {
    snapshots: DashMap<String, Arc<Snapshot>>,
    tracked: DashMap<String, Tracked>,
    generation: AtomicU64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drawn before fetching, so a slow fetch carries an older number than
    /// any fetch started after it.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Installs `snapshot` unless a newer generation is already in place.
    /// Returns whether it was installed.
    pub fn install(&self, company_id: &str, snapshot: Snapshot) -> bool {
        match self.snapshots.entry(company_id.to_string()) {
            Entry::Occupied(current) if current.get().generation > snapshot.generation => false,
            Entry::Occupied(mut current) => {
                current.insert(Arc::new(snapshot));
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(snapshot));
                true
            }
        }
    }

    pub fn get(&self, company_id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots
            .get(company_id)
            .map(|entry| entry.value().clone())
    }

    /// Records a dashboard visit.
    pub fn track(&self, company: &CompanyIdentity) {
        self.tracked.insert(
            company.id.clone(),
            Tracked {
                company: company.clone(),
                last_seen: Instant::now(),
            },
        );
    }

    pub fn tracked(&self) -> Vec<CompanyIdentity> {
        self.tracked
            .iter()
            .map(|entry| entry.value().company.clone())
            .collect()
    }

    /// Forgets companies not seen within `max_idle`, snapshots included.
    /// Returns how many were dropped.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.tracked.retain(|id, entry| {
            let keep = now.duration_since(entry.last_seen) <= max_idle;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        for id in &expired {
            self.snapshots.remove(id);
        }
        expired.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

/// Backend "nearby" discovery for the company's city. Failures leave the
/// list empty.
pub async fn discover_nearby(state: &AppState, company: &CompanyIdentity) -> Vec<Request> {
    let city = match company_profile(state, company).await {
        Ok(profile) => profile.city,
        Err(err) => {
            warn!(company_id = %company.id, error = %err, "profile lookup failed before discovery");
            None
        }
    };

    match state.backend.pending_requests(city.as_deref()).await {
        Ok(rows) => rows
            .iter()
            .map(|row| normalize_backend_request(row, company))
            .collect(),
        Err(err) => {
            warn!(company_id = %company.id, error = %err, "backend discovery failed");
            Vec::new()
        }
    }
}

/// Recomputes one company's snapshot and returns the snapshot now in place,
/// which may be a newer one than this call produced.
pub async fn refresh_company(
    state: &AppState,
    company: &CompanyIdentity,
    include_nearby: bool,
) -> Result<Arc<Snapshot>, AppError> {
    let generation = state.views.next_generation();

    let (pending, active, completed) = tokio::try_join!(
        pending_requests(state, company),
        active_requests(state, company),
        completed_requests(state, company),
    )?;

    let nearby = if include_nearby {
        discover_nearby(state, company).await
    } else {
        state
            .views
            .get(&company.id)
            .map(|previous| previous.nearby.clone())
            .unwrap_or_default()
    };

    let snapshot = Snapshot {
        generation,
        refreshed_at: Utc::now(),
        summary: StatusSummary {
            pending: pending.len(),
            active: active.len(),
            completed: completed.len(),
        },
        pending,
        active,
        completed,
        nearby,
    };

    if !state.views.install(&company.id, snapshot) {
        state.metrics.stale_snapshots_discarded_total.inc();
        debug!(company_id = %company.id, generation, "discarded stale snapshot");
    }

    state
        .views
        .get(&company.id)
        .ok_or_else(|| AppError::Internal(format!("no snapshot for company {}", company.id)))
}

/// Dashboard read: recomputes the document-store lists, running backend
/// discovery only on the company's first visit.
pub async fn dashboard(state: &AppState, company: &CompanyIdentity) -> Result<Arc<Snapshot>, AppError> {
    state
        .metrics
        .view_refreshes_total
        .with_label_values(&["request"])
        .inc();
    let first_visit = state.views.get(&company.id).is_none();
    state.views.track(company);
    refresh_company(state, company, first_visit).await
}

async fn refresh_tracked(state: &AppState, trigger: &'static str, include_nearby: bool) {
    let companies = state.views.tracked();
    if companies.is_empty() {
        return;
    }

    state
        .metrics
        .view_refreshes_total
        .with_label_values(&[trigger])
        .inc();
    for company in companies {
        if let Err(err) = refresh_company(state, &company, include_nearby).await {
            warn!(company_id = %company.id, trigger, error = %err, "view refresh failed");
        }
    }
}

fn affects_views(event: &ChangeEvent) -> bool {
    matches!(event.collection, Collection::Requests | Collection::Deliveries)
}

pub async fn run_refresher(state: Arc<AppState>, every: Duration) {
    info!(interval_secs = every.as_secs(), "view refresher started");

    let mut events = state.store.subscribe();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = state.views.expire_idle(every * IDLE_INTERVALS);
                if expired > 0 {
                    info!(expired, "dropped idle dashboards");
                }
                refresh_tracked(&state, "interval", true).await;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    let mut relevant = affects_views(&event);
                    let mut lagged = false;
                    loop {
                        match events.try_recv() {
                            Ok(queued) => relevant |= affects_views(&queued),
                            Err(TryRecvError::Lagged(_)) => lagged = true,
                            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                        }
                    }
                    if lagged {
                        refresh_tracked(&state, "lagged", false).await;
                    } else if relevant {
                        refresh_tracked(&state, "change", false).await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged, refreshing all views");
                    refresh_tracked(&state, "lagged", false).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    warn!("view refresher stopped: change feed closed");
}
