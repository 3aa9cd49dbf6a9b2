use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use creatorpay_bus::{SyncBus, SyncEvent};
use creatorpay_schema::Toast;
use creatorpay_source::ContentSource;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, OnceCell, RwLock};

use crate::error::CoreError;
use crate::ingest::{IngestOutcome, IngestPolicy, IngestTask};
use crate::state::{SessionState, StateDeps};

enum IngestSlot {
    NotStarted,
    Running(IngestTask),
    Stopped,
}

/// A connection id bound to its state tree and ingestion run.
pub struct Session {
    pub id: String,
    pub state: Arc<SessionState>,
    pub created_at: DateTime<Utc>,
    ingest: Mutex<IngestSlot>,
}

impl Session {
    pub fn new(id: impl Into<String>, state: Arc<SessionState>) -> Self {
        Self {
            id: id.into(),
            state,
            created_at: Utc::now(),
            ingest: Mutex::new(IngestSlot::NotStarted),
        }
    }

    pub async fn ingest_finished(&self) -> bool {
        match &*self.ingest.lock().await {
            IngestSlot::Running(task) => task.is_finished(),
            IngestSlot::NotStarted => false,
            IngestSlot::Stopped => true,
        }
    }

    /// Launches ingestion unless it already ran for this session.
    async fn launch_ingest(
        &self,
        source: Arc<dyn ContentSource>,
        identities: Vec<String>,
        policy: IngestPolicy,
    ) -> bool {
        let mut slot = self.ingest.lock().await;
        if !matches!(*slot, IngestSlot::NotStarted) {
            return false;
        }
        *slot = IngestSlot::Running(IngestTask::spawn(
            self.state.clone(),
            source,
            identities,
            policy,
        ));
        true
    }

    /// Stops ingestion and returns how it ended, if it was ever started.
    pub async fn teardown(&self) -> Option<IngestOutcome> {
        let previous = std::mem::replace(&mut *self.ingest.lock().await, IngestSlot::Stopped);
        match previous {
            IngestSlot::Running(task) => match task.shutdown().await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(session_id = %self.id, error = %e, "ingestion teardown failed");
                    None
                }
            },
            IngestSlot::NotStarted | IngestSlot::Stopped => None,
        }
    }
}

/// Registry of live sessions keyed by connection id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<Arc<Session>>;

    /// Returns the existing session for `id`, or inserts the one built by
    /// `create`. The flag is true when `create` was used.
    async fn get_or_create<'a>(
        &'a self,
        id: &'a str,
        create: Box<dyn FnOnce() -> Session + Send + 'a>,
    ) -> (Arc<Session>, bool);

    async fn remove(&self, id: &str) -> Option<Arc<Session>>;

    async fn list(&self) -> Vec<Arc<Session>>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn get_or_create<'a>(
        &'a self,
        id: &'a str,
        create: Box<dyn FnOnce() -> Session + Send + 'a>,
    ) -> (Arc<Session>, bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(id) {
            return (existing.clone(), false);
        }
        let session = Arc::new(create());
        sessions.insert(id.to_string(), session.clone());
        (session, true)
    }

    async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    async fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }
}

/// Everything needed to stand up a new session.
#[derive(Clone)]
pub struct SessionBlueprint {
    pub deps: StateDeps,
    pub source: Arc<dyn ContentSource>,
    pub identities: Vec<String>,
    pub policy: IngestPolicy,
    pub min_push_interval: Duration,
    pub bus_capacity: usize,
}

impl SessionBlueprint {
    fn build(&self, id: &str) -> Session {
        let bus = SyncBus::new(self.bus_capacity, self.min_push_interval);
        let state = Arc::new(SessionState::new(id, self.deps.clone(), bus));
        Session::new(id, state)
    }
}

/// Result of attaching a viewer to a session.
pub struct Attached {
    pub session: Arc<Session>,
    pub created: bool,
    /// Subscribed before ingestion was launched, so no push of this run is missed
    pub events: broadcast::Receiver<SyncEvent>,
    /// Notice for the viewer that could not be pushed before it subscribed
    pub notice: Option<Toast>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub channels: usize,
    pub posts: usize,
    pub evaluations: usize,
    pub payouts: usize,
    pub viewers: usize,
    pub ingest_finished: bool,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    blueprint: SessionBlueprint,
    source_ready: OnceCell<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, blueprint: SessionBlueprint) -> Self {
        Self {
            store,
            blueprint,
            source_ready: OnceCell::new(),
        }
    }

    /// Single shared start of the content source. A failure is not cached, the
    /// next connection tries again.
    async fn ensure_source_started(&self) -> Result<(), CoreError> {
        self.source_ready
            .get_or_try_init(|| async {
                self.blueprint.source.start().await?;
                tracing::info!("content source started");
                Ok::<(), CoreError>(())
            })
            .await
            .map(|_| ())
    }

    /// Resumes the session for `id` or creates it, and makes sure its
    /// ingestion has been launched once the content source is up.
    pub async fn connect(&self, id: &str) -> Attached {
        let (session, created) = self
            .store
            .get_or_create(id, Box::new(|| self.blueprint.build(id)))
            .await;
        if created {
            tracing::info!(session_id = %id, "session created");
        } else {
            tracing::debug!(session_id = %id, "session resumed");
        }
        let events = session.state.subscribe();

        let notice = match self.ensure_source_started().await {
            Ok(()) => {
                let launched = session
                    .launch_ingest(
                        self.blueprint.source.clone(),
                        self.blueprint.identities.clone(),
                        self.blueprint.policy,
                    )
                    .await;
                if launched {
                    tracing::info!(
                        session_id = %id,
                        identities = self.blueprint.identities.len(),
                        "ingestion launched"
                    );
                }
                None
            }
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "content source failed to start");
                Some(Toast::error(format!("Content source unavailable: {e}")))
            }
        };

        Attached {
            session,
            created,
            events,
            notice,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.store.get(id).await
    }

    /// Drops the session and stops its ingestion. Returns false when no such
    /// session exists.
    pub async fn remove(&self, id: &str) -> bool {
        let Some(session) = self.store.remove(id).await else {
            return false;
        };
        let outcome = session.teardown().await;
        tracing::info!(session_id = %id, outcome = ?outcome, "session removed");
        true
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();
        for session in self.store.list().await {
            let (channels, posts, evaluations, payouts) = session
                .state
                .read(|tree| {
                    (
                        tree.channels.len(),
                        tree.post_count(),
                        tree.post_evaluations.len(),
                        tree.payout_count(),
                    )
                })
                .await;
            summaries.push(SessionSummary {
                id: session.id.clone(),
                created_at: session.created_at,
                channels,
                posts,
                evaluations,
                payouts,
                viewers: session.state.bus().viewer_count(),
                ingest_finished: session.ingest_finished().await,
            });
        }
        summaries
    }

    /// Tears down every session and stops the content source.
    pub async fn shutdown(&self) {
        for session in self.store.list().await {
            self.remove(&session.id).await;
        }
        if self.source_ready.initialized() {
            if let Err(e) = self.blueprint.source.stop().await {
                tracing::warn!(error = %e, "content source did not stop cleanly");
            }
        }
        tracing::info!("session manager shut down");
    }
}
