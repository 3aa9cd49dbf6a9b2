use std::sync::Arc;

use creatorpay_bus::{SyncBus, SyncEvent};
use creatorpay_schema::{BackendState, Channel, Evaluation, Payout, Post, RemoteAction, Toast};
use tokio::sync::{broadcast, Mutex};

use crate::error::{CoreError, CoreResult};
use crate::evaluation::Evaluator;
use crate::negotiation::{opening_transcript, NegotiationSession, PayoutDecider};

/// Where payouts go and how much one may be.
#[derive(Debug, Clone)]
pub struct PayoutTarget {
    pub destination_address: String,
    pub max_budget: f64,
}

/// Collaborators a session state is built from.
#[derive(Clone)]
pub struct StateDeps {
    pub evaluator: Arc<dyn Evaluator>,
    pub decider: Arc<dyn PayoutDecider>,
    pub target: PayoutTarget,
}

/// One session's state tree plus its push channel.
///
/// The tree lock is only held for in-memory reads and writes, never across an
/// evaluator, decider or content-source call.
pub struct SessionState {
    id: String,
    tree: Mutex<BackendState>,
    bus: SyncBus,
    evaluator: Arc<dyn Evaluator>,
    negotiation: NegotiationSession,
    target: PayoutTarget,
}

impl SessionState {
    pub fn new(id: impl Into<String>, deps: StateDeps, bus: SyncBus) -> Self {
        Self {
            id: id.into(),
            tree: Mutex::new(BackendState::default()),
            bus,
            evaluator: deps.evaluator,
            negotiation: NegotiationSession::new(deps.decider),
            target: deps.target,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    pub async fn snapshot(&self) -> Arc<BackendState> {
        Arc::new(self.tree.lock().await.clone())
    }

    /// Runs `f` against the tree under the lock.
    pub async fn read<R>(&self, f: impl FnOnce(&BackendState) -> R) -> R {
        let tree = self.tree.lock().await;
        f(&*tree)
    }

    pub(crate) async fn mutate<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        let mut tree = self.tree.lock().await;
        f(&mut *tree)
    }

    /// Unconditional push of the whole tree.
    pub async fn sync(&self, toast: Option<Toast>) -> u64 {
        let snapshot = self.snapshot().await;
        self.bus.publish(snapshot, toast).await
    }

    /// Push only if the minimum interval has passed since the last push.
    /// A skipped push stays pending and is delivered by the next one.
    pub async fn sync_throttled(&self) -> Option<u64> {
        if self.bus.admit().await {
            Some(self.sync(None).await)
        } else {
            None
        }
    }

    pub async fn notify(&self, toast: Toast) -> u64 {
        self.sync(Some(toast)).await
    }

    /// Appends the channel as given, even when its id is already tracked.
    pub async fn add_channel(&self, channel: Channel) {
        let id = channel.id.clone();
        self.mutate(|tree| tree.push_channel(channel)).await;
        tracing::info!(session_id = %self.id, channel_id = %id, "channel added");
        self.notify(Toast::success("Channel added")).await;
    }

    pub(crate) async fn record_channel(&self, channel: Channel) {
        self.mutate(|tree| {
            tree.upsert_channel(channel);
        })
        .await;
    }

    pub(crate) async fn record_post(&self, post: Post) {
        self.mutate(|tree| tree.upsert_post(post)).await;
    }

    /// Evaluates the post outside the lock, then stores the result.
    pub async fn evaluate_post(&self, post: &Post) -> CoreResult<Evaluation> {
        let evaluation = self.evaluator.evaluate(post).await?;
        self.mutate(|tree| {
            tree.upsert_evaluation(evaluation.clone());
        })
        .await;
        Ok(evaluation)
    }

    /// Negotiates and pays for one post, committing the payout and the agent's
    /// message together. Publishes nothing.
    pub async fn pay_for_post(&self, channel_id: &str, post_id: &str) -> CoreResult<Payout> {
        let (channel, post, evaluation, transcript) = self
            .read(|tree| {
                let channel = tree
                    .channel(channel_id)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("channel", channel_id))?;
                let post = tree
                    .post(channel_id, post_id)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("post", post_id))?;
                let evaluation = tree
                    .evaluation(post_id)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("evaluation", post_id))?;
                let transcript = tree
                    .negotiation(post_id)
                    .cloned()
                    .unwrap_or_else(|| opening_transcript(&channel, &post));
                Ok::<_, CoreError>((channel, post, evaluation, transcript))
            })
            .await?;

        let (payout, transcript) = self
            .negotiation
            .negotiate_and_pay(
                &channel,
                &post,
                &evaluation,
                transcript,
                &self.target.destination_address,
                self.target.max_budget,
            )
            .await?;

        let committed = payout.clone();
        let count = self
            .mutate(move |tree| {
                let entry = tree.negotiation_or_insert_with(post_id, Default::default);
                if entry.is_empty() {
                    *entry = transcript;
                } else if let Some(agent_message) = transcript.last() {
                    entry.push(agent_message.clone());
                }
                tree.append_payout(post_id, committed)
            })
            .await;
        tracing::debug!(session_id = %self.id, post_id, payouts = count, "payout committed");
        Ok(payout)
    }

    /// Viewer-facing pay action. Failures become an error notice; exactly one
    /// push happens either way.
    pub async fn evaluate_and_pay_for_post(
        &self,
        channel_id: &str,
        post_id: &str,
    ) -> CoreResult<Payout> {
        match self.pay_for_post(channel_id, post_id).await {
            Ok(payout) => {
                self.notify(Toast::success(format!(
                    "Paid {:.2} USDC for post {post_id}",
                    payout.determined_final_payout
                )))
                .await;
                Ok(payout)
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.id,
                    channel_id,
                    post_id,
                    error = %e,
                    "pay action failed"
                );
                self.notify(Toast::error(format!("Payout for post {post_id} failed: {e}")))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn handle_action(&self, action: RemoteAction) {
        tracing::debug!(session_id = %self.id, action = action.name(), "remote action");
        match action {
            RemoteAction::AddChannel { channel } => self.add_channel(channel).await,
            RemoteAction::EvaluateAndPayForPost {
                channel_id,
                post_id,
            } => {
                // Outcome already reached the viewer as a notice.
                let _ = self.evaluate_and_pay_for_post(&channel_id, &post_id).await;
            }
        }
    }
}
