use std::sync::Arc;

use creatorpay_schema::Toast;
use creatorpay_source::ContentSource;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_stream::StreamExt;

use crate::error::CoreError;
use crate::state::SessionState;

pub const FINISHED_NOTICE: &str = "Finished fetching channels";

/// What ingestion does with each fetched post besides storing it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestPolicy {
    #[default]
    EvaluateOnly,
    /// Also run the pay cycle for every post that evaluated cleanly
    EvaluateAndPay,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub channels: usize,
    pub posts: usize,
    pub evaluated: usize,
    pub evaluation_failures: usize,
    pub paid: usize,
    pub payment_failures: usize,
}

/// Completion record of a background ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Completed(IngestReport),
    Failed { report: IngestReport, error: String },
    Cancelled,
    Panicked(String),
}

/// Walks every identity in order, storing channels, posts and evaluations.
///
/// The first content-source error stops the run; the closing push and notice
/// are emitted either way.
pub async fn run_ingestion(
    state: &SessionState,
    source: &dyn ContentSource,
    identities: &[String],
    policy: IngestPolicy,
) -> Result<IngestReport, (IngestReport, CoreError)> {
    let mut report = IngestReport::default();
    let result = ingest_identities(state, source, identities, policy, &mut report).await;

    match &result {
        Ok(()) => {
            state.notify(Toast::success(FINISHED_NOTICE)).await;
        }
        Err(e) => {
            state
                .notify(Toast::error(format!("{FINISHED_NOTICE} (partial): {e}")))
                .await;
        }
    }
    tracing::info!(
        session_id = %state.id(),
        channels = report.channels,
        posts = report.posts,
        evaluated = report.evaluated,
        paid = report.paid,
        "ingestion finished"
    );
    match result {
        Ok(()) => Ok(report),
        Err(e) => Err((report, e)),
    }
}

async fn ingest_identities(
    state: &SessionState,
    source: &dyn ContentSource,
    identities: &[String],
    policy: IngestPolicy,
    report: &mut IngestReport,
) -> Result<(), CoreError> {
    for identity in identities {
        let channel = source.fetch_channel(identity).await?;
        let channel_id = channel.id.clone();
        state.record_channel(channel).await;
        report.channels += 1;
        state.sync(None).await;

        let mut posts = source.fetch_posts(identity);
        while let Some(item) = posts.next().await {
            let mut post = item?;
            post.channel_id = channel_id.clone();
            state.record_post(post.clone()).await;
            report.posts += 1;

            match state.evaluate_post(&post).await {
                Ok(_) => {
                    report.evaluated += 1;
                    if policy == IngestPolicy::EvaluateAndPay {
                        match state.pay_for_post(&channel_id, &post.id).await {
                            Ok(_) => report.paid += 1,
                            Err(e) => {
                                report.payment_failures += 1;
                                tracing::error!(
                                    session_id = %state.id(),
                                    post_id = %post.id,
                                    error = %e,
                                    "automatic payout failed"
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    report.evaluation_failures += 1;
                    tracing::warn!(
                        session_id = %state.id(),
                        post_id = %post.id,
                        error = %e,
                        "evaluation failed, post left unevaluated"
                    );
                }
            }

            state.sync_throttled().await;
        }
    }
    Ok(())
}

/// Handle to a supervised ingestion run.
pub struct IngestTask {
    abort: AbortHandle,
    supervisor: JoinHandle<IngestOutcome>,
}

impl IngestTask {
    pub fn spawn(
        state: Arc<SessionState>,
        source: Arc<dyn ContentSource>,
        identities: Vec<String>,
        policy: IngestPolicy,
    ) -> Self {
        let session_id = state.id().to_string();
        let watched = state.clone();
        let worker = tokio::spawn(async move {
            run_ingestion(&state, source.as_ref(), &identities, policy).await
        });
        let abort = worker.abort_handle();

        let supervisor = tokio::spawn(async move {
            match worker.await {
                Ok(Ok(report)) => IngestOutcome::Completed(report),
                Ok(Err((report, error))) => {
                    tracing::error!(
                        session_id = %session_id,
                        channels = report.channels,
                        posts = report.posts,
                        error = %error,
                        "ingestion stopped early"
                    );
                    IngestOutcome::Failed {
                        report,
                        error: error.to_string(),
                    }
                }
                Err(e) if e.is_cancelled() => IngestOutcome::Cancelled,
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "ingestion task panicked");
                    // the worker never reached its closing push
                    watched
                        .notify(Toast::error(format!(
                            "{FINISHED_NOTICE} (partial): ingestion crashed"
                        )))
                        .await;
                    IngestOutcome::Panicked(e.to_string())
                }
            }
        });

        Self { abort, supervisor }
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Waits for the run to end and returns its completion record.
    pub async fn outcome(self) -> Result<IngestOutcome, CoreError> {
        self.supervisor
            .await
            .map_err(|e| CoreError::Task(format!("ingestion supervisor lost: {e}")))
    }

    /// Aborts the run and waits for the supervisor to observe it.
    pub async fn shutdown(self) -> Result<IngestOutcome, CoreError> {
        self.abort();
        self.outcome().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult;
    use crate::evaluation::HeuristicEvaluator;
    use crate::negotiation::{PayoutBriefing, PayoutDecider, PayoutDecision};
    use crate::pricing::PricingPolicy;
    use crate::state::{PayoutTarget, StateDeps};
    use async_trait::async_trait;
    use chrono::Utc;
    use creatorpay_bus::SyncBus;
    use creatorpay_schema::{Channel, ChannelStats, Evaluation, Post, PostStats, ToastKind};
    use creatorpay_source::{FixtureProfile, StaticContentSource};
    use std::time::Duration;

    struct RefuseDecider;

    #[async_trait]
    impl PayoutDecider for RefuseDecider {
        async fn decide(&self, _briefing: &PayoutBriefing) -> CoreResult<PayoutDecision> {
            Err(CoreError::Decision("no".into()))
        }
    }

    struct FlakyEvaluator;

    #[async_trait]
    impl crate::evaluation::Evaluator for FlakyEvaluator {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn evaluate(&self, post: &Post) -> CoreResult<Evaluation> {
            if post.id.ends_with('1') {
                return Err(CoreError::Evaluation("model timeout".into()));
            }
            HeuristicEvaluator::new(PricingPolicy::default(), vec![])
                .evaluate(post)
                .await
        }
    }

    struct PanickingEvaluator;

    #[async_trait]
    impl crate::evaluation::Evaluator for PanickingEvaluator {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn evaluate(&self, _post: &Post) -> CoreResult<Evaluation> {
            panic!("evaluator blew up");
        }
    }

    fn state(interval: Duration) -> Arc<SessionState> {
        state_with_evaluator(
            interval,
            Arc::new(HeuristicEvaluator::new(PricingPolicy::default(), vec![])),
        )
    }

    fn state_with_evaluator(
        interval: Duration,
        evaluator: Arc<dyn crate::evaluation::Evaluator>,
    ) -> Arc<SessionState> {
        Arc::new(SessionState::new(
            "s1",
            StateDeps {
                evaluator,
                decider: Arc::new(RefuseDecider),
                target: PayoutTarget {
                    destination_address: "0xabc".into(),
                    max_budget: 10.0,
                },
            },
            SyncBus::new(256, interval),
        ))
    }

    fn profile(identity: &str, views: &[u64]) -> FixtureProfile {
        FixtureProfile {
            identity: identity.into(),
            channel: Channel {
                id: format!("id-{identity}"),
                unique_id: identity.into(),
                nickname: identity.into(),
                signature: String::new(),
                avatar_url: None,
                stats: ChannelStats::default(),
            },
            posts: views
                .iter()
                .enumerate()
                .map(|(i, v)| Post {
                    id: format!("{identity}-{i}"),
                    // deliberately wrong; ingestion files posts under the fetched channel
                    channel_id: "stale".into(),
                    date_posted: Utc::now(),
                    description: String::new(),
                    url: None,
                    cover_url: None,
                    stats: PostStats {
                        play_count: *v,
                        ..PostStats::default()
                    },
                })
                .collect(),
        }
    }

    async fn started(source: StaticContentSource) -> Arc<StaticContentSource> {
        source.start().await.unwrap();
        Arc::new(source)
    }

    #[tokio::test]
    async fn posts_are_filed_under_fetched_channel() {
        let state = state(Duration::ZERO);
        let source = started(
            StaticContentSource::new()
                .with_profile(profile("a", &[2000, 500]))
                .with_profile(profile("b", &[10])),
        )
        .await;

        let report = run_ingestion(
            &state,
            source.as_ref(),
            &["a".to_string(), "b".to_string()],
            IngestPolicy::EvaluateOnly,
        )
        .await
        .unwrap();

        assert_eq!(report.channels, 2);
        assert_eq!(report.posts, 3);
        let tree = state.snapshot().await;
        let ids: Vec<_> = tree.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["id-a", "id-b"]);
        assert_eq!(tree.posts("id-a").len(), 2);
        assert!(tree.posts_by_channel_id.get("stale").is_none());
        assert_eq!(tree.post_evaluations.len(), 3);
    }

    #[tokio::test]
    async fn evaluation_failure_skips_only_that_post() {
        let state = state_with_evaluator(Duration::ZERO, Arc::new(FlakyEvaluator));
        let source = started(StaticContentSource::new().with_profile(profile("a", &[1, 2, 3]))).await;

        let report = run_ingestion(&state, source.as_ref(), &["a".to_string()], IngestPolicy::EvaluateOnly)
            .await
            .unwrap();

        assert_eq!(report.posts, 3);
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.evaluation_failures, 1);
        let tree = state.snapshot().await;
        assert!(tree.evaluation("a-1").is_none());
        assert!(tree.evaluation("a-2").is_some());
    }

    #[tokio::test]
    async fn upstream_failure_still_sends_partial_notice() {
        let state = state(Duration::ZERO);
        let source = started(
            StaticContentSource::new()
                .with_profile(profile("a", &[1, 2, 3]))
                .with_profile(profile("b", &[4]))
                .with_post_failure("a", 2),
        )
        .await;
        let mut rx = state.subscribe();

        let (report, error) = run_ingestion(
            &state,
            source.as_ref(),
            &["a".to_string(), "b".to_string()],
            IngestPolicy::EvaluateOnly,
        )
        .await
        .unwrap_err();

        assert!(matches!(error, CoreError::UpstreamFetch(_)));
        assert_eq!(report.posts, 2);
        assert_eq!(state.snapshot().await.channels.len(), 1);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let toast = last.unwrap().toast.unwrap();
        assert_eq!(toast.kind, ToastKind::Error);
        assert!(toast.message.starts_with("Finished fetching channels (partial)"));
    }

    #[tokio::test]
    async fn unknown_identity_ends_run() {
        let state = state(Duration::ZERO);
        let source = started(StaticContentSource::new()).await;

        let (report, error) =
            run_ingestion(&state, source.as_ref(), &["ghost".to_string()], IngestPolicy::EvaluateOnly)
                .await
                .unwrap_err();
        assert_eq!(report, IngestReport::default());
        assert!(error.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn evaluate_and_pay_policy_counts_failed_payments() {
        let state = state(Duration::ZERO);
        let source = started(StaticContentSource::new().with_profile(profile("a", &[100, 200]))).await;

        let report = run_ingestion(&state, source.as_ref(), &["a".to_string()], IngestPolicy::EvaluateAndPay)
            .await
            .unwrap();
        assert_eq!(report.paid, 0);
        assert_eq!(report.payment_failures, 2);
        assert_eq!(state.snapshot().await.payout_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_throttled_and_coalesced() {
        let interval = Duration::from_secs_f64(1.0 / 60.0);
        let state = state(interval);
        let views: Vec<u64> = (0..100).collect();
        let source = started(
            StaticContentSource::new()
                .with_profile(profile("a", &views))
                .with_post_delay(Duration::from_millis(1)),
        )
        .await;

        let started_at = tokio::time::Instant::now();
        run_ingestion(&state, source.as_ref(), &["a".to_string()], IngestPolicy::EvaluateOnly)
            .await
            .unwrap();
        let burst = started_at.elapsed();

        let throttled_bound = (burst.as_secs_f64() / interval.as_secs_f64()).floor() as u64 + 1;
        // one push for the channel, one closing push
        let published = state.bus().published();
        assert!(published <= throttled_bound + 2, "{published} pushes for {burst:?}");
        assert!(published < 100);
        assert_eq!(state.snapshot().await.posts("id-a").len(), 100);
    }

    #[tokio::test]
    async fn supervised_task_reports_completion() {
        let state = state(Duration::ZERO);
        let source: Arc<dyn ContentSource> =
            started(StaticContentSource::new().with_profile(profile("a", &[1]))).await;

        let task = IngestTask::spawn(state, source, vec!["a".into()], IngestPolicy::EvaluateOnly);
        match task.outcome().await.unwrap() {
            IngestOutcome::Completed(report) => assert_eq!(report.posts, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn supervised_task_reports_failure() {
        let state = state(Duration::ZERO);
        let source: Arc<dyn ContentSource> = started(StaticContentSource::new()).await;

        let task = IngestTask::spawn(state, source, vec!["ghost".into()], IngestPolicy::EvaluateOnly);
        assert!(matches!(
            task.outcome().await.unwrap(),
            IngestOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn huge_counters_do_not_stop_ingestion() {
        let state = state(Duration::ZERO);
        let mut fixture = profile("a", &[1000, 10]);
        fixture.posts[0].stats.like_count = u64::MAX;
        fixture.posts[0].stats.comment_count = 1;
        let source: Arc<dyn ContentSource> =
            started(StaticContentSource::new().with_profile(fixture)).await;
        let mut rx = state.subscribe();

        let task = IngestTask::spawn(state.clone(), source, vec!["a".into()], IngestPolicy::EvaluateOnly);
        match task.outcome().await.unwrap() {
            IngestOutcome::Completed(report) => assert_eq!(report.evaluated, 2),
            other => panic!("unexpected outcome {other:?}"),
        }

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let toast = last.unwrap().toast.unwrap();
        assert_eq!(toast.kind, ToastKind::Success);
        assert_eq!(toast.message, FINISHED_NOTICE);
    }

    #[tokio::test]
    async fn panicked_worker_still_sends_partial_notice() {
        let state = state_with_evaluator(Duration::ZERO, Arc::new(PanickingEvaluator));
        let source: Arc<dyn ContentSource> =
            started(StaticContentSource::new().with_profile(profile("a", &[1]))).await;
        let mut rx = state.subscribe();

        let task = IngestTask::spawn(state.clone(), source, vec!["a".into()], IngestPolicy::EvaluateOnly);
        assert!(matches!(
            task.outcome().await.unwrap(),
            IngestOutcome::Panicked(_)
        ));

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let toast = last.unwrap().toast.unwrap();
        assert_eq!(toast.kind, ToastKind::Error);
        assert!(toast.message.starts_with("Finished fetching channels (partial)"));
        assert_eq!(state.snapshot().await.posts("id-a").len(), 1);
    }

    #[tokio::test]
    async fn aborted_task_is_cancelled_silently() {
        let state = state(Duration::ZERO);
        let source: Arc<dyn ContentSource> = started(
            StaticContentSource::new()
                .with_profile(profile("a", &[1, 2, 3]))
                .with_post_delay(Duration::from_secs(60)),
        )
        .await;

        let task = IngestTask::spawn(state.clone(), source, vec!["a".into()], IngestPolicy::EvaluateOnly);
        tokio::task::yield_now().await;
        assert_eq!(task.shutdown().await.unwrap(), IngestOutcome::Cancelled);
        assert!(state.snapshot().await.posts("id-a").len() < 3);
    }
}
