pub mod wire;

pub use wire::*;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key under which the session state tree is published to viewers.
pub const BACKEND_STATE_KEY: &str = "BackendState";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelStats {
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub heart_count: u64,
    #[serde(default)]
    pub video_count: u64,
}

/// A tracked creator profile. Replaced wholesale on re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    /// Handle, e.g. `tenminai.korean`
    pub unique_id: String,
    /// Display name
    pub nickname: String,
    /// Bio text
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub stats: ChannelStats,
}

/// Engagement counters captured when the post was fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostStats {
    #[serde(default)]
    pub play_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub share_count: u64,
    #[serde(default)]
    pub collect_count: u64,
}

impl PostStats {
    /// Likes, comments, shares and saves; saturates at `u64::MAX`.
    pub fn interactions(&self) -> u64 {
        self.like_count
            .saturating_add(self.comment_count)
            .saturating_add(self.share_count)
            .saturating_add(self.collect_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    pub date_posted: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub stats: PostStats,
}

impl Post {
    pub fn views(&self) -> u64 {
        self.stats.play_count
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Demo,
    Review,
    #[serde(alias = "product recommendation")]
    Recommendation,
    Trend,
    Other,
}

/// Suggested payout computed from the pricing policy at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBreakdown {
    pub number_of_views: u64,
    pub price_per_1k: f64,
    pub penalty_rate: f64,
    pub bonus_rate: f64,
    pub base_payout: f64,
    pub penalty: f64,
    pub bonus: f64,
    pub final_payout: f64,
}

/// Derived assessment of a post's marketing value. One per post id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub post_id: String,
    pub product_mentioned: bool,
    pub prominence_of_product: Tier,
    pub target_group_fit: Tier,
    pub post_type: PostType,
    /// Estimated click-through rate in percent, typically 0.2 to 5.0
    pub estimated_ctr: f64,
    pub evaluation_text: String,
    pub date_evaluated: DateTime<Utc>,
    pub price_breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    #[serde(alias = "payout_agent")]
    Agent,
    Creator,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Agent,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn creator(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Creator,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation between the payout agent and a creator, scoped to one post.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PayoutNegotiation {
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

impl PayoutNegotiation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.chat_history.push(message);
    }

    pub fn len(&self) -> usize {
        self.chat_history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chat_history.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.chat_history.last()
    }
}

/// One executed payment for a post. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    /// Frozen copy of the negotiation at the time of payment
    pub chat_between_agent_and_creator: PayoutNegotiation,
    pub number_of_views: u64,
    pub determined_price_per_1k: f64,
    pub determined_base_payout: f64,
    /// Deduction in USDC, always non-negative
    pub determined_penalty: f64,
    #[serde(default)]
    pub penalty_reason: Option<String>,
    /// Addition in USDC, always non-negative
    pub determined_bonus: f64,
    #[serde(default)]
    pub bonus_reason: Option<String>,
    pub determined_final_payout: f64,
    pub date_paid: DateTime<Utc>,
}

/// Aggregate root synchronized to the viewer.
///
/// Top-level keys go over the wire in camelCase, nested records keep their
/// snake_case field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendState {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub posts_by_channel_id: BTreeMap<String, Vec<Post>>,
    #[serde(default)]
    pub post_evaluations: BTreeMap<String, Evaluation>,
    #[serde(default)]
    pub post_payouts: BTreeMap<String, Vec<Payout>>,
    #[serde(default)]
    pub negotiations: BTreeMap<String, PayoutNegotiation>,
}

impl BackendState {
    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    pub fn posts(&self, channel_id: &str) -> &[Post] {
        self.posts_by_channel_id
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn post(&self, channel_id: &str, post_id: &str) -> Option<&Post> {
        self.posts(channel_id).iter().find(|p| p.id == post_id)
    }

    pub fn evaluation(&self, post_id: &str) -> Option<&Evaluation> {
        self.post_evaluations.get(post_id)
    }

    pub fn payouts(&self, post_id: &str) -> &[Payout] {
        self.post_payouts
            .get(post_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn negotiation(&self, post_id: &str) -> Option<&PayoutNegotiation> {
        self.negotiations.get(post_id)
    }

    pub fn post_count(&self) -> usize {
        self.posts_by_channel_id.values().map(Vec::len).sum()
    }

    pub fn payout_count(&self) -> usize {
        self.post_payouts.values().map(Vec::len).sum()
    }

    /// Appends without checking for an existing channel with the same id.
    pub fn push_channel(&mut self, channel: Channel) {
        self.channels.push(channel);
    }

    /// Replaces the first channel with the same id in place, or appends.
    /// Returns true when an existing entry was replaced.
    pub fn upsert_channel(&mut self, channel: Channel) -> bool {
        match self.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => {
                *existing = channel;
                true
            }
            None => {
                self.channels.push(channel);
                false
            }
        }
    }

    /// Files the post under its own `channel_id`; a post with the same id in that
    /// list is replaced in place, keeping fetch order.
    pub fn upsert_post(&mut self, post: Post) {
        let posts = self
            .posts_by_channel_id
            .entry(post.channel_id.clone())
            .or_default();
        match posts.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => *existing = post,
            None => posts.push(post),
        }
    }

    pub fn upsert_evaluation(&mut self, evaluation: Evaluation) -> Option<Evaluation> {
        self.post_evaluations
            .insert(evaluation.post_id.clone(), evaluation)
    }

    /// Returns the number of payouts recorded for the post after the append.
    pub fn append_payout(&mut self, post_id: &str, payout: Payout) -> usize {
        let payouts = self.post_payouts.entry(post_id.to_string()).or_default();
        payouts.push(payout);
        payouts.len()
    }

    pub fn negotiation_or_insert_with(
        &mut self,
        post_id: &str,
        seed: impl FnOnce() -> PayoutNegotiation,
    ) -> &mut PayoutNegotiation {
        self.negotiations
            .entry(post_id.to_string())
            .or_insert_with(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactions_saturate_instead_of_overflowing() {
        let stats = PostStats {
            like_count: u64::MAX,
            comment_count: 1,
            share_count: 7,
            ..PostStats::default()
        };
        assert_eq!(stats.interactions(), u64::MAX);
    }

    fn channel(id: &str) -> Channel {
        Channel {
            id: id.to_string(),
            unique_id: format!("{id}.handle"),
            nickname: format!("Creator {id}"),
            signature: String::new(),
            avatar_url: None,
            stats: ChannelStats::default(),
        }
    }

    fn post(id: &str, channel_id: &str, views: u64) -> Post {
        Post {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            date_posted: Utc::now(),
            description: "unboxing".to_string(),
            url: None,
            cover_url: None,
            stats: PostStats {
                play_count: views,
                ..PostStats::default()
            },
        }
    }

    fn payout(views: u64, final_payout: f64) -> Payout {
        Payout {
            chat_between_agent_and_creator: PayoutNegotiation::new(),
            number_of_views: views,
            determined_price_per_1k: 1.0,
            determined_base_payout: final_payout,
            determined_penalty: 0.0,
            penalty_reason: None,
            determined_bonus: 0.0,
            bonus_reason: None,
            determined_final_payout: final_payout,
            date_paid: Utc::now(),
        }
    }

    #[test]
    fn upsert_post_files_under_own_channel() {
        let mut state = BackendState::default();
        state.upsert_post(post("p1", "a", 10));
        state.upsert_post(post("p2", "b", 20));
        state.upsert_post(post("p3", "a", 30));

        let ids: Vec<_> = state.posts("a").iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert!(state
            .posts_by_channel_id
            .iter()
            .all(|(c, posts)| posts.iter().all(|p| &p.channel_id == c)));
    }

    #[test]
    fn upsert_post_replaces_same_id_in_place() {
        let mut state = BackendState::default();
        state.upsert_post(post("p1", "a", 10));
        state.upsert_post(post("p2", "a", 20));
        state.upsert_post(post("p1", "a", 99));

        let posts = state.posts("a");
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "p1");
        assert_eq!(posts[0].views(), 99);
    }

    #[test]
    fn push_channel_keeps_duplicates() {
        let mut state = BackendState::default();
        state.push_channel(channel("a"));
        state.push_channel(channel("a"));
        assert_eq!(state.channels.len(), 2);
    }

    #[test]
    fn upsert_channel_replaces_wholesale() {
        let mut state = BackendState::default();
        state.upsert_channel(channel("a"));
        let mut refreshed = channel("a");
        refreshed.nickname = "Renamed".to_string();
        assert!(state.upsert_channel(refreshed));
        assert_eq!(state.channels.len(), 1);
        assert_eq!(state.channel("a").unwrap().nickname, "Renamed");
    }

    #[test]
    fn append_payout_preserves_order() {
        let mut state = BackendState::default();
        assert_eq!(state.append_payout("p1", payout(10, 1.0)), 1);
        assert_eq!(state.append_payout("p1", payout(10, 2.0)), 2);
        let finals: Vec<_> = state
            .payouts("p1")
            .iter()
            .map(|p| p.determined_final_payout)
            .collect();
        assert_eq!(finals, vec![1.0, 2.0]);
        assert!(state.payouts("missing").is_empty());
        assert_eq!(state.payout_count(), 2);
    }

    #[test]
    fn backend_state_top_level_keys_are_camel_case() {
        let mut state = BackendState::default();
        state.push_channel(channel("a"));
        state.upsert_post(post("p1", "a", 10));

        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("postsByChannelId").is_some());
        assert!(value.get("postEvaluations").is_some());
        assert!(value.get("postPayouts").is_some());
        let first_post = &value["postsByChannelId"]["a"][0];
        assert_eq!(first_post["channel_id"], "a");
        assert_eq!(first_post["stats"]["play_count"], 10);
    }

    #[test]
    fn chat_role_accepts_legacy_agent_name() {
        let role: ChatRole = serde_json::from_str("\"payout_agent\"").unwrap();
        assert_eq!(role, ChatRole::Agent);
        assert_eq!(serde_json::to_string(&ChatRole::Agent).unwrap(), "\"agent\"");
    }

    #[test]
    fn post_type_accepts_long_recommendation_name() {
        let kind: PostType = serde_json::from_str("\"product recommendation\"").unwrap();
        assert_eq!(kind, PostType::Recommendation);
    }

    #[test]
    fn channel_deserializes_with_missing_optional_fields() {
        let raw = serde_json::json!({
            "id": "123",
            "unique_id": "creator",
            "nickname": "Creator"
        });
        let parsed: Channel = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.stats, ChannelStats::default());
        assert!(parsed.avatar_url.is_none());
    }
}
