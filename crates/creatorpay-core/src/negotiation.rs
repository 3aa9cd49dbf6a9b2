use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use creatorpay_provider::{LlmProvider, LlmRequest, ToolDef};
use creatorpay_schema::{Channel, ChatMessage, ChatRole, Evaluation, Payout, PayoutNegotiation, Post};
use serde::{Deserialize, Serialize};

use crate::config::DeciderKind;
use crate::error::{CoreError, CoreResult};
use crate::payment::{PaymentRail, PaymentRequest};

/// Everything the decider sees for one payout attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutBriefing {
    pub channel: Channel,
    pub post: Post,
    pub evaluation: Evaluation,
    pub transcript: PayoutNegotiation,
    pub destination_address: String,
    pub max_budget: f64,
}

impl PayoutBriefing {
    pub fn render(&self) -> String {
        let stats = &self.post.stats;
        let suggested = &self.evaluation.price_breakdown;
        let mut out = format!(
            "Creator: {} (@{}), {} followers\n\
             Post {}: \"{}\"\n\
             Views {}, likes {}, comments {}, shares {}, saves {}\n\
             Evaluation: product mentioned: {}, prominence {}, audience fit {}, type {:?}, est. CTR {:.2}%\n\
             Notes: {}\n\
             Suggested pricing: {:.2} USDC per 1k views, base {:.2}, penalty {:.2}, bonus {:.2}, final {:.2}\n\
             Destination: {}\nBudget cap: {:.2} USDC\n",
            self.channel.nickname,
            self.channel.unique_id,
            self.channel.stats.follower_count,
            self.post.id,
            self.post.description,
            stats.play_count,
            stats.like_count,
            stats.comment_count,
            stats.share_count,
            stats.collect_count,
            self.evaluation.product_mentioned,
            self.evaluation.prominence_of_product.as_str(),
            self.evaluation.target_group_fit.as_str(),
            self.evaluation.post_type,
            self.evaluation.estimated_ctr,
            self.evaluation.evaluation_text,
            suggested.price_per_1k,
            suggested.base_payout,
            suggested.penalty,
            suggested.bonus,
            suggested.final_payout,
            self.destination_address,
            self.max_budget,
        );
        if !self.transcript.is_empty() {
            out.push_str("\nConversation so far:\n");
            for message in &self.transcript.chat_history {
                let who = match message.role {
                    ChatRole::Agent => "agent",
                    ChatRole::Creator => "creator",
                };
                out.push_str(&format!("[{who}] {}\n", message.content));
            }
        }
        out
    }
}

/// Amounts decided for a payout plus the message sent to the creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutDecision {
    pub price_per_1k: f64,
    pub base_payout: f64,
    pub penalty: f64,
    #[serde(default)]
    pub penalty_reason: Option<String>,
    pub bonus: f64,
    #[serde(default)]
    pub bonus_reason: Option<String>,
    pub final_payout: f64,
    pub message: String,
    pub destination_address: String,
    #[serde(default)]
    pub payment_id: Option<String>,
}

impl PayoutDecision {
    pub fn validate(&self) -> CoreResult<()> {
        let amounts = [
            ("price_per_1k", self.price_per_1k),
            ("base_payout", self.base_payout),
            ("penalty", self.penalty),
            ("bonus", self.bonus),
            ("final_payout", self.final_payout),
        ];
        for (name, value) in amounts {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Decision(format!(
                    "{name} must be a non-negative amount, got {value}"
                )));
            }
        }
        if self.message.trim().is_empty() {
            return Err(CoreError::Decision("decision carries no message".into()));
        }
        Ok(())
    }
}

/// Decides the amounts, executes the payment and drafts the creator message.
#[async_trait]
pub trait PayoutDecider: Send + Sync {
    async fn decide(&self, briefing: &PayoutBriefing) -> CoreResult<PayoutDecision>;
}

pub const DECISION_TOOL: &str = "submit_payout_decision";

const DECIDER_SYSTEM_PROMPT: &str = "You are the payout agent of a creator marketing program. \
Given a post, its evaluation and the suggested pricing, decide what the creator is paid. \
Penalty and bonus are non-negative deductions and additions; final_payout must equal \
base_payout - penalty + bonus and must not exceed the budget cap. Write a short friendly \
message to the creator explaining the payout, restate the destination address, and submit \
everything with the submit_payout_decision tool.";

pub fn decision_tool() -> ToolDef {
    let amount = serde_json::json!({"type": "number", "minimum": 0});
    ToolDef {
        name: DECISION_TOOL.to_string(),
        description: "Submit the payout decision for one post".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "price_per_1k": amount.clone(),
                "base_payout": amount.clone(),
                "penalty": amount.clone(),
                "penalty_reason": {"type": "string"},
                "bonus": amount.clone(),
                "bonus_reason": {"type": "string"},
                "final_payout": amount,
                "message": {"type": "string", "description": "Message to the creator"},
                "destination_address": {"type": "string"}
            },
            "required": [
                "price_per_1k", "base_payout", "penalty", "bonus",
                "final_payout", "message", "destination_address"
            ]
        }),
    }
}

/// Model-driven decider that pays through a [`PaymentRail`] once the decision
/// validates.
pub struct LlmPayoutDecider {
    provider: Arc<dyn LlmProvider>,
    model: String,
    rail: Arc<dyn PaymentRail>,
}

impl LlmPayoutDecider {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        rail: Arc<dyn PaymentRail>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            rail,
        }
    }
}

#[async_trait]
impl PayoutDecider for LlmPayoutDecider {
    async fn decide(&self, briefing: &PayoutBriefing) -> CoreResult<PayoutDecision> {
        let request = LlmRequest::structured(
            self.model.clone(),
            DECIDER_SYSTEM_PROMPT.to_string(),
            briefing.render(),
            decision_tool(),
        );
        let response = self
            .provider
            .chat(request)
            .await
            .map_err(|e| CoreError::Decision(format!("{e:#}")))?;
        let input = response
            .tool_input(DECISION_TOOL)
            .map_err(|e| CoreError::Decision(e.to_string()))?;
        let mut decision: PayoutDecision = serde_json::from_value(input.clone())
            .map_err(|e| CoreError::Decision(format!("malformed decision: {e}")))?;
        decision.validate()?;
        if decision.destination_address != briefing.destination_address {
            return Err(CoreError::Decision(format!(
                "decision names destination {} instead of {}",
                decision.destination_address, briefing.destination_address
            )));
        }

        let receipt = self
            .rail
            .pay(&PaymentRequest::usdc(
                &briefing.destination_address,
                decision.final_payout,
                format!("payout for post {}", briefing.post.id),
            ))
            .await
            .map_err(|e| CoreError::Decision(format!("payment failed: {e:#}")))?;
        decision.payment_id = Some(receipt.payment_id);
        Ok(decision)
    }
}

/// Pays the suggested price from the evaluation without consulting a model.
pub struct PricingPayoutDecider {
    rail: Arc<dyn PaymentRail>,
}

impl PricingPayoutDecider {
    pub fn new(rail: Arc<dyn PaymentRail>) -> Self {
        Self { rail }
    }
}

#[async_trait]
impl PayoutDecider for PricingPayoutDecider {
    async fn decide(&self, briefing: &PayoutBriefing) -> CoreResult<PayoutDecision> {
        let evaluation = &briefing.evaluation;
        let suggested = &evaluation.price_breakdown;
        let penalty_reason = (suggested.penalty > 0.0).then(|| "product not mentioned".to_string());
        let bonus_reason = (suggested.bonus > 0.0).then(|| {
            format!(
                "{} product prominence",
                evaluation.prominence_of_product.as_str()
            )
        });
        let mut decision = PayoutDecision {
            price_per_1k: suggested.price_per_1k,
            base_payout: suggested.base_payout,
            penalty: suggested.penalty,
            penalty_reason,
            bonus: suggested.bonus,
            bonus_reason,
            final_payout: suggested.final_payout,
            message: format!(
                "Thanks {}! Post {} earned {:.2} USDC for {} views at {:.2} USDC per 1k, sent to {}.",
                briefing.channel.nickname,
                briefing.post.id,
                suggested.final_payout,
                suggested.number_of_views,
                suggested.price_per_1k,
                briefing.destination_address
            ),
            destination_address: briefing.destination_address.clone(),
            payment_id: None,
        };
        decision.validate()?;

        let receipt = self
            .rail
            .pay(&PaymentRequest::usdc(
                &briefing.destination_address,
                decision.final_payout,
                format!("payout for post {}", briefing.post.id),
            ))
            .await
            .map_err(|e| CoreError::Decision(format!("payment failed: {e:#}")))?;
        decision.payment_id = Some(receipt.payment_id);
        Ok(decision)
    }
}

pub fn build_decider(
    kind: DeciderKind,
    llm: Option<(Arc<dyn LlmProvider>, String)>,
    rail: Arc<dyn PaymentRail>,
) -> anyhow::Result<Arc<dyn PayoutDecider>> {
    let decider: Arc<dyn PayoutDecider> = match kind {
        DeciderKind::Pricing => Arc::new(PricingPayoutDecider::new(rail)),
        DeciderKind::Llm => {
            let (provider, model) =
                llm.ok_or_else(|| anyhow::anyhow!("decider type llm needs an llm provider"))?;
            Arc::new(LlmPayoutDecider::new(provider, model, rail))
        }
    };
    tracing::info!(decider = ?kind, "payout decider ready");
    Ok(decider)
}

/// The creator's opening message for a post that has no conversation yet.
pub fn opening_transcript(channel: &Channel, post: &Post) -> PayoutNegotiation {
    let mut transcript = PayoutNegotiation::new();
    transcript.push(ChatMessage::creator(format!(
        "Hi, this is {}. My post {} reached {} views, could you look at the payout?",
        channel.nickname,
        post.id,
        post.views()
    )));
    transcript
}

/// One decision, payment and notification cycle for a post.
pub struct NegotiationSession {
    decider: Arc<dyn PayoutDecider>,
}

impl NegotiationSession {
    pub fn new(decider: Arc<dyn PayoutDecider>) -> Self {
        Self { decider }
    }

    /// Returns the payout together with the transcript extended by the agent's
    /// message. Nothing is returned on failure, so the caller has nothing to commit.
    pub async fn negotiate_and_pay(
        &self,
        channel: &Channel,
        post: &Post,
        evaluation: &Evaluation,
        transcript: PayoutNegotiation,
        destination_address: &str,
        max_budget: f64,
    ) -> CoreResult<(Payout, PayoutNegotiation)> {
        if destination_address.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "destination address must not be empty".into(),
            ));
        }
        if !(max_budget.is_finite() && max_budget > 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "max budget must be positive, got {max_budget}"
            )));
        }

        let briefing = PayoutBriefing {
            channel: channel.clone(),
            post: post.clone(),
            evaluation: evaluation.clone(),
            transcript,
            destination_address: destination_address.to_string(),
            max_budget,
        };
        let decision = self.decider.decide(&briefing).await?;

        // Amounts are trusted as decided; the cap is advisory.
        if decision.final_payout > max_budget {
            tracing::warn!(
                post_id = %post.id,
                final_payout = decision.final_payout,
                max_budget,
                "payout exceeds budget cap"
            );
        }

        let mut transcript = briefing.transcript;
        transcript.push(ChatMessage::agent(decision.message.clone()));

        let payout = Payout {
            chat_between_agent_and_creator: transcript.clone(),
            number_of_views: post.views(),
            determined_price_per_1k: decision.price_per_1k,
            determined_base_payout: decision.base_payout,
            determined_penalty: decision.penalty,
            penalty_reason: decision.penalty_reason,
            determined_bonus: decision.bonus,
            bonus_reason: decision.bonus_reason,
            determined_final_payout: decision.final_payout,
            date_paid: Utc::now(),
        };
        tracing::info!(
            post_id = %post.id,
            final_payout = payout.determined_final_payout,
            payment_id = decision.payment_id.as_deref().unwrap_or("-"),
            "post paid"
        );
        Ok((payout, transcript))
    }
}
