use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use creatorpay_provider::{LlmProvider, LlmRequest, ToolDef};
use creatorpay_schema::{Evaluation, Post, PostType, Tier};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::config::{EvaluatorKind, EvaluatorSettings};
use crate::error::{CoreError, CoreResult};
use crate::pricing::{round_money, PricingPolicy};

/// Maps a post to its marketing assessment and suggested price.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, post: &Post) -> CoreResult<Evaluation>;
}

/// The judgement part of an evaluation, before pricing is attached.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Assessment {
    pub product_mentioned: bool,
    pub prominence_of_product: Tier,
    pub target_group_fit: Tier,
    pub post_type: PostType,
    pub estimated_ctr: f64,
    pub evaluation_text: String,
}

impl Assessment {
    pub fn into_evaluation(self, post: &Post, pricing: &PricingPolicy) -> Evaluation {
        let ctr = if self.estimated_ctr.is_finite() {
            self.estimated_ctr.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Evaluation {
            post_id: post.id.clone(),
            product_mentioned: self.product_mentioned,
            prominence_of_product: self.prominence_of_product,
            target_group_fit: self.target_group_fit,
            post_type: self.post_type,
            estimated_ctr: ctr,
            evaluation_text: self.evaluation_text,
            date_evaluated: Utc::now(),
            price_breakdown: pricing.price(
                post.views(),
                self.product_mentioned,
                self.prominence_of_product,
            ),
        }
    }
}

/// Deterministic rules over the post's counters and caption.
pub struct HeuristicEvaluator {
    pricing: PricingPolicy,
    product_keywords: Vec<String>,
}

impl HeuristicEvaluator {
    pub fn new(pricing: PricingPolicy, product_keywords: Vec<String>) -> Self {
        Self {
            pricing,
            product_keywords: product_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn assess(&self, post: &Post) -> Assessment {
        let caption = post.description.to_lowercase();
        let views = post.views();
        let engagement = if views == 0 {
            0.0
        } else {
            post.stats.interactions() as f64 / views as f64
        };

        let product_mentioned = self.product_keywords.iter().any(|k| caption.contains(k));
        let prominence_of_product = match (product_mentioned, engagement >= 0.08) {
            (true, true) => Tier::High,
            (true, false) => Tier::Medium,
            (false, _) => Tier::Low,
        };
        let target_group_fit = if engagement >= 0.1 {
            Tier::High
        } else if engagement >= 0.03 {
            Tier::Medium
        } else {
            Tier::Low
        };
        let post_type = classify_caption(&caption);
        let estimated_ctr = round_money((0.2 + engagement * 20.0).clamp(0.2, 5.0));

        Assessment {
            product_mentioned,
            prominence_of_product,
            target_group_fit,
            post_type,
            estimated_ctr,
            evaluation_text: format!(
                "{views} views at {:.1}% engagement; product {}, {} prominence, {} audience fit.",
                engagement * 100.0,
                if product_mentioned {
                    "mentioned"
                } else {
                    "not mentioned"
                },
                prominence_of_product.as_str(),
                target_group_fit.as_str(),
            ),
        }
    }
}

fn classify_caption(caption: &str) -> PostType {
    const RULES: &[(&[&str], PostType)] = &[
        (&["review", "honest opinion", "rating"], PostType::Review),
        (&["demo", "how to", "tutorial", "unboxing"], PostType::Demo),
        (&["recommend", "must have", "favorite"], PostType::Recommendation),
        (&["#fyp", "trend", "challenge"], PostType::Trend),
    ];
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| caption.contains(n)))
        .map(|(_, kind)| *kind)
        .unwrap_or(PostType::Other)
}

#[async_trait]
impl Evaluator for HeuristicEvaluator {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn evaluate(&self, post: &Post) -> CoreResult<Evaluation> {
        Ok(self.assess(post).into_evaluation(post, &self.pricing))
    }
}

/// Mock generator with plausible random judgements.
pub struct RandomEvaluator {
    pricing: PricingPolicy,
    rng: Mutex<StdRng>,
}

impl RandomEvaluator {
    pub fn new(pricing: PricingPolicy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pricing,
            rng: Mutex::new(rng),
        }
    }

    fn assess(&self) -> CoreResult<Assessment> {
        const TIERS: [Tier; 3] = [Tier::High, Tier::Medium, Tier::Low];
        const TYPES: [PostType; 5] = [
            PostType::Demo,
            PostType::Review,
            PostType::Recommendation,
            PostType::Trend,
            PostType::Other,
        ];
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| CoreError::Evaluation("random evaluator state poisoned".into()))?;
        let product_mentioned = rng.gen_bool(0.7);
        let prominence_of_product = TIERS[rng.gen_range(0..TIERS.len())];
        let target_group_fit = TIERS[rng.gen_range(0..TIERS.len())];
        let post_type = TYPES[rng.gen_range(0..TYPES.len())];
        let estimated_ctr = round_money(rng.gen_range(0.2..=5.0));
        Ok(Assessment {
            product_mentioned,
            prominence_of_product,
            target_group_fit,
            post_type,
            estimated_ctr,
            evaluation_text: "Randomly generated evaluation.".to_string(),
        })
    }
}

#[async_trait]
impl Evaluator for RandomEvaluator {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn evaluate(&self, post: &Post) -> CoreResult<Evaluation> {
        Ok(self.assess()?.into_evaluation(post, &self.pricing))
    }
}

pub const EVALUATION_TOOL: &str = "submit_post_evaluation";

const EVALUATION_SYSTEM_PROMPT: &str = "You review short-form video posts made by creators \
who promote a product. Judge how well each post markets the product and submit your \
assessment with the submit_post_evaluation tool.";

pub fn evaluation_tool() -> ToolDef {
    let tier = serde_json::json!({"type": "string", "enum": ["high", "medium", "low"]});
    ToolDef {
        name: EVALUATION_TOOL.to_string(),
        description: "Submit the marketing evaluation of one post".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "product_mentioned": {"type": "boolean", "description": "Whether the product is mentioned in the post"},
                "prominence_of_product": tier.clone(),
                "target_group_fit": tier,
                "post_type": {
                    "type": "string",
                    "enum": ["demo", "review", "recommendation", "trend", "other"]
                },
                "estimated_ctr": {"type": "number", "description": "Estimated CTR in percent, typically 0.2 to 5"},
                "evaluation_text": {"type": "string"}
            },
            "required": [
                "product_mentioned", "prominence_of_product", "target_group_fit",
                "post_type", "estimated_ctr", "evaluation_text"
            ]
        }),
    }
}

/// Asks the model for a structured assessment.
pub struct LlmEvaluator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    product_brief: String,
    pricing: PricingPolicy,
}

impl LlmEvaluator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        product_brief: impl Into<String>,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            product_brief: product_brief.into(),
            pricing,
        }
    }

    fn prompt(&self, post: &Post) -> String {
        let stats = &post.stats;
        format!(
            "Product brief: {brief}\n\nPost {id} published {date}\nCaption: {caption}\n\
             Views: {views}, likes: {likes}, comments: {comments}, shares: {shares}, saves: {saves}",
            brief = if self.product_brief.is_empty() {
                "(none provided)"
            } else {
                self.product_brief.as_str()
            },
            id = post.id,
            date = post.date_posted.to_rfc3339(),
            caption = post.description,
            views = stats.play_count,
            likes = stats.like_count,
            comments = stats.comment_count,
            shares = stats.share_count,
            saves = stats.collect_count,
        )
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn evaluate(&self, post: &Post) -> CoreResult<Evaluation> {
        let request = LlmRequest::structured(
            self.model.clone(),
            EVALUATION_SYSTEM_PROMPT.to_string(),
            self.prompt(post),
            evaluation_tool(),
        );
        let response = self
            .provider
            .chat(request)
            .await
            .map_err(|e| CoreError::Evaluation(format!("{e:#}")))?;
        let input = response
            .tool_input(EVALUATION_TOOL)
            .map_err(|e| CoreError::Evaluation(e.to_string()))?;
        let assessment: Assessment = serde_json::from_value(input.clone()).map_err(|e| {
            CoreError::Evaluation(format!("malformed evaluation for post {}: {e}", post.id))
        })?;
        Ok(assessment.into_evaluation(post, &self.pricing))
    }
}

pub fn build_evaluator(
    settings: &EvaluatorSettings,
    pricing: PricingPolicy,
    llm: Option<(Arc<dyn LlmProvider>, String)>,
) -> Result<Arc<dyn Evaluator>> {
    let evaluator: Arc<dyn Evaluator> = match settings.kind {
        EvaluatorKind::Heuristic => Arc::new(HeuristicEvaluator::new(
            pricing,
            settings.product_keywords.clone(),
        )),
        EvaluatorKind::Random => Arc::new(RandomEvaluator::new(pricing, settings.seed)),
        EvaluatorKind::Llm => {
            let (provider, model) =
                llm.ok_or_else(|| anyhow!("evaluator type llm needs an llm provider"))?;
            Arc::new(LlmEvaluator::new(
                provider,
                model,
                settings.product_brief.clone(),
                pricing,
            ))
        }
    };
    tracing::info!(evaluator = evaluator.name(), "post evaluator ready");
    Ok(evaluator)
}
