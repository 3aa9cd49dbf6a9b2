use std::{collections::HashSet, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use creatorpay_provider::{ProviderConfig, ProviderType};
use creatorpay_source::HttpSourceConfig;
use serde::{Deserialize, Serialize};

use crate::ingest::IngestPolicy;
use crate::pricing::PricingPolicy;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Http,
    #[default]
    Static,
}

fn default_page_size() -> u32 {
    30
}

fn default_max_posts() -> usize {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default, rename = "type")]
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
    /// JSON fixture file for `type: static`, relative to the config root
    #[serde(default)]
    pub fixture_path: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            base_url: String::new(),
            token: None,
            page_size: default_page_size(),
            max_posts: default_max_posts(),
            fixture_path: None,
        }
    }
}

impl SourceSettings {
    pub fn http_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            page_size: self.page_size,
            max_posts: self.max_posts,
        }
    }
}

fn default_min_push_interval_ms() -> u64 {
    16
}

fn default_bus_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum spacing of throttled pushes during ingestion
    #[serde(default = "default_min_push_interval_ms")]
    pub min_push_interval_ms: u64,
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_push_interval_ms: default_min_push_interval_ms(),
            capacity: default_bus_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn min_push_interval(&self) -> Duration {
        Duration::from_millis(self.min_push_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    #[default]
    Heuristic,
    Random,
    Llm,
}

fn default_product_keywords() -> Vec<String> {
    vec!["#ad".into(), "sponsored".into(), "partner".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    #[serde(default, rename = "type")]
    pub kind: EvaluatorKind,
    /// Seed for `type: random`; unseeded when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Case-insensitive terms that count as a product mention
    #[serde(default = "default_product_keywords")]
    pub product_keywords: Vec<String>,
    /// Product and audience description handed to the model
    #[serde(default)]
    pub product_brief: String,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            kind: EvaluatorKind::default(),
            seed: None,
            product_keywords: default_product_keywords(),
            product_brief: String::new(),
        }
    }
}

fn default_provider() -> ProviderConfig {
    ProviderConfig::new(ProviderType::Stub)
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub provider: ProviderConfig,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Http,
    #[default]
    DryRun,
}

/// Who settles the amounts of a payout.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeciderKind {
    /// Model-driven decision through the `llm` provider
    #[default]
    Llm,
    /// Pays the suggested price of the evaluation as is
    Pricing,
}

fn default_max_budget() -> f64 {
    50.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default, rename = "type")]
    pub kind: PaymentKind,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Wallet that receives every payout
    #[serde(default)]
    pub destination_address: String,
    /// Upper bound per payout, in USDC
    #[serde(default = "default_max_budget")]
    pub max_budget: f64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            kind: PaymentKind::default(),
            base_url: String::new(),
            api_key: String::new(),
            destination_address: String::new(),
            max_budget: default_max_budget(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceSettings,
    /// Channel handles ingested, in order, for every new session
    #[serde(default)]
    pub tracked_identities: Vec<String>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub pricing: PricingPolicy,
    #[serde(default)]
    pub evaluator: EvaluatorSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub payment: PaymentSettings,
    #[serde(default)]
    pub decider: DeciderKind,
    #[serde(default)]
    pub ingest_policy: IngestPolicy,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

fn resolve_in_place(value: &mut String) {
    *value = resolve_env_var(value);
}

fn resolve_optional(value: &mut Option<String>) {
    if let Some(inner) = value.as_mut() {
        resolve_in_place(inner);
    }
}

fn resolve_config_env(config: &mut PayConfig) {
    resolve_in_place(&mut config.source.base_url);
    resolve_optional(&mut config.source.token);
    resolve_optional(&mut config.llm.provider.api_key);
    resolve_optional(&mut config.llm.provider.base_url);
    resolve_in_place(&mut config.payment.base_url);
    resolve_in_place(&mut config.payment.api_key);
    resolve_in_place(&mut config.payment.destination_address);
    for identity in &mut config.tracked_identities {
        resolve_in_place(identity);
    }
}

/// Loads `main.yaml` from `config_dir`, resolves `${VAR}` placeholders and
/// validates the result.
pub fn load_config(config_dir: &Path) -> Result<PayConfig> {
    let path = config_dir.join("main.yaml");
    let content =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let mut config: PayConfig =
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &PayConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for identity in &config.tracked_identities {
        if identity.trim().is_empty() {
            return Err(anyhow!("tracked_identities contains an empty entry"));
        }
        if !seen.insert(identity.as_str()) {
            return Err(anyhow!("duplicate tracked identity: {identity}"));
        }
    }

    match config.source.kind {
        SourceKind::Http if config.source.base_url.is_empty() => {
            return Err(anyhow!("source.base_url is required for type: http"));
        }
        SourceKind::Static if config.source.fixture_path.is_none() => {
            tracing::warn!("static source without fixture_path, sessions will find no channels");
        }
        _ => {}
    }

    config.pricing.validate()?;

    if !(config.payment.max_budget.is_finite() && config.payment.max_budget > 0.0) {
        return Err(anyhow!(
            "payment.max_budget must be positive, got {}",
            config.payment.max_budget
        ));
    }
    if config.payment.kind == PaymentKind::Http && config.payment.base_url.is_empty() {
        return Err(anyhow!("payment.base_url is required for type: http"));
    }
    if config.payment.destination_address.trim().is_empty() {
        tracing::warn!("payment.destination_address is empty, pay actions will be rejected");
    }

    if config.llm.provider.provider_type == ProviderType::Stub {
        if config.decider == DeciderKind::Llm {
            tracing::warn!("decider type llm with the stub provider, every payout will be rejected");
        }
        if config.evaluator.kind == EvaluatorKind::Llm {
            tracing::warn!("evaluator type llm with the stub provider, every evaluation will fail");
        }
    }

    if config.sync.capacity == 0 {
        return Err(anyhow!("sync.capacity must be at least 1"));
    }

    Ok(())
}
