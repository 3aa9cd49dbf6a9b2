use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use creatorpay_core::{
    build_decider, build_evaluator, build_payment_rail, DeciderKind, EvaluatorKind,
    InMemorySessionStore, PayConfig, PayoutTarget, SessionBlueprint, SessionManager, SourceKind,
    SourceSettings, StateDeps,
};
use creatorpay_provider::{create_provider, LlmProvider};
use creatorpay_schema::{Channel, ChannelStats, Post, PostStats};
use creatorpay_source::{ContentSource, FixtureProfile, HttpContentSource, StaticContentSource};

pub const DEMO_FIXTURE: &str = "fixtures/demo.json";

pub fn build_source(root: &Path, settings: &SourceSettings) -> Result<Arc<dyn ContentSource>> {
    let source: Arc<dyn ContentSource> = match settings.kind {
        SourceKind::Http => Arc::new(HttpContentSource::new(settings.http_config())),
        SourceKind::Static => match &settings.fixture_path {
            Some(relative) => {
                let path = root.join(relative);
                Arc::new(
                    StaticContentSource::from_file(&path)
                        .with_context(|| format!("loading fixtures from {}", path.display()))?,
                )
            }
            None => Arc::new(StaticContentSource::new()),
        },
    };
    tracing::info!(kind = ?settings.kind, "content source ready");
    Ok(source)
}

/// Wires every collaborator named in the config into a session manager.
pub fn build_manager(root: &Path, config: &PayConfig) -> Result<SessionManager> {
    let needs_llm =
        config.evaluator.kind == EvaluatorKind::Llm || config.decider == DeciderKind::Llm;
    let llm: Option<(Arc<dyn LlmProvider>, String)> = if needs_llm {
        let provider = create_provider(&config.llm.provider).context("creating llm provider")?;
        Some((provider, config.llm.model.clone()))
    } else {
        None
    };

    let evaluator = build_evaluator(&config.evaluator, config.pricing.clone(), llm.clone())?;
    let rail = build_payment_rail(&config.payment);
    let decider = build_decider(config.decider, llm, rail)?;
    let source = build_source(root, &config.source)?;

    let blueprint = SessionBlueprint {
        deps: StateDeps {
            evaluator,
            decider,
            target: PayoutTarget {
                destination_address: config.payment.destination_address.clone(),
                max_budget: config.payment.max_budget,
            },
        },
        source,
        identities: config.tracked_identities.clone(),
        policy: config.ingest_policy,
        min_push_interval: config.sync.min_push_interval(),
        bus_capacity: config.sync.capacity,
    };
    Ok(SessionManager::new(
        Arc::new(InMemorySessionStore::new()),
        blueprint,
    ))
}

/// Writes a runnable offline config on first start. Returns false when a
/// config already exists.
pub fn ensure_skeleton_config(root: &Path, port: u16) -> Result<bool> {
    let config_dir = root.join("config");
    let main_yaml = config_dir.join("main.yaml");

    if main_yaml.exists() {
        return Ok(false);
    }

    std::fs::create_dir_all(&config_dir)?;
    let fixture = root.join(DEMO_FIXTURE);
    if let Some(parent) = fixture.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&fixture, serde_json::to_string_pretty(&demo_profiles())?)?;

    std::fs::write(
        &main_yaml,
        format!(
            "server:\n  host: 127.0.0.1\n  port: {port}\n\nsource:\n  type: static\n  fixture_path: {DEMO_FIXTURE}\n\ntracked_identities:\n  - glow.daily\n  - kitchen.lab\n\nsync:\n  min_push_interval_ms: 16\n\npricing:\n  base_rate: 1.0\n  penalty_rate: 0.5\n  high_bonus_rate: 0.2\n  medium_bonus_rate: 0.1\n\nevaluator:\n  type: heuristic\n\nllm:\n  provider:\n    type: stub\n  model: claude-sonnet-4-5\n\npayment:\n  type: dry_run\n  destination_address: \"0x0000000000000000000000000000000000000001\"\n  max_budget: 50\n\ndecider: pricing\ningest_policy: evaluate_only\n"
        ),
    )?;

    eprintln!();
    eprintln!("  First run detected. Wrote an offline demo config to {}", main_yaml.display());
    eprintln!();

    Ok(true)
}

fn demo_profiles() -> Vec<FixtureProfile> {
    let now = Utc::now();
    let post = |channel_id: &str,
                id: &str,
                days_ago: i64,
                caption: &str,
                views: u64,
                likes: u64| Post {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        date_posted: now - ChronoDuration::days(days_ago),
        description: caption.to_string(),
        url: None,
        cover_url: None,
        stats: PostStats {
            play_count: views,
            like_count: likes,
            comment_count: likes / 20,
            share_count: likes / 40,
            collect_count: likes / 30,
        },
    };
    let channel = |id: &str, handle: &str, nickname: &str, bio: &str, followers: u64| Channel {
        id: id.to_string(),
        unique_id: handle.to_string(),
        nickname: nickname.to_string(),
        signature: bio.to_string(),
        avatar_url: None,
        stats: ChannelStats {
            follower_count: followers,
            ..ChannelStats::default()
        },
    };

    vec![
        FixtureProfile {
            identity: "glow.daily".into(),
            channel: channel(
                "7001",
                "glow.daily",
                "Glow Daily",
                "skincare for busy mornings",
                48_200,
            ),
            posts: vec![
                post("7001", "7001-1", 1, "Morning routine with the new serum #ad", 12_400, 1_150),
                post("7001", "7001-2", 3, "Three mistakes I made with retinol", 8_900, 420),
                post("7001", "7001-3", 6, "Sponsored: honest review after two weeks", 21_000, 2_600),
            ],
        },
        FixtureProfile {
            identity: "kitchen.lab".into(),
            channel: channel("7002", "kitchen.lab", "Kitchen Lab", "one pan, five minutes", 9_800),
            posts: vec![
                post("7002", "7002-1", 2, "Blender smoothie bowl, partner post", 3_300, 140),
                post("7002", "7002-2", 4, "Why my pasta never sticks", 5_100, 610),
            ],
        },
    ]
}
