use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use creatorpay_schema::{Channel, Post};
use serde::{Deserialize, Serialize};

use crate::{ContentSource, PostStream, SourceError};

/// One channel with the posts the source reports for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureProfile {
    pub identity: String,
    pub channel: Channel,
    #[serde(default)]
    pub posts: Vec<Post>,
}

/// In-memory content source backed by fixed profiles.
///
/// Used for offline runs (`source.type: static`) and throughout the tests.
#[derive(Default)]
pub struct StaticContentSource {
    profiles: HashMap<String, FixtureProfile>,
    post_delay: Option<Duration>,
    failures: HashMap<String, usize>,
    fail_start: bool,
    started: AtomicBool,
    start_calls: AtomicUsize,
}

impl StaticContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: FixtureProfile) -> Self {
        self.profiles.insert(profile.identity.clone(), profile);
        self
    }

    /// Sleep before each post is yielded.
    pub fn with_post_delay(mut self, delay: Duration) -> Self {
        self.post_delay = Some(delay);
        self
    }

    /// Fail the post stream of `identity` after `after` posts were yielded.
    pub fn with_post_failure(mut self, identity: impl Into<String>, after: usize) -> Self {
        self.failures.insert(identity.into(), after);
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Loads a JSON array of profiles.
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SourceError::Transport(format!("reading fixture {}: {e}", path.display()))
        })?;
        let profiles: Vec<FixtureProfile> = serde_json::from_str(&content)
            .map_err(|e| SourceError::Decode(format!("fixture {}: {e}", path.display())))?;
        Ok(profiles
            .into_iter()
            .fold(Self::new(), |source, profile| source.with_profile(profile)))
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn injected_failure(&self, identity: &str, index: usize) -> Result<(), SourceError> {
        match self.failures.get(identity) {
            Some(&after) if after == index => Err(SourceError::Transport(format!(
                "stream for {identity} dropped after {index} posts"
            ))),
            _ => Ok(()),
        }
    }

    fn profile(&self, identity: &str) -> Result<&FixtureProfile, SourceError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(SourceError::NotStarted);
        }
        self.profiles
            .get(identity)
            .ok_or_else(|| SourceError::UnknownIdentity(identity.to_string()))
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn start(&self) -> Result<(), SourceError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(SourceError::Transport("fixture start refused".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_channel(&self, identity: &str) -> Result<Channel, SourceError> {
        Ok(self.profile(identity)?.channel.clone())
    }

    fn fetch_posts<'a>(&'a self, identity: &'a str) -> PostStream<'a> {
        let delay = self.post_delay;
        Box::pin(async_stream::try_stream! {
            let profile = self.profile(identity)?;
            for (index, post) in profile.posts.iter().enumerate() {
                self.injected_failure(identity, index)?;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield post.clone();
            }
        })
    }
}
