//! Boundary to the external content platform.
//!
//! A [`ContentSource`] hands out channel profiles and a lazy, finite stream of a
//! channel's posts. Implementations hold one shared client per process and are
//! driven strictly one identity at a time.

pub mod fixture;
pub mod http;

use std::pin::Pin;

use async_trait::async_trait;
use creatorpay_schema::{Channel, Post};
use futures_core::Stream;

pub use fixture::{FixtureProfile, StaticContentSource};
pub use http::{HttpContentSource, HttpSourceConfig};

/// Ordered posts of one channel. The first error ends the stream.
pub type PostStream<'a> = Pin<Box<dyn Stream<Item = Result<Post, SourceError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("content source not started")]
    NotStarted,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// One-time setup before any fetch (e.g. opening a platform session).
    async fn start(&self) -> Result<(), SourceError>;

    async fn stop(&self) -> Result<(), SourceError>;

    async fn fetch_channel(&self, identity: &str) -> Result<Channel, SourceError>;

    fn fetch_posts<'a>(&'a self, identity: &'a str) -> PostStream<'a>;
}
