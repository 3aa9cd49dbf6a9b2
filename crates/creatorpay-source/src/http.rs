use async_trait::async_trait;
use chrono::{DateTime, Utc};
use creatorpay_schema::{Channel, ChannelStats, Post, PostStats};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{ContentSource, PostStream, SourceError};

fn default_page_size() -> u32 {
    30
}

fn default_max_posts() -> usize {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    pub base_url: String,
    /// Platform session token handed to the gateway when a session is opened
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on posts fetched per channel
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
}

impl HttpSourceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            page_size: default_page_size(),
            max_posts: default_max_posts(),
        }
    }
}

/// Pages needed to reach `max_posts`, plus one for a short page.
fn max_pages(max_posts: usize, page_size: u32) -> usize {
    max_posts / (page_size.max(1) as usize) + 1
}

/// Client for a platform-API gateway that fronts the content platform.
///
/// `start` opens one gateway session that every later request reuses; the
/// gateway session is not safe for parallel use, callers fetch sequentially.
pub struct HttpContentSource {
    client: reqwest::Client,
    base_url: String,
    config: HttpSourceConfig,
    session_id: RwLock<Option<String>>,
}

impl HttpContentSource {
    pub fn new(config: HttpSourceConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            session_id: RwLock::new(None),
        }
    }

    async fn session(&self) -> Result<String, SourceError> {
        self.session_id
            .read()
            .await
            .clone()
            .ok_or(SourceError::NotStarted)
    }

    fn user_url(&self, identity: &str) -> String {
        format!("{}/users/{}", self.base_url, urlencoding::encode(identity))
    }

    async fn fetch_page(
        &self,
        identity: &str,
        cursor: &str,
    ) -> Result<ApiVideoPage, SourceError> {
        let session = self.session().await?;
        let resp = self
            .client
            .get(format!("{}/videos", self.user_url(identity)))
            .header("x-session-id", session)
            .query(&[
                ("count", self.config.page_size.to_string()),
                ("cursor", cursor.to_string()),
            ])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(SourceError::UnknownIdentity(identity.to_string())),
            status => Err(SourceError::Transport(format!(
                "video page for {identity} returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn start(&self) -> Result<(), SourceError> {
        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&serde_json::json!({ "token": self.config.token }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Transport(format!(
                "opening gateway session returned {}",
                resp.status()
            )));
        }
        let opened: ApiSession = resp.json().await?;
        tracing::info!(session_id = %opened.session_id, "content source session opened");
        *self.session_id.write().await = Some(opened.session_id);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        let Some(session) = self.session_id.write().await.take() else {
            return Ok(());
        };
        let resp = self
            .client
            .delete(format!("{}/sessions/{}", self.base_url, session))
            .send()
            .await?;
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "closing gateway session failed");
        }
        Ok(())
    }

    async fn fetch_channel(&self, identity: &str) -> Result<Channel, SourceError> {
        let session = self.session().await?;
        let resp = self
            .client
            .get(self.user_url(identity))
            .header("x-session-id", session)
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => {
                let user: ApiUser = resp.json().await?;
                Ok(user.into_channel())
            }
            StatusCode::NOT_FOUND => Err(SourceError::UnknownIdentity(identity.to_string())),
            status => Err(SourceError::Transport(format!(
                "profile for {identity} returned {status}"
            ))),
        }
    }

    fn fetch_posts<'a>(&'a self, identity: &'a str) -> PostStream<'a> {
        let max_posts = self.config.max_posts;
        let max_pages = max_pages(max_posts, self.config.page_size);
        Box::pin(async_stream::try_stream! {
            let mut cursor = "0".to_string();
            let mut yielded = 0usize;
            let mut pages = 0usize;
            'pages: loop {
                let page = self.fetch_page(identity, &cursor).await?;
                pages += 1;
                if page.videos.is_empty() {
                    break;
                }
                for video in page.videos {
                    if yielded >= max_posts {
                        break 'pages;
                    }
                    yielded += 1;
                    yield video.into_post()?;
                }
                match page.cursor {
                    Some(next)
                        if page.has_more
                            && yielded < max_posts
                            && pages < max_pages
                            && next != cursor =>
                    {
                        cursor = next
                    }
                    _ => break,
                }
            }
            if pages >= max_pages && yielded < max_posts {
                tracing::warn!(identity, pages, yielded, "stopped paging at the page cap");
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiSession {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    unique_id: String,
    nickname: String,
    #[serde(default)]
    signature: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    stats: ApiUserStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUserStats {
    #[serde(default)]
    follower_count: u64,
    #[serde(default)]
    following_count: u64,
    #[serde(default)]
    heart_count: u64,
    #[serde(default)]
    video_count: u64,
}

impl ApiUser {
    fn into_channel(self) -> Channel {
        Channel {
            id: self.id,
            unique_id: self.unique_id,
            nickname: self.nickname,
            signature: self.signature,
            avatar_url: self.avatar_url,
            stats: ChannelStats {
                follower_count: self.stats.follower_count,
                following_count: self.stats.following_count,
                heart_count: self.stats.heart_count,
                video_count: self.stats.video_count,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiVideoPage {
    #[serde(default)]
    videos: Vec<ApiVideo>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ApiVideo {
    id: String,
    #[serde(default)]
    author_id: String,
    /// Unix seconds
    create_time: i64,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    share_url: Option<String>,
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    stats: ApiVideoStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVideoStats {
    #[serde(default)]
    play_count: u64,
    #[serde(default)]
    digg_count: u64,
    #[serde(default)]
    comment_count: u64,
    #[serde(default)]
    share_count: u64,
    #[serde(default)]
    collect_count: u64,
}

impl ApiVideo {
    fn into_post(self) -> Result<Post, SourceError> {
        let date_posted: DateTime<Utc> = DateTime::from_timestamp(self.create_time, 0)
            .ok_or_else(|| {
                SourceError::Decode(format!(
                    "video {} has invalid create_time {}",
                    self.id, self.create_time
                ))
            })?;
        Ok(Post {
            id: self.id,
            channel_id: self.author_id,
            date_posted,
            description: self.desc,
            url: self.share_url,
            cover_url: self.cover_url,
            stats: PostStats {
                play_count: self.stats.play_count,
                like_count: self.stats.digg_count,
                comment_count: self.stats.comment_count,
                share_count: self.stats.share_count,
                collect_count: self.stats.collect_count,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_maps_platform_counters() {
        let raw = serde_json::json!({
            "id": "v1",
            "author_id": "u1",
            "create_time": 1_700_000_000,
            "desc": "new serum demo",
            "stats": {"playCount": 2000, "diggCount": 150, "commentCount": 12, "shareCount": 3, "collectCount": 9}
        });
        let video: ApiVideo = serde_json::from_value(raw).unwrap();
        let post = video.into_post().unwrap();
        assert_eq!(post.channel_id, "u1");
        assert_eq!(post.stats.play_count, 2000);
        assert_eq!(post.stats.like_count, 150);
        assert_eq!(post.date_posted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn video_with_out_of_range_timestamp_is_rejected() {
        let raw = serde_json::json!({"id": "v1", "create_time": i64::MAX});
        let video: ApiVideo = serde_json::from_value(raw).unwrap();
        assert!(matches!(video.into_post(), Err(SourceError::Decode(_))));
    }

    #[test]
    fn user_url_escapes_identity() {
        let source = HttpContentSource::new(HttpSourceConfig::new("http://gw.local/"));
        assert_eq!(source.user_url("a b"), "http://gw.local/users/a%20b");
    }

    #[tokio::test]
    async fn fetch_before_start_fails() {
        let source = HttpContentSource::new(HttpSourceConfig::new("http://127.0.0.1:9"));
        let err = source.fetch_channel("someone").await.unwrap_err();
        assert!(matches!(err, SourceError::NotStarted));
    }
}
