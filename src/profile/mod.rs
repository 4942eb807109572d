use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_PROFILE_CACHE_SIZE: usize = 1024;
const PROFILE_FIELDS: &str = "first_name,last_name,profile_pic,locale,timezone,gender";

/// User profile as returned by the platform. Forwarded verbatim to the sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Profile {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn get_or_fetch_profile(&self, user_id: &str) -> Result<Profile>;
}

/// Fetches profiles from the Graph API and keeps recent ones in memory.
/// Failed lookups are never cached.
pub struct GraphProfileResolver {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    cache: Mutex<LruCache<String, Profile>>,
}

impl GraphProfileResolver {
    pub fn new(base_url: &str, access_token: &str, cache_size: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn cached(&self, user_id: &str) -> Option<Profile> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    async fn fetch(&self, user_id: &str) -> Result<Profile> {
        let url = profile_url(&self.base_url, user_id)?;
        let response = self
            .client
            .get(url)
            .query(&[
                ("fields", PROFILE_FIELDS),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("profile request for {} failed", user_id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            anyhow::bail!("profile API error ({}): {}", status, body);
        }

        let mut profile: Profile = response
            .json()
            .await
            .with_context(|| format!("invalid profile JSON for {}", user_id))?;
        if profile.id.is_empty() {
            profile.id = user_id.to_string();
        }
        Ok(profile)
    }
}

#[async_trait]
impl ProfileResolver for GraphProfileResolver {
    async fn get_or_fetch_profile(&self, user_id: &str) -> Result<Profile> {
        if let Some(profile) = self.cached(user_id) {
            return Ok(profile);
        }

        // Lock is not held across the request; concurrent misses both fetch
        // and the later put wins.
        let profile = self.fetch(user_id).await?;
        debug!("fetched profile for {}", user_id);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(user_id.to_string(), profile.clone());
        Ok(profile)
    }
}

/// `<base>/<user_id>`, with the id percent-encoded as one path segment.
/// Page-scoped ids are numeric, but a crafted id must not rewrite the path.
fn profile_url(base_url: &str, user_id: &str) -> Result<Url> {
    if matches!(user_id, "" | "." | "..") {
        anyhow::bail!("invalid user id {:?}", user_id);
    }
    let mut url =
        Url::parse(base_url).with_context(|| format!("invalid graph API base {}", base_url))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("graph API base {} cannot take a path", base_url))?
        .pop_if_empty()
        .push(user_id);
    Ok(url)
}
