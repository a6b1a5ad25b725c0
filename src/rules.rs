//! Policy collaborator: fetch the room rules document once per room entry.
//!
//! A dead or slow rules host must never block entering a room, so the fetch
//! carries a hard timeout and every failure path degrades to the permissive
//! [`RulesPolicy::default`].

use std::time::Duration;

use tracing::{info, warn};

use crate::models::RulesPolicy;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn load_policy(url: Option<&str>) -> RulesPolicy {
    let Some(url) = url else {
        info!("no rules url configured; using permissive defaults");
        return RulesPolicy::default();
    };
    match fetch_policy(url).await {
        Ok(policy) => {
            info!("loaded room rules from {}", url);
            policy
        }
        Err(e) => {
            warn!("rules fetch from {} failed, using permissive defaults: {}", url, e);
            RulesPolicy::default()
        }
    }
}

async fn fetch_policy(url: &str) -> Result<RulesPolicy, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    client.get(url).send().await?.error_for_status()?.json().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_yields_permissive_defaults() {
        let policy = load_policy(None).await;
        assert!(policy.banned_words.is_empty());
        assert_eq!(policy.spam.max_messages_per10s, u32::MAX);
    }

    #[tokio::test]
    async fn unreachable_host_yields_permissive_defaults() {
        // Nothing listens here; the fetch fails fast and falls back.
        let policy = load_policy(Some("http://127.0.0.1:9/rules.json")).await;
        assert!(policy.banned_words.is_empty());
        assert!(policy.mute_durations_minutes.is_empty());
    }
}
