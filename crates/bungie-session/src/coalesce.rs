//! Per-membership refresh coalescing
//!
//! Bungie rotates refresh tokens: spending one returns a replacement and
//! invalidates the original. Two requests from the same browser racing a
//! refresh would otherwise spend the same token twice, and the second call
//! gets a rejection that clears a perfectly good session.
//!
//! Refreshes for one membership id are serialized behind an async mutex. The
//! winner records a fingerprint of the token it consumed; a follower that
//! presents the same token within the window gets the winner's bundle back
//! instead of calling the provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bungie_auth::{Grant, Result, TokenBundle, TokenProvider};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

struct Recent {
    consumed: [u8; 32],
    bundle: TokenBundle,
    at: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<Recent>>>;

/// Serializes refreshes per membership id and shares recent results.
pub struct RefreshCoalescer {
    window: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RefreshCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh `refresh_token`, or reuse the bundle a concurrent request just
    /// obtained for it. The flag is `true` when the result was reused.
    pub async fn refresh<P: TokenProvider + ?Sized>(
        &self,
        provider: &P,
        membership_id: &str,
        refresh_token: &str,
        now: OffsetDateTime,
    ) -> Result<(TokenBundle, bool)> {
        let slot = self.slot(membership_id);
        let mut recent = slot.lock().await;

        let fingerprint: [u8; 32] = Sha256::digest(refresh_token.as_bytes()).into();
        if let Some(previous) = recent.as_ref()
            && previous.consumed == fingerprint
            && previous.at.elapsed() < self.window
        {
            debug!(membership_id, "reusing concurrent refresh result");
            return Ok((previous.bundle.clone(), true));
        }

        let response = provider
            .exchange_token(Grant::RefreshToken(refresh_token))
            .await?;
        let bundle = TokenBundle::from_response(response, now);
        *recent = Some(Recent {
            consumed: fingerprint,
            bundle: bundle.clone(),
            at: Instant::now(),
        });
        Ok((bundle, false))
    }

    /// Number of memberships currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }

    fn slot(&self, membership_id: &str) -> Slot {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Lazy cleanup: drop idle slots whose result is outside the window
        let window = self.window;
        slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot.try_lock().map_or(true, |recent| {
                    recent.as_ref().is_some_and(|r| r.at.elapsed() < window)
                })
        });

        slots.entry(membership_id.to_owned()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[tokio::test]
    async fn sequential_refreshes_with_same_token_reuse_result() {
        let provider = MockProvider::succeeding();
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        let (first, reused) = coalescer.refresh(&provider, "42", "rt_1", now()).await.unwrap();
        assert!(!reused);
        let (second, reused) = coalescer.refresh(&provider, "42", "rt_1", now()).await.unwrap();
        assert!(reused);
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_make_one_call() {
        let provider = MockProvider::succeeding().with_delay(Duration::from_millis(50));
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        let (a, b) = tokio::join!(
            coalescer.refresh(&provider, "42", "rt_1", now()),
            coalescer.refresh(&provider, "42", "rt_1", now()),
        );
        assert_eq!(a.unwrap().0, b.unwrap().0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn different_token_calls_provider() {
        let provider = MockProvider::succeeding();
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        coalescer.refresh(&provider, "42", "rt_1", now()).await.unwrap();
        let (_, reused) = coalescer.refresh(&provider, "42", "rt_2", now()).await.unwrap();
        assert!(!reused);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn different_memberships_are_independent() {
        let provider = MockProvider::succeeding();
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        coalescer.refresh(&provider, "1", "rt", now()).await.unwrap();
        coalescer.refresh(&provider, "2", "rt", now()).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn result_expires_after_window() {
        let provider = MockProvider::succeeding();
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        coalescer.refresh(&provider, "42", "rt_1", now()).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        let (_, reused) = coalescer.refresh(&provider, "42", "rt_1", now()).await.unwrap();
        assert!(!reused);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_remembered() {
        let provider = MockProvider::rejecting();
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        assert!(coalescer.refresh(&provider, "42", "rt", now()).await.is_err());
        assert!(coalescer.refresh(&provider, "42", "rt", now()).await.is_err());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_slots_are_cleaned_up() {
        let provider = MockProvider::succeeding();
        let coalescer = RefreshCoalescer::new(Duration::from_secs(30));

        coalescer.refresh(&provider, "1", "rt", now()).await.unwrap();
        coalescer.refresh(&provider, "2", "rt", now()).await.unwrap();
        assert_eq!(coalescer.tracked(), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        coalescer.refresh(&provider, "3", "rt", now()).await.unwrap();
        assert_eq!(coalescer.tracked(), 1);
    }
}
