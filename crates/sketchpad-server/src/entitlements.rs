use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::identity::{AuthUser, UserType};
use crate::repositories::{Store, StoreError};

/// Length of the rolling window the daily limits are counted over.
pub const RATE_WINDOW_HOURS: i64 = 24;

/// Chats a caller may start per rolling day, by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlements {
    /// Callers without a session, counted per network address.
    pub anonymous_per_day: u64,
    pub guest_per_day: u64,
    pub regular_per_day: u64,
}

impl Default for Entitlements {
    fn default() -> Self {
        Self {
            anonymous_per_day: 3,
            guest_per_day: 5,
            regular_per_day: 50,
        }
    }
}

impl Entitlements {
    pub fn max_messages_per_day(&self, user: Option<&AuthUser>) -> u64 {
        match user.map(|u| u.user_type) {
            None => self.anonymous_per_day,
            Some(UserType::Guest) => self.guest_per_day,
            Some(UserType::Regular) => self.regular_per_day,
        }
    }

    /// Reject with 429 once the caller's count in the window reaches its limit.
    ///
    /// Signed-in callers are counted by owned chats, anonymous ones by the
    /// chats logged for `client_ip`. Without a database nothing is counted.
    pub async fn check(
        &self,
        store: &dyn Store,
        user: Option<&AuthUser>,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        let since = (now - Duration::hours(RATE_WINDOW_HOURS)).timestamp();
        let counted = match user {
            Some(user) => store.count_ownerships_since(&user.id, since).await,
            None => store.count_anonymous_since(client_ip, since).await,
        };

        let used = match counted {
            Ok(used) => used,
            Err(StoreError::Unavailable) => {
                warn!("Rate limit not enforced: storage is not configured");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let limit = self.max_messages_per_day(user);
        if used >= limit {
            debug!(used, limit, client_ip, "Daily limit reached");
            return Err(ApiError::rate_limited());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{AnonymousChatLog, InMemoryStore, UnavailableStore};
    use axum::http::StatusCode;

    fn user(email: &str) -> AuthUser {
        AuthUser {
            id: "u1".into(),
            email: email.into(),
            user_type: UserType::for_email(email),
        }
    }

    #[test]
    fn test_tiers() {
        let limits = Entitlements::default();
        assert_eq!(limits.max_messages_per_day(None), 3);
        assert_eq!(limits.max_messages_per_day(Some(&user("guest-7@example.com"))), 5);
        assert_eq!(limits.max_messages_per_day(Some(&user("ada@example.com"))), 50);
    }

    #[tokio::test]
    async fn test_anonymous_limit_counts_window_only() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let limits = Entitlements::default();
        let log = |hours_ago: i64, chat: &str| AnonymousChatLog {
            ip_address: "203.0.113.5".into(),
            chat_id: chat.into(),
            created_at: (now - Duration::hours(hours_ago)).timestamp(),
        };

        store.create_anonymous_log(log(30, "old")).await.unwrap();
        store.create_anonymous_log(log(1, "a")).await.unwrap();
        store.create_anonymous_log(log(2, "b")).await.unwrap();
        assert!(limits.check(&store, None, "203.0.113.5", now).await.is_ok());

        store.create_anonymous_log(log(3, "c")).await.unwrap();
        let err = limits.check(&store, None, "203.0.113.5", now).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        // Another address has its own budget.
        assert!(limits.check(&store, None, "198.51.100.7", now).await.is_ok());
    }

    #[tokio::test]
    async fn test_signed_in_counts_ownership() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let limits = Entitlements {
            regular_per_day: 1,
            ..Entitlements::default()
        };
        let ada = user("ada@example.com");
        assert!(limits.check(&store, Some(&ada), "unknown", now).await.is_ok());

        store.create_ownership("chat-1", "u1", now.timestamp()).await.unwrap();
        assert!(limits.check(&store, Some(&ada), "unknown", now).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_not_limited() {
        let limits = Entitlements::default();
        assert!(limits.check(&UnavailableStore, None, "203.0.113.5", Utc::now()).await.is_ok());
    }
}
