use tracing::warn;

use super::error::{StoreError, StoreResult};
use super::store::{
    AnonymousChatLog, BoxFuture, OwnershipRecord, SessionRecord, Store, UserRecord,
};

/// Stand-in when no database is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

fn unavailable<T: Send + 'static>(operation: &'static str) -> BoxFuture<'static, StoreResult<T>> {
    Box::pin(async move {
        warn!(operation, "Storage call without a configured database");
        Err(StoreError::Unavailable)
    })
}

impl Store for UnavailableStore {
    fn create_ownership(&self, _: &str, _: &str, _: i64) -> BoxFuture<'static, StoreResult<()>> {
        unavailable("create_ownership")
    }

    fn ownership(&self, _: &str) -> BoxFuture<'static, StoreResult<Option<OwnershipRecord>>> {
        unavailable("ownership")
    }

    fn chat_ids_by_user(&self, _: &str) -> BoxFuture<'static, StoreResult<Vec<String>>> {
        unavailable("chat_ids_by_user")
    }

    fn delete_ownership(&self, _: &str) -> BoxFuture<'static, StoreResult<()>> {
        unavailable("delete_ownership")
    }

    fn count_ownerships_since(&self, _: &str, _: i64) -> BoxFuture<'static, StoreResult<u64>> {
        unavailable("count_ownerships_since")
    }

    fn create_anonymous_log(&self, _: AnonymousChatLog) -> BoxFuture<'static, StoreResult<()>> {
        unavailable("create_anonymous_log")
    }

    fn count_anonymous_since(&self, _: &str, _: i64) -> BoxFuture<'static, StoreResult<u64>> {
        unavailable("count_anonymous_since")
    }

    fn create_user(&self, _: UserRecord) -> BoxFuture<'static, StoreResult<()>> {
        unavailable("create_user")
    }

    fn user_by_email(&self, _: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>> {
        unavailable("user_by_email")
    }

    fn user_by_id(&self, _: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>> {
        unavailable("user_by_id")
    }

    fn create_session(&self, _: SessionRecord) -> BoxFuture<'static, StoreResult<()>> {
        unavailable("create_session")
    }

    fn session(&self, _: &str) -> BoxFuture<'static, StoreResult<Option<SessionRecord>>> {
        unavailable("session")
    }

    fn delete_session(&self, _: &str) -> BoxFuture<'static, StoreResult<()>> {
        unavailable("delete_session")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_call_is_unavailable() {
        let store = UnavailableStore;
        assert!(matches!(
            store.ownership("chat-1").await,
            Err(StoreError::Unavailable)
        ));
        assert!(matches!(
            store.count_anonymous_since("203.0.113.5", 0).await,
            Err(StoreError::Unavailable)
        ));
    }
}
