use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{StoreError, StoreResult};
use super::store::{
    AnonymousChatLog, BoxFuture, OwnershipRecord, SessionRecord, Store, UserRecord,
};

#[derive(Default)]
struct Tables {
    ownerships: Vec<OwnershipRecord>,
    anonymous_logs: Vec<AnonymousChatLog>,
    users: HashMap<String, UserRecord>,
    sessions: HashMap<String, SessionRecord>,
}

/// In-memory store. Useful for tests and for running without a database file.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn create_ownership(
        &self,
        chat_id: &str,
        user_id: &str,
        created_at: i64,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let tables = self.tables.clone();
        let record = OwnershipRecord {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            created_at,
        };
        Box::pin(async move {
            let mut tables = tables.lock();
            if !tables.ownerships.iter().any(|o| o.chat_id == record.chat_id) {
                tables.ownerships.push(record);
            }
            Ok(())
        })
    }

    fn ownership(&self, chat_id: &str) -> BoxFuture<'static, StoreResult<Option<OwnershipRecord>>> {
        let tables = self.tables.clone();
        let chat_id = chat_id.to_string();
        Box::pin(async move {
            Ok(tables
                .lock()
                .ownerships
                .iter()
                .find(|o| o.chat_id == chat_id)
                .cloned())
        })
    }

    fn chat_ids_by_user(&self, user_id: &str) -> BoxFuture<'static, StoreResult<Vec<String>>> {
        let tables = self.tables.clone();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let tables = tables.lock();
            let mut owned: Vec<(usize, &OwnershipRecord)> = tables
                .ownerships
                .iter()
                .enumerate()
                .filter(|(_, o)| o.user_id == user_id)
                .collect();
            // Newest first; insertion order breaks ties.
            owned.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
            Ok(owned.into_iter().map(|(_, o)| o.chat_id.clone()).collect())
        })
    }

    fn delete_ownership(&self, chat_id: &str) -> BoxFuture<'static, StoreResult<()>> {
        let tables = self.tables.clone();
        let chat_id = chat_id.to_string();
        Box::pin(async move {
            tables.lock().ownerships.retain(|o| o.chat_id != chat_id);
            Ok(())
        })
    }

    fn count_ownerships_since(
        &self,
        user_id: &str,
        since: i64,
    ) -> BoxFuture<'static, StoreResult<u64>> {
        let tables = self.tables.clone();
        let user_id = user_id.to_string();
        Box::pin(async move {
            let n = tables
                .lock()
                .ownerships
                .iter()
                .filter(|o| o.user_id == user_id && o.created_at >= since)
                .count();
            Ok(n as u64)
        })
    }

    fn create_anonymous_log(&self, log: AnonymousChatLog) -> BoxFuture<'static, StoreResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            tables.lock().anonymous_logs.push(log);
            Ok(())
        })
    }

    fn count_anonymous_since(
        &self,
        ip_address: &str,
        since: i64,
    ) -> BoxFuture<'static, StoreResult<u64>> {
        let tables = self.tables.clone();
        let ip_address = ip_address.to_string();
        Box::pin(async move {
            let n = tables
                .lock()
                .anonymous_logs
                .iter()
                .filter(|l| l.ip_address == ip_address && l.created_at >= since)
                .count();
            Ok(n as u64)
        })
    }

    fn create_user(&self, user: UserRecord) -> BoxFuture<'static, StoreResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.lock();
            if tables.users.contains_key(&user.id)
                || tables.users.values().any(|u| u.email == user.email)
            {
                return Err(StoreError::Duplicate { what: "User" });
            }
            tables.users.insert(user.id.clone(), user);
            Ok(())
        })
    }

    fn user_by_email(&self, email: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>> {
        let tables = self.tables.clone();
        let email = email.to_string();
        Box::pin(async move {
            Ok(tables
                .lock()
                .users
                .values()
                .find(|u| u.email == email)
                .cloned())
        })
    }

    fn user_by_id(&self, id: &str) -> BoxFuture<'static, StoreResult<Option<UserRecord>>> {
        let tables = self.tables.clone();
        let id = id.to_string();
        Box::pin(async move { Ok(tables.lock().users.get(&id).cloned()) })
    }

    fn create_session(&self, session: SessionRecord) -> BoxFuture<'static, StoreResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            tables.lock().sessions.insert(session.token.clone(), session);
            Ok(())
        })
    }

    fn session(&self, token: &str) -> BoxFuture<'static, StoreResult<Option<SessionRecord>>> {
        let tables = self.tables.clone();
        let token = token.to_string();
        Box::pin(async move { Ok(tables.lock().sessions.get(&token).cloned()) })
    }

    fn delete_session(&self, token: &str) -> BoxFuture<'static, StoreResult<()>> {
        let tables = self.tables.clone();
        let token = token.to_string();
        Box::pin(async move {
            tables.lock().sessions.remove(&token);
            Ok(())
        })
    }
}
