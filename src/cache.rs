use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::trace;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Families of server queries. Mutations invalidate a whole family at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Products,
    Transactions,
    Dashboard,
    Users,
    CurrentUser,
}
impl QueryKind {
    pub fn stale_after(&self) -> Duration {
        match self {
            Self::Products | Self::CurrentUser => Duration::from_secs(5 * 60),
            Self::Transactions | Self::Dashboard | Self::Users => Duration::from_secs(30),
        }
    }
    /// Families only an authenticated user may see.
    pub fn is_protected(&self) -> bool {
        !matches!(self, Self::Products)
    }
}
impl Display for QueryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Products => "products",
            Self::Transactions => "transactions",
            Self::Dashboard => "dashboard",
            Self::Users => "users",
            Self::CurrentUser => "user",
        };
        write!(f, "{}", output)
    }
}

/// Logical identity of a query: its family, the serialized parameters and,
/// for protected families, the bearer token it was fetched with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    kind: QueryKind,
    params: String,
    token: Option<String>,
}
impl QueryKey {
    pub fn new(kind: QueryKind, params: &impl Serialize) -> Self {
        let params = serde_json::to_string(params).unwrap_or_default();
        Self {
            kind,
            params,
            token: None,
        }
    }
    /// Binds a protected query to the credentials it is fetched with.
    pub fn for_token(mut self, token: Option<&str>) -> Self {
        if self.kind.is_protected() {
            self.token = token.map(str::to_string);
        }
        self
    }
    pub fn kind(&self) -> QueryKind {
        self.kind
    }
}
impl Display for QueryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind, self.params)
    }
}

#[derive(Debug)]
struct CacheEntry {
    stored: Instant,
    value: serde_json::Value,
}

/// Client-side response cache, shared between clones of the client.
#[derive(Debug, Clone, Default)]
pub struct QueryCache {
    entries: Arc<RwLock<HashMap<QueryKey, CacheEntry>>>,
}
impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }
    pub async fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.stored.elapsed() >= key.kind.stale_after() {
            trace!("Cache entry {} is stale", key);
            return None;
        }
        trace!("Cache hit for {}", key);
        serde_json::from_value(entry.value.clone()).ok()
    }
    pub async fn put<T: Serialize>(&self, key: QueryKey, value: &T) {
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        let mut entries = self.entries.write().await;
        entries.retain(|key, entry| entry.stored.elapsed() < key.kind.stale_after());
        entries.insert(
            key,
            CacheEntry {
                stored: Instant::now(),
                value,
            },
        );
    }
    /// Drops every entry of the given family, returns how many were dropped.
    pub async fn invalidate(&self, kind: QueryKind) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.kind != kind);
        let dropped = before - entries.len();
        trace!("Invalidated {} cached {} queries", dropped, kind);
        dropped
    }
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
