use crate::models::CreateTaskResponse;
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::warn;

/// Remembers create-task responses per `Idempotency-Key`.
#[derive(Clone)]
pub enum IdempotencyCache {
    Redis { client: redis::Client, ttl_secs: u64 },
    Memory(Arc<Mutex<HashMap<String, CreateTaskResponse>>>),
}

impl IdempotencyCache {
    pub fn new(redis_url: Option<&str>, ttl_secs: u64) -> Self {
        match redis_url.map(redis::Client::open) {
            Some(Ok(client)) => Self::Redis { client, ttl_secs },
            Some(Err(err)) => {
                warn!(target = "labelhub.api", error = %err, "invalid REDIS_URL; idempotency keys kept in memory");
                Self::memory()
            }
            None => Self::memory(),
        }
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    pub async fn get(&self, owner_id: &str, key: &str) -> Option<CreateTaskResponse> {
        let key = scoped_key(owner_id, key);
        match self {
            Self::Redis { client, .. } => redis_get(client, &key).await,
            Self::Memory(map) => map.lock().await.get(&key).cloned(),
        }
    }

    pub async fn put(&self, owner_id: &str, key: &str, value: &CreateTaskResponse) {
        let key = scoped_key(owner_id, key);
        match self {
            Self::Redis { client, ttl_secs } => redis_set(client, &key, value, *ttl_secs).await,
            Self::Memory(map) => {
                map.lock().await.insert(key, value.clone());
            }
        }
    }
}

fn scoped_key(owner_id: &str, key: &str) -> String {
    format!("labelhub:idem:{owner_id}:{key}")
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<CreateTaskResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &CreateTaskResponse, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}
