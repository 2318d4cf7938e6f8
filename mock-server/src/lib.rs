//! In-memory stand-in for the Consul KV endpoint.
//!
//! Serves `/v1/kv/{key}` with GET/PUT/DELETE, the `X-Consul-*` response
//! headers, blocking queries (`index` + `wait`), datacenter routing and an
//! optional ACL token. Enough of the real API for client integration tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{watch, RwLock},
    time::{timeout_at, Instant},
};
use tracing::debug;

/// Wait applied to a blocking query that gives an index but no wait.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(300);
/// Upper bound on any blocking query wait.
pub const MAX_WAIT: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub datacenter: String,
    /// When set, every request must present this token.
    pub acl_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            datacenter: "dc1".to_string(),
            acl_token: None,
        }
    }
}

/// One KV entry as the API returns it; `value` is base64.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct KvEntry {
    pub key: String,
    pub value: Option<String>,
    pub flags: u64,
    pub create_index: u64,
    pub modify_index: u64,
    pub lock_index: u64,
}

struct Stored {
    value: Vec<u8>,
    flags: u64,
    create_index: u64,
    modify_index: u64,
}

impl Stored {
    fn to_entry(&self, key: &str) -> KvEntry {
        KvEntry {
            key: key.to_string(),
            value: (!self.value.is_empty()).then(|| STANDARD.encode(&self.value)),
            flags: self.flags,
            create_index: self.create_index,
            modify_index: self.modify_index,
            lock_index: 0,
        }
    }
}

struct Store {
    entries: RwLock<BTreeMap<String, Stored>>,
    /// Raft-style index of the last write.
    index: watch::Sender<u64>,
}

impl Store {
    fn current(&self) -> u64 {
        *self.index.borrow()
    }

    /// Advance the index by one and wake blocked readers.
    fn bump(&self) -> u64 {
        let mut next = 0;
        self.index.send_modify(|index| {
            *index += 1;
            next = *index;
        });
        next
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    store: Arc<Store>,
}

type Params = HashMap<String, String>;

pub fn app() -> Router {
    app_with(ServerConfig::default())
}

pub fn app_with(config: ServerConfig) -> Router {
    let (index, _) = watch::channel(1);
    let state = AppState {
        config: Arc::new(config),
        store: Arc::new(Store {
            entries: RwLock::new(BTreeMap::new()),
            index,
        }),
    };
    Router::new()
        .route("/v1/kv/{*key}", get(get_kv).put(put_kv).delete(delete_kv))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, config: ServerConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

/// Parse a wait value such as `1500ms`, `10s` or `5m`.
pub fn parse_wait(value: &str) -> Option<Duration> {
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = value.split_at(split);
    let number: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number.checked_mul(60)?)),
        _ => None,
    }
}

fn consul_headers(index: u64) -> [(&'static str, String); 3] {
    [
        ("X-Consul-Index", index.to_string()),
        ("X-Consul-KnownLeader", "true".to_string()),
        ("X-Consul-LastContact", "0".to_string()),
    ]
}

fn authorize(config: &ServerConfig, params: &Params, headers: &HeaderMap) -> Result<(), Response> {
    if let Some(dc) = params.get("dc") {
        if !dc.is_empty() && *dc != config.datacenter {
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "No path to datacenter").into_response());
        }
    }
    if let Some(required) = &config.acl_token {
        let presented = params
            .get("token")
            .map(String::as_str)
            .or_else(|| headers.get("X-Consul-Token").and_then(|v| v.to_str().ok()));
        if presented != Some(required.as_str()) {
            return Err((StatusCode::FORBIDDEN, "Permission denied").into_response());
        }
    }
    Ok(())
}

/// Hold a blocking query until the index passes `min` or the wait runs out.
async fn block_until_past(store: &Store, params: &Params) {
    let Some(min) = params.get("index").and_then(|i| i.parse::<u64>().ok()) else {
        return;
    };
    let wait = params
        .get("wait")
        .and_then(|w| parse_wait(w))
        .unwrap_or(DEFAULT_WAIT)
        .min(MAX_WAIT);
    let deadline = Instant::now() + wait;
    let mut rx = store.index.subscribe();
    while *rx.borrow_and_update() <= min {
        match timeout_at(deadline, rx.changed()).await {
            Ok(Ok(())) => continue,
            _ => break,
        }
    }
}

async fn get_kv(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&state.config, &params, &headers) {
        return rejection;
    }
    block_until_past(&state.store, &params).await;

    let entries = state.store.entries.read().await;
    let index = state.store.current();
    let recurse = params.contains_key("recurse");

    if params.contains_key("raw") && !recurse {
        return match entries.get(&key) {
            Some(stored) => (consul_headers(index), stored.value.clone()).into_response(),
            None => (StatusCode::NOT_FOUND, consul_headers(index)).into_response(),
        };
    }

    let matched: Vec<KvEntry> = if recurse {
        entries
            .range(key.clone()..)
            .take_while(|(k, _)| k.starts_with(&key))
            .map(|(k, stored)| stored.to_entry(k))
            .collect()
    } else {
        entries.get(&key).map(|stored| stored.to_entry(&key)).into_iter().collect()
    };
    if matched.is_empty() {
        return (StatusCode::NOT_FOUND, consul_headers(index)).into_response();
    }
    (consul_headers(index), Json(matched)).into_response()
}

async fn put_kv(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = authorize(&state.config, &params, &headers) {
        return rejection;
    }
    let flags = match params.get("flags").map(|f| f.parse::<u64>()) {
        Some(Ok(flags)) => flags,
        Some(Err(_)) => return (StatusCode::BAD_REQUEST, "Invalid flags").into_response(),
        None => 0,
    };
    let cas = match params.get("cas").map(|c| c.parse::<u64>()) {
        Some(Ok(cas)) => Some(cas),
        Some(Err(_)) => return (StatusCode::BAD_REQUEST, "Invalid cas index").into_response(),
        None => None,
    };

    let mut entries = state.store.entries.write().await;
    if let Some(cas) = cas {
        let current = entries.get(&key).map(|stored| stored.modify_index);
        let accepted = match (cas, current) {
            (0, None) => true,
            (expected, Some(modify_index)) => expected == modify_index,
            (_, None) => false,
        };
        if !accepted {
            return (consul_headers(state.store.current()), Json(false)).into_response();
        }
    }

    let index = state.store.bump();
    let create_index = entries.get(&key).map_or(index, |stored| stored.create_index);
    debug!(%key, index, "kv put");
    entries.insert(
        key,
        Stored {
            value: body.to_vec(),
            flags,
            create_index,
            modify_index: index,
        },
    );
    (consul_headers(index), Json(true)).into_response()
}

async fn delete_kv(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&state.config, &params, &headers) {
        return rejection;
    }
    let mut entries = state.store.entries.write().await;
    let before = entries.len();
    if params.contains_key("recurse") {
        entries.retain(|k, _| !k.starts_with(&key));
    } else {
        entries.remove(&key);
    }
    let index = if entries.len() < before {
        debug!(%key, "kv delete");
        state.store.bump()
    } else {
        state.store.current()
    };
    (consul_headers(index), Json(true)).into_response()
}
