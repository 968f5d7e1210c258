//! In-process stand-in for the Vault transit API, served over real HTTP.
//!
//! Covers the endpoints the client and bootstrap use. Ciphertexts embed the
//! key's generation, so [`FakeVault::forget_keys`] (a dev-mode Vault restart)
//! makes every earlier ciphertext undecryptable while new wraps keep working.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::kms::vault::TOKEN_HEADER;
use crate::kms::VaultTransitClient;

pub const TOKEN: &str = "test-token";
pub const TRANSIT_KEY: &str = "pii-master";

#[derive(Debug)]
struct VaultState {
    mounted: bool,
    /// Key name to current generation.
    keys: HashMap<String, u64>,
    next_generation: u64,
    health_status: u16,
}

impl VaultState {
    fn new_key(&mut self, name: &str) {
        self.next_generation += 1;
        self.keys.insert(name.to_owned(), self.next_generation);
    }
}

type Shared = Arc<Mutex<VaultState>>;

pub struct FakeVault {
    addr: String,
    state: Shared,
    task: JoinHandle<()>,
}

impl FakeVault {
    /// Transit mounted and [`TRANSIT_KEY`] created.
    pub async fn start() -> Self {
        let vault = Self::start_unprovisioned().await;
        {
            let mut st = vault.state.lock().unwrap();
            st.mounted = true;
            st.new_key(TRANSIT_KEY);
        }
        vault
    }

    /// Empty server: no transit mount, no keys.
    pub async fn start_unprovisioned() -> Self {
        let state: Shared = Arc::new(Mutex::new(VaultState {
            mounted: false,
            keys: HashMap::new(),
            next_generation: 0,
            health_status: 200,
        }));

        let app = Router::new()
            .route("/v1/sys/health", get(health))
            .route("/v1/sys/mounts", get(list_mounts))
            .route("/v1/sys/mounts/transit", post(mount_transit))
            .route("/v1/transit/keys/:name", get(read_key).post(create_key))
            .route("/v1/transit/encrypt/:name", post(encrypt))
            .route("/v1/transit/decrypt/:name", post(decrypt))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, task }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn client(&self) -> VaultTransitClient {
        VaultTransitClient::new(&self.addr, TOKEN, TRANSIT_KEY, Duration::from_secs(5)).unwrap()
    }

    /// Simulate a dev-mode restart followed by re-provisioning: every key gets
    /// fresh material and all earlier ciphertexts stop decrypting.
    pub fn forget_keys(&self) {
        let mut st = self.state.lock().unwrap();
        let names: Vec<String> = st.keys.keys().cloned().collect();
        for name in names {
            st.new_key(&name);
        }
    }

    pub fn set_health_status(&self, code: u16) {
        self.state.lock().unwrap().health_status = code;
    }

    pub fn has_transit_mount(&self) -> bool {
        self.state.lock().unwrap().mounted
    }

    pub fn has_key(&self, name: &str) -> bool {
        self.state.lock().unwrap().keys.contains_key(name)
    }
}

impl Drop for FakeVault {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn vault_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "errors": [msg] }))).into_response()
}

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    match headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(TOKEN) => Ok(()),
        _ => Err(vault_error(StatusCode::FORBIDDEN, "permission denied")),
    }
}

async fn health(State(state): State<Shared>) -> Response {
    let code = state.lock().unwrap().health_status;
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "initialized": true, "sealed": false }))).into_response()
}

async fn list_mounts(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let mut data = json!({ "secret/": { "type": "kv" } });
    if state.lock().unwrap().mounted {
        data["transit/"] = json!({ "type": "transit" });
    }
    Json(json!({ "data": data })).into_response()
}

async fn mount_transit(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let mut st = state.lock().unwrap();
    if st.mounted {
        return vault_error(StatusCode::BAD_REQUEST, "path is already in use at transit/");
    }
    st.mounted = true;
    StatusCode::NO_CONTENT.into_response()
}

async fn read_key(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let st = state.lock().unwrap();
    if st.mounted && st.keys.contains_key(&name) {
        Json(json!({ "data": { "name": name, "type": "aes256-gcm96" } })).into_response()
    } else {
        vault_error(StatusCode::NOT_FOUND, "")
    }
}

async fn create_key(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let mut st = state.lock().unwrap();
    if !st.mounted {
        return vault_error(StatusCode::NOT_FOUND, "no handler for route");
    }
    if !st.keys.contains_key(&name) {
        st.new_key(&name);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn encrypt(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let Some(plaintext) = body.get("plaintext").and_then(Value::as_str) else {
        return vault_error(StatusCode::BAD_REQUEST, "missing plaintext to encrypt");
    };
    let mut st = state.lock().unwrap();
    if !st.mounted {
        return vault_error(StatusCode::NOT_FOUND, "no handler for route");
    }
    // Transit upserts the key on first encrypt.
    if !st.keys.contains_key(&name) {
        st.new_key(&name);
    }
    let generation = st.keys[&name];
    let sealed = STANDARD.encode(format!("{generation}:{plaintext}"));
    Json(json!({ "data": { "ciphertext": format!("vault:v1:{sealed}") } })).into_response()
}

async fn decrypt(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    let Some(ciphertext) = body.get("ciphertext").and_then(Value::as_str) else {
        return vault_error(StatusCode::BAD_REQUEST, "missing ciphertext to decrypt");
    };
    let st = state.lock().unwrap();
    let Some(current) = st.keys.get(&name).copied() else {
        return vault_error(StatusCode::BAD_REQUEST, "encryption key not found");
    };

    let opened = ciphertext
        .strip_prefix("vault:v1:")
        .and_then(|b64| STANDARD.decode(b64).ok())
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|text| {
            let (generation, plaintext) = text.split_once(':')?;
            Some((generation.parse::<u64>().ok()?, plaintext.to_owned()))
        });

    match opened {
        Some((generation, plaintext)) if generation == current => {
            Json(json!({ "data": { "plaintext": plaintext } })).into_response()
        }
        _ => vault_error(
            StatusCode::BAD_REQUEST,
            "invalid ciphertext: unable to decrypt",
        ),
    }
}
