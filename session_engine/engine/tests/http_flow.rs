//! End-to-end runs against an in-process HTTP relay, Fast Vault Server and
//! Verifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use session_engine::auth;
use session_engine::mpc::SimulatedMpcBackend;
use session_engine::relay::{Relay, RelayClient};
use session_engine::{
    EngineConfig, KeygenParams, KeysignParams, PartyId, PartyRole, ReshareParams, SessionCoordinator,
    SessionError, SessionId, SignatureScheme, Vault,
};

#[derive(Clone, Default)]
struct Mock {
    sessions: Arc<Mutex<HashMap<String, Vec<String>>>>,
    started: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    completed: Arc<Mutex<Vec<(String, String)>>>,
    joins: Arc<Mutex<Vec<(String, Value, Option<String>)>>>,
    refuse_verifier: Arc<Mutex<bool>>,
    known_vaults: Arc<Mutex<Vec<String>>>,
}

impl Mock {
    /// Registers `party` after a short delay, as a remote party would.
    fn join_later(&self, session: String, party: String) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let mut sessions = sessions.lock().unwrap();
            let members = sessions.entry(session).or_default();
            if !members.contains(&party) {
                members.push(party);
            }
        });
    }

    fn record_join(&self, path: &str, body: &Value, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.joins
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone(), auth));
    }
}

async fn register(State(mock): State<Mock>, Path(id): Path<String>, Json(parties): Json<Vec<String>>) -> StatusCode {
    mock.sessions.lock().unwrap().insert(id, parties);
    StatusCode::CREATED
}

async fn members(State(mock): State<Mock>, Path(id): Path<String>) -> Json<Vec<String>> {
    Json(mock.sessions.lock().unwrap().get(&id).cloned().unwrap_or_default())
}

async fn start(
    State(mock): State<Mock>,
    Path((id, tail)): Path<(String, String)>,
    Json(parties): Json<Vec<String>>,
) -> StatusCode {
    if tail != "start" {
        return StatusCode::NOT_FOUND;
    }
    mock.started.lock().unwrap().push((id, parties));
    StatusCode::OK
}

async fn complete(State(mock): State<Mock>, Path((id, party)): Path<(String, String)>) -> StatusCode {
    mock.completed.lock().unwrap().push((id, party));
    StatusCode::OK
}

async fn vault_create(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    mock.record_join("/vault/create", &body, &headers);
    let session = body["session_id"].as_str().unwrap_or_default().to_string();
    let party = body["local_party_id"].as_str().unwrap_or_default().to_string();
    mock.join_later(session, party);
    StatusCode::OK
}

async fn vault_sign(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    mock.record_join("/vault/sign", &body, &headers);
    let session = body["session"].as_str().unwrap_or_default().to_string();
    mock.join_later(session, "Server-12345".into());
    StatusCode::OK
}

/// Fast Vault and Verifier share the path; the plugin id tells them apart.
async fn vault_reshare(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, String) {
    mock.record_join("/vault/reshare", &body, &headers);
    let session = body["session_id"].as_str().unwrap_or_default().to_string();
    let party = body["local_party_id"].as_str().unwrap_or_default().to_string();

    if body.get("plugin_id").is_some() {
        if *mock.refuse_verifier.lock().unwrap() {
            return (StatusCode::INTERNAL_SERVER_ERROR, "verifier exploded".into());
        }
        if headers.get("authorization").is_none() {
            return (StatusCode::UNAUTHORIZED, "missing token".into());
        }
        mock.join_later(session.clone(), party);
        mock.join_later(session, "dca-plugin-party".into());
    } else {
        mock.join_later(session, party);
    }
    (StatusCode::OK, String::new())
}

async fn vault_exist(State(mock): State<Mock>, Path(pk): Path<String>) -> StatusCode {
    if mock.known_vaults.lock().unwrap().contains(&pk) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn auth_login(State(mock): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    mock.record_join("/auth", &body, &headers);
    Json(json!({ "data": { "token": "jwt-from-verifier" } }))
}

/// Serves every mock endpoint on one ephemeral port and returns its base URL.
async fn spawn_mock(mock: Mock) -> String {
    let app = Router::new()
        .route("/session/:id", post(register).get(members))
        .route("/session/:id/:tail", post(start).delete(complete))
        .route("/vault/create", post(vault_create))
        .route("/vault/sign", post(vault_sign))
        .route("/vault/reshare", post(vault_reshare))
        .route("/vault/exist/:pk", get(vault_exist))
        .route("/auth", post(auth_login))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config(base: &str) -> EngineConfig {
    EngineConfig {
        relay_url: base.to_string(),
        fast_vault_url: base.to_string(),
        verifier_url: base.to_string(),
        poll_interval: Duration::from_millis(50),
        keygen_timeout: Duration::from_secs(5),
        reshare_timeout: Duration::from_secs(5),
        keysign_timeout: Duration::from_secs(5),
        verifier_keysign_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
    }
}

fn coordinator(base: &str) -> SessionCoordinator {
    SessionCoordinator::from_config(config(base), Arc::new(SimulatedMpcBackend::new())).unwrap()
}

async fn generate(coordinator: &SessionCoordinator) -> Vault {
    coordinator
        .keygen(
            PartyId::new("cli-1"),
            KeygenParams {
                name: "http-vault".into(),
                ..KeygenParams::default()
            },
            &CancellationToken::new(),
        )
        .await
        .expect("keygen over http")
        .value
}

#[tokio::test]
async fn test_keygen_over_http() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let coordinator = coordinator(&base);

    let vault = generate(&coordinator).await;

    assert_eq!(vault.signers.len(), 2);
    assert_eq!(vault.signers[0], PartyId::new("cli-1"));
    assert!(vault.signers[1].as_str().starts_with("Server-"));

    let started = mock.started.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].1, vec!["cli-1".to_string(), vault.signers[1].to_string()]);
    let completed = mock.completed.lock().unwrap().clone();
    assert_eq!(completed, vec![(started[0].0.clone(), "cli-1".to_string())]);

    let joins = mock.joins.lock().unwrap().clone();
    assert_eq!(joins[0].0, "/vault/create");
    assert_eq!(joins[0].1["lib_type"], 1);
    assert_eq!(joins[0].1["hex_chain_code"], vault.hex_chain_code.as_str());
}

#[tokio::test]
async fn test_reshare_and_keysign_over_http() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let coordinator = coordinator(&base);
    let vault = generate(&coordinator).await;

    let done = coordinator
        .reshare(
            &vault,
            ReshareParams {
                plugin_id: "vultisig-dca-0000".into(),
                verifier_url: None,
                auth_header: Some("Bearer jwt".into()),
                vault_password: "pw".into(),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("reshare over http");

    let resharded = done.value;
    assert_eq!(resharded.signers.len(), 4);
    assert_eq!(resharded.public_key_ecdsa, vault.public_key_ecdsa);
    assert_eq!(resharded.public_key_eddsa, vault.public_key_eddsa);
    assert!(done.roster.contains(&(PartyId::new("dca-plugin-party"), PartyRole::Plugin)));

    let verifier_join = mock
        .joins
        .lock()
        .unwrap()
        .iter()
        .find(|(path, body, _)| path == "/vault/reshare" && body.get("plugin_id").is_some())
        .cloned()
        .expect("verifier join recorded");
    assert_eq!(verifier_join.2.as_deref(), Some("Bearer jwt"));

    let signed = coordinator
        .keysign(
            &resharded,
            KeysignParams {
                messages: vec!["aa".repeat(32), "bb".repeat(32)],
                scheme: SignatureScheme::Ecdsa,
                derive_path: "m/44'/60'/0'/0/0".into(),
                vault_password: "pw".into(),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("keysign over http");
    assert_eq!(signed.value.len(), 2);
    assert_ne!(signed.value[0], signed.value[1]);
}

#[tokio::test]
async fn test_verifier_refusal_over_http() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let coordinator = coordinator(&base);
    let vault = generate(&coordinator).await;
    *mock.refuse_verifier.lock().unwrap() = true;

    let err = coordinator
        .reshare(
            &vault,
            ReshareParams {
                plugin_id: "vultisig-dca-0000".into(),
                auth_header: Some("Bearer jwt".into()),
                ..ReshareParams::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        SessionError::RemotePartyRefused { role, reason } => {
            assert_eq!(role, PartyRole::Verifier);
            assert!(reason.contains("500"), "{reason}");
            assert!(reason.contains("verifier exploded"), "{reason}");
        }
        other => panic!("expected RemotePartyRefused, got {other:?}"),
    }
    // only the keygen session ever started
    assert_eq!(mock.started.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_relay_client_edge_cases() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let relay = RelayClient::new(&base, Duration::from_secs(5)).unwrap();
    let id = SessionId::from("unknown-session");

    // unknown sessions read as empty membership
    assert!(relay.get_session(&id).await.unwrap().is_empty());

    relay.register_session(&id, &PartyId::new("cli-1")).await.unwrap();
    assert_eq!(relay.get_session(&id).await.unwrap(), vec![PartyId::new("cli-1")]);

    let down = RelayClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
    assert!(matches!(
        down.register_session(&id, &PartyId::new("cli-1")).await,
        Err(SessionError::RelayUnavailable(_))
    ));
    assert!(matches!(
        down.complete_session(&id, &PartyId::new("cli-1")).await,
        Err(SessionError::CompletionSignalFailed(_))
    ));
}

#[tokio::test]
async fn test_vault_exists_over_http() {
    let mock = Mock::default();
    mock.known_vaults.lock().unwrap().push("02abcdef".into());
    let base = spawn_mock(mock.clone()).await;
    let coordinator = coordinator(&base);

    assert!(coordinator.vault_exists("02abcdef").await.unwrap());
    assert!(!coordinator.vault_exists("03ffffff").await.unwrap());
}

#[tokio::test]
async fn test_auth_login_over_http() {
    let mock = Mock::default();
    let base = spawn_mock(mock.clone()).await;
    let coordinator = coordinator(&base);
    let vault = generate(&coordinator).await;

    let token = auth::login(&coordinator, &vault, "pw", &CancellationToken::new())
        .await
        .expect("login");
    assert_eq!(token.token, "jwt-from-verifier");
    assert_eq!(token.public_key, vault.public_key_ecdsa);

    let joins = mock.joins.lock().unwrap().clone();
    let (_, sign_body, _) = joins
        .iter()
        .find(|(path, _, _)| path == "/vault/sign")
        .expect("fast vault asked to sign");
    let (_, auth_body, _) = joins
        .iter()
        .find(|(path, _, _)| path == "/auth")
        .expect("auth posted");

    let message = auth_body["message"].as_str().unwrap();
    let hash = hex::encode(auth::eip191_hash(message));
    assert_eq!(sign_body["messages"][0], hash.as_str());
    assert_eq!(sign_body["derive_path"], auth::AUTH_DERIVE_PATH);
    assert_eq!(auth_body["public_key"], vault.public_key_ecdsa.as_str());
    assert_eq!(auth_body["chain_code_hex"], vault.hex_chain_code.as_str());
    assert!(auth_body["signature"].as_str().unwrap().starts_with("30"));
}
