//! End-to-end tests over real TCP: shared listener, controllers and HTTP API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use upgrade_gateway::auth::{AccountabilityResolver, Claims, JwtResolver};
use upgrade_gateway::config::{ApiConfig, AuthMode, JwtConfig, ServerConfig, Settings, SocketConfig};
use upgrade_gateway::error::GatewayError;
use upgrade_gateway::filter::FilterPipeline;
use upgrade_gateway::server::{create_app, AppState, UpgradeListener};
use upgrade_gateway::websocket::{run_session, AcceptedConnection, UpgradeController};

const SECRET: &str = "gateway-integration-secret";
const API_KEY: &str = "test-admin-key";

struct Gateway {
    addr: SocketAddr,
    listener: Arc<UpgradeListener>,
    strict: Arc<UpgradeController>,
    resolver: Arc<dyn AccountabilityResolver>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.listener.terminate_all();
    }
}

fn settings() -> Settings {
    Settings {
        server: ServerConfig::default(),
        jwt: JwtConfig {
            secret: SECRET.to_string(),
            issuer: None,
            audience: None,
            leeway: 0,
        },
        socket: SocketConfig::new("/websocket", AuthMode::Strict),
        websocket: Default::default(),
        ratelimit: Default::default(),
        api: ApiConfig {
            key: Some(API_KEY.to_string()),
        },
        otel: Default::default(),
    }
}

fn token(sub: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: sub.to_string(),
        exp: now + 3600,
        iat: now,
        roles: vec![],
        tenant_id: None,
        extra: HashMap::new(),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn spawn_sessions(mut accepted: mpsc::Receiver<AcceptedConnection>, resolver: Arc<dyn AccountabilityResolver>) {
    tokio::spawn(async move {
        while let Some(conn) = accepted.recv().await {
            tokio::spawn(run_session(conn, resolver.clone()));
        }
    });
}

/// Strict controller on `/websocket`, handshake controller on `/handshake`.
async fn start_gateway() -> Gateway {
    let settings = settings();
    let resolver: Arc<dyn AccountabilityResolver> = Arc::new(JwtResolver::new(&settings.jwt));

    let (strict, strict_rx) =
        UpgradeController::new(settings.socket.clone(), resolver.clone(), FilterPipeline::new());
    let (handshake, handshake_rx) = UpgradeController::new(
        SocketConfig::new("/handshake", AuthMode::Handshake),
        resolver.clone(),
        FilterPipeline::new(),
    );
    spawn_sessions(strict_rx, resolver.clone());
    spawn_sessions(handshake_rx, resolver.clone());

    let app = create_app(AppState::new(settings.clone(), strict.clone()));
    let listener = Arc::new(UpgradeListener::new(app, &settings.server));
    listener.bind(strict.clone()).unwrap();
    listener.bind(handshake).unwrap();

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(listener.clone().serve(tcp, async move {
        let _ = shutdown_rx.await;
    }));

    Gateway {
        addr,
        listener,
        strict,
        resolver,
        shutdown: Some(shutdown_tx),
    }
}

async fn http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

fn http_status(err: WsError) -> u16 {
    match err {
        WsError::Http(response) => response.status().as_u16(),
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

async fn next_json<S>(ws: &mut S) -> serde_json::Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .expect("valid frame");
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn test_strict_endpoint_accepts_token_and_answers_ping() {
    let gw = start_gateway().await;
    let url = format!("ws://{}/websocket?access_token={}", gw.addr, token("alice"));

    let (mut ws, response) = connect_async(url).await.unwrap();
    assert_eq!(response.status().as_u16(), 101);

    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");

    let stats = gw.strict.registry().stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.unique_users, 1);
}

#[tokio::test]
async fn test_strict_endpoint_rejects_missing_token_with_401() {
    let gw = start_gateway().await;
    let err = connect_async(format!("ws://{}/websocket", gw.addr)).await.unwrap_err();
    assert_eq!(http_status(err), 401);
    assert!(gw.strict.registry().is_empty());
}

#[tokio::test]
async fn test_unclaimed_upgrade_path_gets_404() {
    let gw = start_gateway().await;
    let err = connect_async(format!("ws://{}/nowhere", gw.addr)).await.unwrap_err();
    assert_eq!(http_status(err), 404);
}

#[tokio::test]
async fn test_handshake_endpoint_on_same_listener() {
    let gw = start_gateway().await;
    let (mut ws, _) = connect_async(format!("ws://{}/handshake", gw.addr)).await.unwrap();

    let auth = format!(r#"{{"type":"auth","access_token":"{}"}}"#, token("bob"));
    ws.send(Message::Text(auth.into())).await.unwrap();

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "auth");
    assert_eq!(reply["user_id"], "bob");
}

#[tokio::test]
async fn test_duplicate_endpoint_refused() {
    let gw = start_gateway().await;
    let (dup, _rx) = UpgradeController::new(
        SocketConfig::new("/websocket", AuthMode::Public),
        gw.resolver.clone(),
        FilterPipeline::new(),
    );

    let err = gw.listener.bind(dup).unwrap_err();
    assert!(matches!(err, GatewayError::EndpointClaimed(ref e) if e == "/websocket"));
    assert_eq!(gw.listener.endpoints(), vec!["/websocket", "/handshake"]);
}

#[tokio::test]
async fn test_health_served_next_to_upgrades() {
    let gw = start_gateway().await;
    let response = http(
        gw.addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains(r#""status":"healthy""#));
    assert!(response.contains(r#""endpoint":"/websocket""#));
}

#[tokio::test]
async fn test_admin_terminate_requires_key_and_closes_connections() {
    let gw = start_gateway().await;
    let url = format!("ws://{}/websocket?access_token={}", gw.addr, token("carol"));
    let (mut ws, _) = connect_async(url).await.unwrap();

    // Registration completes before the acceptance is handed to the consumer
    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    next_json(&mut ws).await;
    assert_eq!(gw.strict.registry().len(), 1);

    let denied = http(
        gw.addr,
        "POST /admin/connections/terminate HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(denied.starts_with("HTTP/1.1 401"));
    assert_eq!(gw.strict.registry().len(), 1);

    let request = format!(
        "POST /admin/connections/terminate HTTP/1.1\r\nHost: localhost\r\nX-API-Key: {API_KEY}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    let allowed = http(gw.addr, &request).await;
    assert!(allowed.starts_with("HTTP/1.1 200 OK"));
    assert!(allowed.contains(r#"{"terminated":1}"#));
    assert!(gw.strict.registry().is_empty());

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("transport should close");
    assert!(!matches!(next, Some(Ok(Message::Close(_)))));
}
