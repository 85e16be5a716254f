//! HTTP farmer and bridge clients against a local axum server
//!
//! Run with: cargo test -p genaro-transfer --test http

use axum::body::Bytes as BodyBytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use genaro_core::{GenaroError, ShardHash};
use genaro_transfer::{
    no_progress, Bridge, Farmer, FarmerClient, HttpBridge, HttpFarmerClient, ProgressFn,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const TOKEN: &str = "secret";

type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

async fn get_shard(
    State(store): State<Store>,
    Path(hash): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Vec<u8>, StatusCode> {
    if query.token != TOKEN {
        return Err(StatusCode::UNAUTHORIZED);
    }
    store
        .lock()
        .unwrap()
        .get(&hash)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_shard(
    State(store): State<Store>,
    Path(hash): Path<String>,
    Query(query): Query<TokenQuery>,
    body: BodyBytes,
) -> StatusCode {
    if query.token != TOKEN {
        return StatusCode::UNAUTHORIZED;
    }
    store.lock().unwrap().insert(hash, body.to_vec());
    StatusCode::OK
}

/// Serve `router` on an ephemeral port
async fn serve(router: Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}

async fn farmer_server() -> (Farmer, Store) {
    let store: Store = Arc::default();
    let router = Router::new()
        .route("/shards/:hash", get(get_shard).post(put_shard))
        .with_state(store.clone());
    let port = serve(router).await;
    (Farmer::new("127.0.0.1", port, "local-node"), store)
}

fn client() -> HttpFarmerClient {
    HttpFarmerClient::new(Duration::from_secs(10)).unwrap()
}

#[tokio::test]
async fn test_farmer_upload_then_download() {
    let (farmer, store) = farmer_server().await;
    let data = Bytes::from((0..100_000u32).map(|i| (i % 253) as u8).collect::<Vec<_>>());
    let hash = ShardHash::compute(&data);

    let sent = Arc::new(AtomicU64::new(0));
    let progress: ProgressFn = {
        let sent = sent.clone();
        Arc::new(move |bytes| {
            sent.fetch_max(bytes, Ordering::Relaxed);
        })
    };
    client()
        .upload_shard(&farmer, &hash, TOKEN, data.clone(), progress)
        .await
        .unwrap();
    assert_eq!(sent.load(Ordering::Relaxed), data.len() as u64);
    assert_eq!(store.lock().unwrap()[&hash.to_hex()], data.to_vec());

    let received = Arc::new(AtomicU64::new(0));
    let progress: ProgressFn = {
        let received = received.clone();
        Arc::new(move |bytes| {
            received.fetch_max(bytes, Ordering::Relaxed);
        })
    };
    let fetched = client()
        .download_shard(&farmer, &hash, TOKEN, data.len() as u64, progress)
        .await
        .unwrap();
    assert_eq!(fetched, data);
    assert_eq!(received.load(Ordering::Relaxed), data.len() as u64);
}

#[tokio::test]
async fn test_farmer_rejects_bad_token() {
    let (farmer, _) = farmer_server().await;
    let hash = ShardHash::compute(b"x");

    let result = client()
        .download_shard(&farmer, &hash, "wrong", 1, no_progress())
        .await;
    assert!(matches!(result, Err(GenaroError::FarmerAuth)));

    let result = client()
        .upload_shard(&farmer, &hash, "wrong", Bytes::from_static(b"x"), no_progress())
        .await;
    assert!(matches!(result, Err(GenaroError::FarmerAuth)));
}

#[tokio::test]
async fn test_farmer_unknown_shard() {
    let (farmer, _) = farmer_server().await;
    let result = client()
        .download_shard(&farmer, &ShardHash::compute(b"absent"), TOKEN, 6, no_progress())
        .await;
    assert!(matches!(result, Err(GenaroError::FarmerRequest)));
}

#[tokio::test]
async fn test_unreachable_farmer() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let farmer = Farmer::new("127.0.0.1", port, "gone");
    let result = client()
        .download_shard(&farmer, &ShardHash::compute(b"x"), TOKEN, 1, no_progress())
        .await;
    assert!(matches!(result, Err(GenaroError::FarmerRequest)));
}

/// Farmer answering every connection with the raw HTTP `response`
async fn raw_farmer(response: &'static [u8]) -> Farmer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        }
    });
    Farmer::new("127.0.0.1", port, "raw-node")
}

#[tokio::test]
async fn test_farmer_announcing_huge_shard() {
    let farmer =
        raw_farmer(b"HTTP/1.1 200 OK\r\nContent-Length: 9223372036854775808\r\n\r\nabc").await;
    let result = client()
        .download_shard(&farmer, &ShardHash::compute(b"abc"), TOKEN, 3, no_progress())
        .await;
    assert!(matches!(result, Err(GenaroError::FarmerIntegrity)));
}

#[tokio::test]
async fn test_farmer_streaming_past_shard_size() {
    let farmer = raw_farmer(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n0\r\n\r\n",
    )
    .await;
    let result = client()
        .download_shard(&farmer, &ShardHash::compute(b"0123"), TOKEN, 4, no_progress())
        .await;
    assert!(matches!(result, Err(GenaroError::FarmerIntegrity)));
}

#[derive(Deserialize)]
struct PageQuery {
    limit: usize,
    skip: usize,
    exclude: Option<String>,
}

fn pointer_json(index: usize) -> Value {
    json!({
        "index": index,
        "hash": ShardHash::compute(index.to_string().as_bytes()).to_hex(),
        "size": 100,
        "parity": false,
        "token": "t",
        "operation": "PULL",
        "farmer": { "address": "10.0.0.1", "port": 4000, "nodeID": format!("node-{index}") }
    })
}

async fn pointer_page(
    headers: HeaderMap,
    Path((_bucket, _file)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, StatusCode> {
    if !headers.contains_key("x-signature") || !headers.contains_key("x-pubkey") {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if let Some(exclude) = page.exclude {
        // Replacement request: never hand back an excluded node
        let index = page.skip;
        let mut pointer = pointer_json(index);
        if exclude.split(',').any(|n| n == format!("node-{index}")) {
            pointer["farmer"]["nodeID"] = json!("node-spare");
        }
        return Ok(Json(json!([pointer])));
    }
    let pointers: Vec<Value> = (page.skip..7).take(page.limit).map(pointer_json).collect();
    Ok(Json(Value::Array(pointers)))
}

async fn file_id(Path((_bucket, name)): Path<(String, String)>) -> StatusCode {
    if name == "taken name.txt" {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn bridge_server() -> HttpBridge {
    let router = Router::new()
        .route("/buckets/:bucket/files/:file", get(pointer_page))
        .route("/buckets/:bucket/file-ids/:name", get(file_id))
        .route(
            "/buckets/:bucket/files/:file/info",
            get(|| async { StatusCode::TOO_MANY_REQUESTS }),
        );
    let port = serve(router).await;
    HttpBridge::new(
        &format!("http://127.0.0.1:{port}"),
        SigningKey::from_bytes(&[9u8; 32]),
        Duration::from_secs(10),
    )
    .unwrap()
}

#[tokio::test]
async fn test_bridge_pagination_over_http() {
    let bridge = bridge_server().await;
    let config = genaro_transfer::TransferConfig::default();
    let pointers = genaro_transfer::resolve_pointers(&bridge, "b", "f", &config)
        .await
        .unwrap();
    assert_eq!(pointers.len(), 7);
    assert!(pointers.iter().enumerate().all(|(i, p)| p.index == i));
}

#[tokio::test]
async fn test_bridge_replace_pointer_excludes() {
    let bridge = bridge_server().await;
    let record = bridge
        .replace_pointer("b", "f", 2, &["node-2".to_string()])
        .await
        .unwrap();
    assert_eq!(record.index, 2);
    assert_eq!(
        record.farmer.map(|f| f.node_id),
        Some("node-spare".to_string())
    );
}

#[tokio::test]
async fn test_bridge_file_exists() {
    let bridge = bridge_server().await;
    assert!(bridge.file_exists("b", "taken name.txt").await.unwrap());
    assert!(!bridge.file_exists("b", "free.txt").await.unwrap());
}

#[tokio::test]
async fn test_bridge_rate_limit_status() {
    let bridge = bridge_server().await;
    let result = bridge.get_file_info("b", "f").await;
    assert!(matches!(result, Err(GenaroError::BridgeRateLimit)));
}
