//! HTTP implementations of the bridge and farmer seams
//!
//! Bridge requests are signed with the user's Ed25519 key over
//! `METHOD\nPATH\nBODY-OR-QUERY`. Farmer requests carry only the
//! bridge-issued token.

use crate::bridge::{Bridge, CreateFileRequest, FileInfo};
use crate::farmer::{FarmerClient, ProgressFn};
use crate::pointer::{Farmer, FarmerPointer, Operation, PointerRecord};
use crate::report::ExchangeRecord;
use bytes::{Bytes, BytesMut};
use ed25519_dalek::{Signer, SigningKey};
use futures::StreamExt;
use genaro_core::{GenaroError, Result, ShardHash, ShardMeta};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Upload body chunk size, also the granularity of upload progress
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Map a non-success bridge status; `fallback` covers statuses without a
/// dedicated kind
pub fn bridge_status_error(status: StatusCode, not_found: GenaroError, fallback: GenaroError) -> GenaroError {
    match status.as_u16() {
        401 | 403 => GenaroError::BridgeAuth,
        400 | 404 => not_found,
        420 | 429 => GenaroError::BridgeRateLimit,
        500 => GenaroError::BridgeInternal,
        _ => fallback,
    }
}

fn farmer_status_error(status: StatusCode) -> GenaroError {
    match status.as_u16() {
        401 | 403 => GenaroError::FarmerAuth,
        _ => GenaroError::FarmerRequest,
    }
}

/// Bridge client over HTTPS
pub struct HttpBridge {
    client: Client,
    base_url: Url,
    key: SigningKey,
}

impl HttpBridge {
    pub fn new(base_url: &str, key: SigningKey, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GenaroError::Configuration(format!("invalid bridge url: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenaroError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            key,
        })
    }

    /// Hex-encoded public key identifying this client
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GenaroError::Configuration("bridge url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Signature over `METHOD\nPATH\nBODY-OR-QUERY`, hex-encoded
    pub fn sign(&self, method: &Method, path: &str, payload: &str) -> String {
        let message = format!("{}\n{}\n{}", method.as_str(), path, payload);
        hex::encode(self.key.sign(message.as_bytes()).to_bytes())
    }

    async fn send(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> Result<Response> {
        let body = body.map(|b| b.to_string());
        let payload = match &body {
            Some(b) => b.clone(),
            None => url.query().unwrap_or_default().to_string(),
        };
        let signature = self.sign(&method, url.path(), &payload);

        let mut request = self
            .client
            .request(method, url)
            .header("x-signature", signature)
            .header("x-pubkey", self.public_key_hex());
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenaroError::BridgeTimeout
            } else {
                debug!(error = %e, "Bridge request failed");
                GenaroError::BridgeRequest
            }
        })
    }
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(|_| GenaroError::BridgeRequest)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Deserialize)]
struct IdResponse {
    id: Option<String>,
}

#[derive(Deserialize)]
struct OfferResponse {
    token: Option<String>,
    operation: Option<Operation>,
    farmer: Option<Farmer>,
}

#[async_trait::async_trait]
impl Bridge for HttpBridge {
    #[instrument(skip(self))]
    async fn get_file_info(&self, bucket_id: &str, file_id: &str) -> Result<FileInfo> {
        let url = self.url(&["buckets", bucket_id, "files", file_id, "info"])?;
        let response = self.send(Method::GET, url, None).await?;

        if !response.status().is_success() {
            return Err(bridge_status_error(
                response.status(),
                GenaroError::FileNotFound,
                GenaroError::BridgeFileInfo,
            ));
        }
        json_body(response).await
    }

    #[instrument(skip(self))]
    async fn get_pointers(
        &self,
        bucket_id: &str,
        file_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<PointerRecord>> {
        let mut url = self.url(&["buckets", bucket_id, "files", file_id])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("skip", &skip.to_string());

        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(bridge_status_error(
                response.status(),
                GenaroError::FileNotFound,
                GenaroError::BridgePointer,
            ));
        }
        json_body(response).await
    }

    #[instrument(skip(self))]
    async fn replace_pointer(
        &self,
        bucket_id: &str,
        file_id: &str,
        index: usize,
        excluded: &[String],
    ) -> Result<PointerRecord> {
        let mut url = self.url(&["buckets", bucket_id, "files", file_id])?;
        url.query_pairs_mut()
            .append_pair("limit", "1")
            .append_pair("skip", &index.to_string())
            .append_pair("exclude", &excluded.join(","));

        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(bridge_status_error(
                response.status(),
                GenaroError::FileNotFound,
                GenaroError::BridgeReplacePointer,
            ));
        }

        let records: Vec<PointerRecord> = json_body(response).await?;
        records
            .into_iter()
            .find(|r| r.index == index)
            .ok_or(GenaroError::BridgeReplacePointer)
    }

    #[instrument(skip(self))]
    async fn file_exists(&self, bucket_id: &str, file_name: &str) -> Result<bool> {
        let url = self.url(&["buckets", bucket_id, "file-ids", file_name])?;
        let response = self.send(Method::GET, url, None).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(bridge_status_error(
                status,
                GenaroError::BucketNotFound,
                GenaroError::BridgeRequest,
            )),
        }
    }

    #[instrument(skip(self))]
    async fn create_frame(&self) -> Result<String> {
        let url = self.url(&["frames"])?;
        let response = self.send(Method::POST, url, Some(json!({}))).await?;

        if !response.status().is_success() {
            return Err(bridge_status_error(
                response.status(),
                GenaroError::BridgeFrame,
                GenaroError::BridgeFrame,
            ));
        }
        let frame: IdResponse = json_body(response).await?;
        frame.id.ok_or(GenaroError::BridgeFrame)
    }

    #[instrument(skip(self, shard), fields(index = shard.index))]
    async fn add_shard_to_frame(
        &self,
        frame_id: &str,
        shard: &ShardMeta,
        excluded: &[String],
    ) -> Result<FarmerPointer> {
        let url = self.url(&["frames", frame_id])?;
        let body = json!({
            "hash": shard.hash.to_hex(),
            "size": shard.size,
            "index": shard.index,
            "parity": shard.is_parity,
            "challenges": shard.challenges_as_str,
            "tree": shard.tree,
            "exclude": excluded,
        });

        let response = self.send(Method::PUT, url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(bridge_status_error(
                response.status(),
                GenaroError::BridgeFrame,
                GenaroError::BridgeOffer,
            ));
        }

        let offer: OfferResponse = json_body(response).await?;
        match (offer.token, offer.farmer) {
            (Some(token), Some(farmer)) => Ok(FarmerPointer {
                token,
                operation: offer.operation.unwrap_or(Operation::Push),
                farmer,
            }),
            _ => Err(GenaroError::BridgeOffer),
        }
    }

    #[instrument(skip(self, request), fields(frame = %request.frame_id))]
    async fn create_file(&self, request: &CreateFileRequest) -> Result<String> {
        let url = self.url(&["buckets", &request.bucket_id, "files"])?;
        let mut body = json!({
            "frame": request.frame_id,
            "filename": request.filename,
            "size": request.size,
            "index": request.index,
        });
        if let Some(erasure) = &request.erasure {
            body["erasure"] = json!({ "type": erasure });
        }

        let response = self.send(Method::POST, url, Some(body)).await?;
        match response.status() {
            StatusCode::CONFLICT => Err(GenaroError::FileAlreadyExists),
            status if status.is_success() => {
                let file: IdResponse = json_body(response).await?;
                file.id.ok_or(GenaroError::BridgeJson)
            }
            status => Err(bridge_status_error(
                status,
                GenaroError::BucketNotFound,
                GenaroError::BridgeRequest,
            )),
        }
    }

    async fn send_exchange_report(&self, record: &ExchangeRecord) -> Result<()> {
        let url = self.url(&["reports", "exchanges"])?;
        let client_id = self.public_key_hex();
        let body = json!({
            "dataHash": record.data_hash,
            "reporterId": client_id,
            "farmerId": record.farmer_id,
            "clientId": client_id,
            "exchangeStart": record.report.start,
            "exchangeEnd": record.report.end,
            "exchangeResultCode": record.report.code,
            "exchangeResultMessage": record.report.message,
        });

        let response = self.send(Method::POST, url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(bridge_status_error(
                response.status(),
                GenaroError::BridgeRequest,
                GenaroError::BridgeRequest,
            ));
        }
        Ok(())
    }
}

/// Farmer client over plain HTTP
#[derive(Clone)]
pub struct HttpFarmerClient {
    client: Client,
}

impl HttpFarmerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenaroError::Configuration(e.to_string()))?;
        Ok(Self { client })
    }

    fn shard_url(farmer: &Farmer, hash: &ShardHash, token: &str) -> Result<Url> {
        let mut url = Url::parse(&farmer.base_url()).map_err(|_| GenaroError::FarmerRequest)?;
        url.set_path(&format!("/shards/{}", hash.to_hex()));
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

fn farmer_send_error(e: reqwest::Error) -> GenaroError {
    if e.is_timeout() {
        GenaroError::FarmerTimeout
    } else {
        GenaroError::FarmerRequest
    }
}

#[async_trait::async_trait]
impl FarmerClient for HttpFarmerClient {
    #[instrument(skip(self, token, progress), fields(farmer = %farmer.node_id, hash = %hash))]
    async fn download_shard(
        &self,
        farmer: &Farmer,
        hash: &ShardHash,
        token: &str,
        size: u64,
        progress: ProgressFn,
    ) -> Result<Bytes> {
        let url = Self::shard_url(farmer, hash, token)?;
        let response = self.client.get(url).send().await.map_err(farmer_send_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Farmer rejected shard download");
            return Err(farmer_status_error(response.status()));
        }

        let announced = response.content_length().unwrap_or(size);
        if announced > size {
            warn!(announced, expected = size, "Farmer announced an oversized shard");
            return Err(GenaroError::FarmerIntegrity);
        }

        let limit = usize::try_from(size).map_err(|_| GenaroError::FarmerIntegrity)?;
        let mut data = BytesMut::with_capacity(announced as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(farmer_send_error)?;
            if data.len() + chunk.len() > limit {
                warn!(expected = size, "Farmer sent more than the shard size");
                return Err(GenaroError::FarmerIntegrity);
            }
            data.extend_from_slice(&chunk);
            progress(data.len() as u64);
        }
        Ok(data.freeze())
    }

    #[instrument(skip(self, token, data, progress), fields(farmer = %farmer.node_id, hash = %hash, size = data.len()))]
    async fn upload_shard(
        &self,
        farmer: &Farmer,
        hash: &ShardHash,
        token: &str,
        data: Bytes,
        progress: ProgressFn,
    ) -> Result<()> {
        let url = Self::shard_url(farmer, hash, token)?;

        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
            .collect();
        let mut sent = 0u64;
        let body = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent);
            Ok::<_, std::io::Error>(chunk)
        });

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(farmer_send_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Farmer rejected shard upload");
            return Err(farmer_status_error(response.status()));
        }
        Ok(())
    }
}
