//! HTTP client for a BWS-style remote wallet service.
//!
//! [`HttpWalletService`] creates and imports wallets; every import produces a
//! new [`HttpWalletClient`] bound to one wallet's credentials. Clients share
//! the connection pool but no credential state.
//!
//! Read-only requests are retried on transient failures. Requests that change
//! remote state are sent exactly once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::signer;
use crate::domain::{
    AppError, Balance, CreateWalletRequest, Network, PendingWallet, ProposalId,
    RemoteServiceError, RemoteWalletClient, RemoteWalletService, TransactionOutput,
    TransactionRecord, ValidationError, WalletId, WalletStatus,
};

/// Configuration for the wallet service client
#[derive(Debug, Clone)]
pub struct HttpWalletConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Extra attempts for read-only requests
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for HttpWalletConfig {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_WALLET_SERVICE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Credentials a client signs with.
struct Identity {
    copayer_id: String,
    request_key: SecretString,
}

/// Serialized form of a wallet client. Only ever held inside a [`SecretString`].
#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    wallet_id: WalletId,
    copayer_id: String,
    request_key: String,
    network: Network,
    wallet_name: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

/// Shared transport: base URL, connection pool and retry policy.
struct WalletApi {
    http: Client,
    config: HttpWalletConfig,
}

impl WalletApi {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Read-only request, retried on transient failures.
    async fn get<R: DeserializeOwned>(
        &self,
        identity: Option<&Identity>,
        path: &str,
    ) -> Result<R, AppError> {
        let mut attempt = 0;
        loop {
            match self.send(identity, Method::GET, path, None).await {
                Ok(value) => return Ok(serde_json::from_value(value).map_err(invalid_response)?),
                Err(e) if attempt < self.config.max_retries && is_transient(&e) => {
                    attempt += 1;
                    warn!(attempt, path, error = %e, "Wallet service read failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// State-changing request. Never retried.
    async fn post<R: DeserializeOwned>(
        &self,
        identity: Option<&Identity>,
        path: &str,
        body: Value,
    ) -> Result<R, AppError> {
        let value = self.send(identity, Method::POST, path, Some(body)).await?;
        serde_json::from_value(value).map_err(invalid_response)
    }

    async fn send(
        &self,
        identity: Option<&Identity>,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AppError> {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(identity) = identity {
            let message = signer::request_message(method.as_str(), path, &body);
            let signature = signer::sign(&identity.request_key, message.as_bytes())?;
            request = request
                .header("x-identity", &identity.copayer_id)
                .header("x-signature", signature);
        }
        if method != Method::GET {
            request = request.body(body);
        }

        debug!(method = %method, path, "Wallet service request");
        let response = request.send().await.map_err(RemoteServiceError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(RemoteServiceError::from)?;

        if !status.is_success() {
            return Err(error_from_status(status, &text).into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(invalid_response)
    }
}

fn invalid_response(e: serde_json::Error) -> AppError {
    RemoteServiceError::InvalidResponse(e.to_string()).into()
}

fn is_transient(err: &AppError) -> bool {
    matches!(
        err,
        AppError::RemoteService(
            RemoteServiceError::Connection(_)
                | RemoteServiceError::Timeout(_)
                | RemoteServiceError::Unavailable(_)
        )
    )
}

/// Maps a non-success response to the error taxonomy.
fn error_from_status(status: StatusCode, body: &str) -> RemoteServiceError {
    let parsed: Option<ApiError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code.clone()).unwrap_or_default();
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.chars().take(200).collect());

    if code == "INSUFFICIENT_FUNDS" {
        return RemoteServiceError::InsufficientFunds;
    }
    match status {
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
            RemoteServiceError::Timeout(format!("{status}: {message}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            RemoteServiceError::Unavailable(format!("{status}: {message}"))
        }
        s if s.is_server_error() => RemoteServiceError::Unavailable(format!("{status}: {message}")),
        _ if code.is_empty() => RemoteServiceError::Rejected(format!("{status}: {message}")),
        _ => RemoteServiceError::Rejected(format!("{code}: {message}")),
    }
}

/// Factory for wallet clients backed by the HTTP API.
pub struct HttpWalletService {
    api: Arc<WalletApi>,
}

impl HttpWalletService {
    pub fn new(config: HttpWalletConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::RemoteService(RemoteServiceError::Connection(e.to_string())))?;
        info!(base_url = %config.base_url, "Created wallet service client");
        Ok(Self {
            api: Arc::new(WalletApi { http, config }),
        })
    }

    pub fn with_defaults(base_url: &str) -> Result<Self, AppError> {
        Self::new(HttpWalletConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    fn client(&self, credentials: StoredCredentials) -> HttpWalletClient {
        HttpWalletClient {
            api: Arc::clone(&self.api),
            wallet_id: credentials.wallet_id,
            network: credentials.network,
            wallet_name: credentials.wallet_name,
            identity: Identity {
                copayer_id: credentials.copayer_id,
                request_key: SecretString::from(credentials.request_key),
            },
        }
    }
}

/// Join secret format: `<wallet id>:<base58 wallet key>:<network>`.
fn encode_join_secret(wallet_id: &str, wallet_key: &SecretString, network: Network) -> SecretString {
    SecretString::from(format!(
        "{wallet_id}:{}:{network}",
        wallet_key.expose_secret()
    ))
}

fn decode_join_secret(secret: &SecretString) -> Result<(WalletId, SecretString), AppError> {
    let mut parts = secret.expose_secret().splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(wallet_id), Some(key), Some(_network)) if !wallet_id.is_empty() && !key.is_empty() => {
            Ok((wallet_id.to_string(), SecretString::from(key.to_string())))
        }
        _ => Err(ValidationError::InvalidFormat("malformed join secret".to_string()).into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletResponse {
    wallet_id: WalletId,
}

#[async_trait]
impl RemoteWalletService for HttpWalletService {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _: Value = self.api.get(None, "/v1/version/").await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(name = %request.name, network = %request.network))]
    async fn create_wallet(
        &self,
        request: &CreateWalletRequest,
    ) -> Result<PendingWallet, AppError> {
        let wallet_key = signer::generate_key();
        let created: CreateWalletResponse = self
            .api
            .post(
                None,
                "/v2/wallets/",
                json!({
                    "name": request.name,
                    "m": request.required_signers,
                    "n": request.total_signers,
                    "pubKey": signer::public_key(&wallet_key)?,
                    "network": network_param(request.network),
                    "ownerEmail": request.owner_email,
                }),
            )
            .await?;

        let request_key = signer::generate_key();
        let copayer_id = signer::copayer_id(&signer::public_key(&request_key)?);
        info!(wallet_id = %created.wallet_id, "Remote wallet created");

        let client = self.client(StoredCredentials {
            wallet_id: created.wallet_id.clone(),
            copayer_id,
            request_key: request_key.expose_secret().to_string(),
            network: request.network,
            wallet_name: request.name.clone(),
        });
        Ok(PendingWallet {
            secret: encode_join_secret(&created.wallet_id, &wallet_key, request.network),
            client: Arc::new(client),
        })
    }

    async fn import_wallet(
        &self,
        credentials: &SecretString,
    ) -> Result<Arc<dyn RemoteWalletClient>, AppError> {
        let stored: StoredCredentials = serde_json::from_str(credentials.expose_secret())
            .map_err(|e| ValidationError::InvalidFormat(format!("credentials blob: {e}")))?;
        // fails early on a corrupted key
        signer::public_key(&SecretString::from(stored.request_key.clone()))?;
        Ok(Arc::new(self.client(stored)))
    }
}

fn network_param(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "livenet",
        Network::Testnet => "testnet",
    }
}

/// A client bound to one wallet's credentials.
pub struct HttpWalletClient {
    api: Arc<WalletApi>,
    wallet_id: WalletId,
    network: Network,
    wallet_name: String,
    identity: Identity,
}

#[derive(Deserialize)]
struct WalletStatusEnvelope {
    wallet: RemoteWallet,
}

#[derive(Deserialize)]
struct RemoteWallet {
    id: Option<WalletId>,
    status: String,
    m: u8,
    #[serde(default)]
    copayers: Vec<Value>,
}

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    total_amount: u64,
    locked_amount: u64,
    available_amount: u64,
}

#[derive(Deserialize)]
struct HistoryEntry {
    txid: String,
    action: String,
    amount: u64,
    fees: Option<u64>,
    #[serde(default)]
    confirmations: u64,
    /// Unix seconds
    time: Option<i64>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ProposalResponse {
    id: ProposalId,
}

#[derive(Deserialize)]
struct BroadcastResponse {
    txid: String,
}

impl HttpWalletClient {
    #[must_use]
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }
}

#[async_trait]
impl RemoteWalletClient for HttpWalletClient {
    #[instrument(skip(self, secret), fields(wallet_id = %self.wallet_id))]
    async fn join_wallet(
        &self,
        secret: &SecretString,
        copayer_name: &str,
    ) -> Result<(), AppError> {
        let (wallet_id, wallet_key) = decode_join_secret(secret)?;
        let request_pub_key = signer::public_key(&self.identity.request_key)?;
        let copayer_signature = signer::sign(
            &wallet_key,
            format!("{copayer_name}|{request_pub_key}").as_bytes(),
        )?;

        let _: Value = self
            .api
            .post(
                None,
                &format!("/v2/wallets/{wallet_id}/copayers"),
                json!({
                    "name": copayer_name,
                    "requestPubKey": request_pub_key,
                    "copayerSignature": copayer_signature,
                }),
            )
            .await?;
        Ok(())
    }

    async fn wallet_status(&self) -> Result<WalletStatus, AppError> {
        let envelope: WalletStatusEnvelope =
            self.api.get(Some(&self.identity), "/v3/wallets/").await?;
        let wallet = envelope.wallet;
        let joined = u8::try_from(wallet.copayers.len()).unwrap_or(u8::MAX);
        Ok(WalletStatus {
            wallet_id: wallet.id.or_else(|| Some(self.wallet_id.clone())),
            complete: wallet.status == "complete",
            copayers_joined: joined,
            copayers_required: wallet.m,
        })
    }

    async fn create_address(&self) -> Result<String, AppError> {
        let created: AddressResponse = self
            .api
            .post(Some(&self.identity), "/v4/addresses/", json!({}))
            .await?;
        Ok(created.address)
    }

    fn export_credentials(&self) -> Result<SecretString, AppError> {
        let stored = StoredCredentials {
            wallet_id: self.wallet_id.clone(),
            copayer_id: self.identity.copayer_id.clone(),
            request_key: self.identity.request_key.expose_secret().to_string(),
            network: self.network,
            wallet_name: self.wallet_name.clone(),
        };
        Ok(SecretString::from(serde_json::to_string(&stored)?))
    }

    async fn balance(&self) -> Result<Balance, AppError> {
        let balance: BalanceResponse = self.api.get(Some(&self.identity), "/v1/balance/").await?;
        Ok(Balance {
            total: balance.total_amount,
            locked: balance.locked_amount,
            available: balance.available_amount,
        })
    }

    async fn transaction_history(&self) -> Result<Vec<TransactionRecord>, AppError> {
        let entries: Vec<HistoryEntry> =
            self.api.get(Some(&self.identity), "/v1/txhistory/").await?;
        Ok(entries
            .into_iter()
            .map(|e| TransactionRecord {
                txid: e.txid,
                action: e.action,
                amount: e.amount,
                fees: e.fees,
                confirmations: e.confirmations,
                time: e.time.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
                message: e.message,
            })
            .collect())
    }

    #[instrument(skip(self, outputs, message), fields(wallet_id = %self.wallet_id, outputs = outputs.len()))]
    async fn create_proposal(
        &self,
        outputs: &[TransactionOutput],
        message: Option<&str>,
    ) -> Result<ProposalId, AppError> {
        let outputs: Vec<Value> = outputs
            .iter()
            .map(|o| json!({ "toAddress": o.destination_address, "amount": o.amount }))
            .collect();
        let created: ProposalResponse = self
            .api
            .post(
                Some(&self.identity),
                "/v3/txproposals/",
                json!({ "outputs": outputs, "message": message, "feeLevel": "normal" }),
            )
            .await?;
        Ok(created.id)
    }

    async fn publish_proposal(&self, proposal_id: &str) -> Result<(), AppError> {
        let _: Value = self
            .api
            .post(
                Some(&self.identity),
                &format!("/v2/txproposals/{proposal_id}/publish/"),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn sign_proposal(&self, proposal_id: &str) -> Result<(), AppError> {
        let _: Value = self
            .api
            .post(
                Some(&self.identity),
                &format!("/v1/txproposals/{proposal_id}/signatures/"),
                json!({}),
            )
            .await?;
        Ok(())
    }

    async fn broadcast_proposal(&self, proposal_id: &str) -> Result<String, AppError> {
        let broadcast: BroadcastResponse = self
            .api
            .post(
                Some(&self.identity),
                &format!("/v1/txproposals/{proposal_id}/broadcast/"),
                json!({}),
            )
            .await?;
        Ok(broadcast.txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn service(base_url: &str) -> HttpWalletService {
        HttpWalletService::new(HttpWalletConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        })
        .unwrap()
    }

    fn credentials() -> SecretString {
        let request_key = signer::generate_key();
        let copayer_id = signer::copayer_id(&signer::public_key(&request_key).unwrap());
        SecretString::from(
            json!({
                "wallet_id": "w-1",
                "copayer_id": copayer_id,
                "request_key": request_key.expose_secret(),
                "network": "testnet",
                "wallet_name": "Personal Wallet",
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_import_rejects_corrupt_blob() {
        let service = service("http://127.0.0.1:9");
        let err = service
            .import_wallet(&SecretString::from("{not json"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation(_)));

        let bad_key = SecretString::from(
            json!({
                "wallet_id": "w-1", "copayer_id": "c", "request_key": "0OIl",
                "network": "testnet", "wallet_name": "x"
            })
            .to_string(),
        );
        assert!(service.import_wallet(&bad_key).await.is_err());
    }

    #[tokio::test]
    async fn test_export_round_trips_through_import() {
        let service = service("http://127.0.0.1:9");
        let blob = credentials();

        let client = service.import_wallet(&blob).await.unwrap();
        let exported = client.export_credentials().unwrap();

        let original: Value = serde_json::from_str(blob.expose_secret()).unwrap();
        let round_tripped: Value = serde_json::from_str(exported.expose_secret()).unwrap();
        assert_eq!(original, round_tripped);
    }

    #[tokio::test]
    async fn test_balance_request_is_signed() {
        let mut server = Server::new_async().await;
        let blob = credentials();
        let stored: Value = serde_json::from_str(blob.expose_secret()).unwrap();
        let copayer = stored["copayer_id"].as_str().unwrap().to_string();

        let mock = server
            .mock("GET", "/v1/balance/")
            .match_header("x-identity", copayer.as_str())
            .match_header("x-signature", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"totalAmount":150,"lockedAmount":50,"availableAmount":100}"#)
            .create_async()
            .await;

        let client = service(&server.url()).import_wallet(&blob).await.unwrap();
        let balance = client.balance().await.unwrap();

        assert_eq!(
            balance,
            Balance {
                total: 150,
                locked: 50,
                available: 100
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reads_are_retried_on_unavailable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/txhistory/")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = service(&server.url())
            .import_wallet(&credentials())
            .await
            .unwrap();
        let err = client.transaction_history().await.unwrap_err();

        assert!(matches!(
            err,
            AppError::RemoteService(RemoteServiceError::Unavailable(_))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_state_changing_calls_are_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/txproposals/p-1/publish/")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let client = service(&server.url())
            .import_wallet(&credentials())
            .await
            .unwrap();
        assert!(client.publish_proposal("p-1").await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_mapped() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v3/txproposals/")
            .with_status(400)
            .with_body(r#"{"code":"INSUFFICIENT_FUNDS","message":"Insufficient funds"}"#)
            .create_async()
            .await;

        let client = service(&server.url())
            .import_wallet(&credentials())
            .await
            .unwrap();
        let err = client
            .create_proposal(&[TransactionOutput::new(100_000, "addr1")], None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::RemoteService(RemoteServiceError::InsufficientFunds)
        ));
    }

    #[tokio::test]
    async fn test_create_and_join_wallet() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v2/wallets/")
            .with_status(200)
            .with_body(r#"{"walletId":"w-new"}"#)
            .create_async()
            .await;
        let join = server
            .mock("POST", "/v2/wallets/w-new/copayers")
            .match_body(Matcher::PartialJson(json!({ "name": "custodian" })))
            .with_status(200)
            .with_body(r#"{"copayerId":"c-1","wallet":{}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v3/wallets/")
            .with_status(200)
            .with_body(r#"{"wallet":{"id":"w-new","status":"complete","m":1,"n":1,"copayers":[{}]}}"#)
            .create_async()
            .await;

        let service = service(&server.url());
        let pending = service
            .create_wallet(&CreateWalletRequest {
                name: "Personal Wallet".to_string(),
                owner_email: "a@b.com".to_string(),
                required_signers: 1,
                total_signers: 1,
                network: Network::Testnet,
            })
            .await
            .unwrap();
        pending
            .client
            .join_wallet(&pending.secret, "custodian")
            .await
            .unwrap();
        let status = pending.client.wallet_status().await.unwrap();

        assert!(status.complete);
        assert_eq!(status.wallet_id.as_deref(), Some("w-new"));
        assert_eq!(status.copayers_joined, 1);
        join.assert_async().await;
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            error_from_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            RemoteServiceError::Unavailable(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::GATEWAY_TIMEOUT, ""),
            RemoteServiceError::Timeout(_)
        ));
        assert!(matches!(
            error_from_status(
                StatusCode::BAD_REQUEST,
                r#"{"code":"TX_NOT_PENDING","message":"not pending"}"#
            ),
            RemoteServiceError::Rejected(msg) if msg == "TX_NOT_PENDING: not pending"
        ));
    }

    #[test]
    fn test_join_secret_round_trip() {
        let key = signer::generate_key();
        let secret = encode_join_secret("w-1", &key, Network::Testnet);
        let (wallet_id, decoded) = decode_join_secret(&secret).unwrap();

        assert_eq!(wallet_id, "w-1");
        assert_eq!(decoded.expose_secret(), key.expose_secret());
        assert!(decode_join_secret(&SecretString::from("garbage")).is_err());
    }
}
