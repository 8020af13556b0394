//! JSON-over-HTTP node client.

use super::types::{AccountResponse, SubmitTransactionRequest, SubmitTransactionResponse};
use super::{AccountState, NodeClient, NodeError, SubmitError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use txbench_types::{MempoolTransaction, PublicKey, SignedTransaction, TxHash};

/// Node client speaking the `/api/v1` JSON API.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNodeClient {
    /// Create a client without a request timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a client whose requests fail after `timeout`.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_transactions(&self, path: &str) -> Result<Vec<MempoolTransaction>, NodeError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| NodeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError> {
        let request = SubmitTransactionRequest {
            transaction: tx.clone(),
        };

        let response = self
            .client
            .post(self.url("/api/v1/transactions"))
            .json(&request)
            .send()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        let status = response.status();
        match response.json::<SubmitTransactionResponse>().await {
            Ok(body) => body.into_result(tx.intent.nonce, &tx.hash),
            Err(e) if status.is_success() => {
                debug!(error = %e, "Unparseable submission response");
                Err(SubmitError::Transport(format!("invalid response body: {e}")))
            }
            Err(_) => Err(SubmitError::Transport(format!("HTTP {status}"))),
        }
    }

    async fn pending_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError> {
        self.get_transactions("/api/v1/mempool").await
    }

    async fn included_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError> {
        self.get_transactions("/api/v1/transactions/included").await
    }

    async fn account(&self, public_key: &PublicKey) -> Result<AccountState, NodeError> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/accounts/{}", public_key)))
            .send()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(NodeError::UnknownAccount(public_key.clone()));
        }

        let body: AccountResponse = response
            .error_for_status()
            .map_err(|e| NodeError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| NodeError::InvalidResponse(e.to_string()))?;

        Ok(AccountState {
            balance: body.balance,
            nonce: body.nonce,
        })
    }

    async fn is_ready(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use txbench_types::{Amount, TransactionIntent};

    fn signed(nonce: u64) -> SignedTransaction {
        SignedTransaction {
            intent: TransactionIntent {
                batch: 0,
                sender: PublicKey::new("alice"),
                receiver: PublicKey::new("bob"),
                amount: Amount::from_nano(10),
                fee: Amount::from_nano(1),
                nonce,
                memo: None,
                created_at_ms: 0,
            },
            signature: "sig".into(),
            hash: TxHash::new(format!("local-{nonce}")),
        }
    }

    async fn submit(Json(req): Json<SubmitTransactionRequest>) -> Json<SubmitTransactionResponse> {
        let nonce = req.transaction.intent.nonce;
        if nonce < 5 {
            Json(SubmitTransactionResponse {
                accepted: false,
                hash: None,
                error: Some("nonce too low".into()),
                expected_nonce: Some(5),
            })
        } else {
            Json(SubmitTransactionResponse {
                accepted: true,
                hash: Some(format!("node-{nonce}")),
                error: None,
                expected_nonce: None,
            })
        }
    }

    async fn account(Path(pk): Path<String>) -> Result<Json<AccountResponse>, AxumStatus> {
        if pk == "alice" {
            Ok(Json(AccountResponse {
                balance: Amount::from_tokens(3),
                nonce: 5,
            }))
        } else {
            Err(AxumStatus::NOT_FOUND)
        }
    }

    async fn mempool() -> Json<Vec<MempoolTransaction>> {
        Json(vec![MempoolTransaction {
            hash: TxHash::new("node-5"),
            sender: PublicKey::new("alice"),
            receiver: PublicKey::new("bob"),
            amount: Amount::from_nano(10),
            fee: Amount::from_nano(1),
            nonce: 5,
            memo: None,
        }])
    }

    async fn spawn_node() -> HttpNodeClient {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/v1/transactions", post(submit))
            .route("/api/v1/transactions/included", get(|| async { Json(Vec::<MempoolTransaction>::new()) }))
            .route("/api/v1/mempool", get(mempool))
            .route("/api/v1/accounts/{pk}", get(account));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        HttpNodeClient::new(format!("http://{}/", addr))
    }

    #[tokio::test]
    async fn test_submit_accepted_and_stale() {
        let client = spawn_node().await;

        let hash = client.submit_transaction(&signed(5)).await.unwrap();
        assert_eq!(hash, TxHash::new("node-5"));

        let err = client.submit_transaction(&signed(2)).await.unwrap_err();
        assert_eq!(
            err,
            SubmitError::StaleSequence {
                expected: Some(5),
                got: 2
            }
        );
    }

    #[tokio::test]
    async fn test_queries() {
        let client = spawn_node().await;
        assert!(client.is_ready().await);

        let pending = client.pending_transactions().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(client.included_transactions().await.unwrap().is_empty());

        let state = client.account(&PublicKey::new("alice")).await.unwrap();
        assert_eq!(state.nonce, 5);
        assert_eq!(state.balance, Amount::from_tokens(3));

        let err = client.account(&PublicKey::new("carol")).await.unwrap_err();
        assert_eq!(err, NodeError::UnknownAccount(PublicKey::new("carol")));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let client = HttpNodeClient::new("http://127.0.0.1:1");
        assert!(!client.is_ready().await);
        let err = client.submit_transaction(&signed(5)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Transport(_)));
    }
}
