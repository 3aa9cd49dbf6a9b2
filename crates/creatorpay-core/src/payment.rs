use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{PaymentKind, PaymentSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub destination_address: String,
    /// USDC
    pub amount: f64,
    pub currency: String,
    pub memo: String,
    /// Sent as `Idempotency-Key` so a retried request cannot pay twice
    #[serde(skip)]
    pub idempotency_key: String,
}

impl PaymentRequest {
    pub fn usdc(destination_address: impl Into<String>, amount: f64, memo: impl Into<String>) -> Self {
        Self {
            destination_address: destination_address.into(),
            amount,
            currency: "USDC".to_string(),
            memo: memo.into(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: String,
    #[serde(default)]
    pub status: String,
}

/// Moves money to a creator. Transfers are irreversible.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentReceipt>;
}

pub struct HttpPaymentRail {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentRail {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiPayment {
    id: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl PaymentRail for HttpPaymentRail {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentReceipt> {
        let resp = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.api_key)
            .header("idempotency-key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .context("payment service unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("payment service returned {status}: {body}"));
        }
        let payment: ApiPayment = resp.json().await.context("decoding payment response")?;
        tracing::info!(
            payment_id = %payment.id,
            amount = request.amount,
            destination = %request.destination_address,
            "payment sent"
        );
        Ok(PaymentReceipt {
            payment_id: payment.id,
            status: payment.status,
        })
    }
}

/// Dry-run rail that only records what would have been paid.
#[derive(Default)]
pub struct RecordingPaymentRail {
    payments: Mutex<Vec<PaymentRequest>>,
}

impl RecordingPaymentRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payments(&self) -> Vec<PaymentRequest> {
        self.payments.lock().await.clone()
    }
}

#[async_trait]
impl PaymentRail for RecordingPaymentRail {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentReceipt> {
        let mut payments = self.payments.lock().await;
        payments.push(request.clone());
        tracing::info!(
            amount = request.amount,
            destination = %request.destination_address,
            "dry-run payment recorded"
        );
        Ok(PaymentReceipt {
            payment_id: format!("dry-run-{}", payments.len()),
            status: "recorded".to_string(),
        })
    }
}

pub fn build_payment_rail(settings: &PaymentSettings) -> Arc<dyn PaymentRail> {
    match settings.kind {
        PaymentKind::Http => Arc::new(HttpPaymentRail::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
        )),
        PaymentKind::DryRun => Arc::new(RecordingPaymentRail::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn recording_rail_numbers_payments() {
        let rail = RecordingPaymentRail::new();
        let first = rail
            .pay(&PaymentRequest::usdc("0xabc", 7.0, "post p1"))
            .await
            .unwrap();
        let second = rail
            .pay(&PaymentRequest::usdc("0xabc", 1.5, "post p2"))
            .await
            .unwrap();
        assert_eq!(first.payment_id, "dry-run-1");
        assert_eq!(second.payment_id, "dry-run-2");
        assert_eq!(rail.payments().await.len(), 2);
    }

    #[tokio::test]
    async fn http_rail_posts_payment_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header("authorization", "Bearer pay-key"))
            .and(header_exists("idempotency-key"))
            .and(body_partial_json(serde_json::json!({
                "destination_address": "0xabc",
                "amount": 7.0,
                "currency": "USDC"
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"id": "pay_1", "status": "settled"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rail = HttpPaymentRail::new(server.uri(), "pay-key");
        let receipt = rail
            .pay(&PaymentRequest::usdc("0xabc", 7.0, "post p1"))
            .await
            .unwrap();
        assert_eq!(receipt.payment_id, "pay_1");
        assert_eq!(receipt.status, "settled");
    }

    #[tokio::test]
    async fn http_rail_surfaces_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient funds"))
            .mount(&server)
            .await;

        let rail = HttpPaymentRail::new(server.uri(), "pay-key");
        let err = rail
            .pay(&PaymentRequest::usdc("0xabc", 7.0, "post p1"))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("402"));
        assert!(err.contains("insufficient funds"));
    }
}
