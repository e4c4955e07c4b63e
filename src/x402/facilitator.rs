use reqwest::Client;
use tracing::{info, warn};

use super::types::{FacilitatorRequest, PaymentRequirements, SettleResponse, VerifyResponse};
use crate::error::{AppError, AppResult};

/// HTTP client for the x402 payment facilitator.
///
/// This client performs single round-trips and surfaces every transport or
/// remote failure as a typed error; retry policy lives entirely in the
/// worker and the job queue.
pub struct FacilitatorClient {
    client: Client,
    base_url: String,
}

impl FacilitatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// POST /verify - ask the facilitator to validate a payment header
    pub async fn verify(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> AppResult<VerifyResponse> {
        let url = format!("{}/verify", self.base_url);
        let body = FacilitatorRequest {
            x402_version: 1,
            payment_header: payment_header.to_string(),
            payment_requirements: requirements.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("X402-Version", "1")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("verify", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Facilitator(format!(
                "facilitator verify returned {status}: {text}"
            )));
        }

        let verify: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AppError::Facilitator(format!("invalid verify response: {e}")))?;

        if !verify.is_valid {
            warn!(
                "Facilitator rejected payment header: {}",
                verify.invalid_reason.as_deref().unwrap_or("no reason given")
            );
        }

        Ok(verify)
    }

    /// POST /settle - submit a verified payment header for on-chain settlement
    pub async fn settle(
        &self,
        payment_header: &str,
        requirements: &PaymentRequirements,
    ) -> AppResult<SettleResponse> {
        let url = format!("{}/settle", self.base_url);
        let body = FacilitatorRequest {
            x402_version: 1,
            payment_header: payment_header.to_string(),
            payment_requirements: requirements.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("X402-Version", "1")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("settle", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Facilitator(format!(
                "facilitator settle returned {status}: {text}"
            )));
        }

        let settle: SettleResponse = response
            .json()
            .await
            .map_err(|e| AppError::Facilitator(format!("invalid settle response: {e}")))?;

        info!(
            "Settle outcome: {:?} (tx: {})",
            settle.event,
            settle.tx_hash.as_deref().unwrap_or("-")
        );

        Ok(settle)
    }

    /// GET /healthcheck
    pub async fn health_check(&self) -> AppResult<serde_json::Value> {
        let url = format!("{}/healthcheck", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("healthcheck", e))?;
        Ok(response.json().await?)
    }

    /// GET /supported - payment kinds the facilitator accepts
    pub async fn supported(&self) -> AppResult<serde_json::Value> {
        let url = format!("{}/supported", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("supported", e))?;
        Ok(response.json().await?)
    }
}

/// Map a reqwest error to a message the error classifier can categorize:
/// timeouts mention "timed out", everything else mentions "connection".
fn transport_error(step: &str, error: reqwest::Error) -> AppError {
    if error.is_timeout() {
        AppError::Facilitator(format!("facilitator {step} timed out: {error}"))
    } else {
        AppError::Facilitator(format!("facilitator {step} connection error: {error}"))
    }
}
