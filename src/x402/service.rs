use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{Eip712Domain, SolCall};
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;
use std::borrow::Cow;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

use super::facilitator::FacilitatorClient;
use super::signer::{recover_signer, SigningAccount};
use super::types::{
    IErc20Meta, PaymentHeader, PaymentPayload, PaymentRequirements, SettleResponse,
    TransferWithAuthorization, VerifyResponse,
};
use crate::error::{AppError, AppResult};

/// Historically-observed EIP-712 domain names for USDC-style deployments.
///
/// The asset contract's metadata interface is inconsistently implemented
/// across deployments, so the correct signing-domain name is not reliably
/// discoverable up front. This ordered list is a pragmatic, inherently
/// incomplete mitigation: a deployment using a name outside it will still
/// fail verification.
pub const FALLBACK_DOMAIN_NAMES: &[&str] = &[
    "USD Coin",
    "USDX Coin",
    "USD Coin (Hedera)",
    "USDC",
    "USDC.e",
    "USD Coin on Hedera",
];

/// Candidate domain names to try after `already_tried` failed verification,
/// in fallback order
pub fn fallback_candidates(already_tried: &str) -> Vec<&'static str> {
    FALLBACK_DOMAIN_NAMES
        .iter()
        .copied()
        .filter(|candidate| *candidate != already_tried)
        .collect()
}

/// Resolves an asset contract's EIP-712 signing domain, with a small cache.
///
/// Tries EIP-5267 `eip712Domain()` first, then plain ERC-20 `name()` with
/// version "1".
pub struct TokenDomainResolver {
    client: Client,
    rpc_url: String,
    cache: RwLock<HashMap<String, (String, String)>>,
}

impl TokenDomainResolver {
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: Client::new(),
            rpc_url: rpc_url.to_string(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the (name, version) domain pair for an asset contract.
    /// Returns None when the contract implements neither metadata method.
    pub async fn resolve(&self, asset: &str) -> Option<(String, String)> {
        if let Some(cached) = self.cache.read().get(asset) {
            return Some(cached.clone());
        }

        let resolved = match self.query_eip712_domain(asset).await {
            Ok(domain) => Some(domain),
            Err(e1) => {
                warn!("eip712Domain() query failed for {}: {}", asset, e1);
                match self.query_token_name(asset).await {
                    Ok(name) => Some((name, "1".to_string())),
                    Err(e2) => {
                        warn!("name() query also failed for {}: {}", asset, e2);
                        None
                    }
                }
            }
        };

        if let Some(domain) = &resolved {
            info!(
                "✓ Resolved signing domain for {}: name=\"{}\" version=\"{}\"",
                asset, domain.0, domain.1
            );
            self.cache.write().insert(asset.to_string(), domain.clone());
        }

        resolved
    }

    async fn query_eip712_domain(&self, asset: &str) -> AppResult<(String, String)> {
        let data = IErc20Meta::eip712DomainCall {}.abi_encode();
        let raw = self.eth_call(asset, data).await?;
        let ret = IErc20Meta::eip712DomainCall::abi_decode_returns(&raw, true)
            .map_err(|e| AppError::ExternalError(format!("eip712Domain decode failed: {e}")))?;
        Ok((ret.name, ret.version))
    }

    async fn query_token_name(&self, asset: &str) -> AppResult<String> {
        let data = IErc20Meta::nameCall {}.abi_encode();
        let raw = self.eth_call(asset, data).await?;
        let ret = IErc20Meta::nameCall::abi_decode_returns(&raw, true)
            .map_err(|e| AppError::ExternalError(format!("name decode failed: {e}")))?;
        Ok(ret.tokenName)
    }

    async fn eth_call(&self, to: &str, data: Vec<u8>) -> AppResult<Vec<u8>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"],
        });

        let response: serde_json::Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(AppError::ExternalError(format!("eth_call failed: {error}")));
        }

        let result = response
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| AppError::ExternalError("eth_call returned no result".to_string()))?;

        hex::decode(result.trim_start_matches("0x"))
            .map_err(|e| AppError::ExternalError(format!("eth_call returned invalid hex: {e}")))
    }
}

/// Signing & settlement client for the x402 protocol.
///
/// Three remote round-trips per payment: build and sign a time-bounded
/// transfer authorization, have the facilitator verify it, then settle it.
/// This component never retries; the worker and job queue own retry policy.
pub struct X402PaymentService {
    facilitator: FacilitatorClient,
    domains: TokenDomainResolver,
    chain_id: u64,
}

impl X402PaymentService {
    pub fn new(facilitator: FacilitatorClient, domains: TokenDomainResolver, chain_id: u64) -> Self {
        Self {
            facilitator,
            domains,
            chain_id,
        }
    }

    /// Single-use random 32-byte nonce for the transfer authorization
    fn generate_nonce() -> B256 {
        B256::from(rand::random::<[u8; 32]>())
    }

    fn build_domain(&self, name: &str, version: &str, asset: Address) -> Eip712Domain {
        Eip712Domain::new(
            Some(Cow::Owned(name.to_string())),
            Some(Cow::Owned(version.to_string())),
            Some(U256::from(self.chain_id)),
            Some(asset),
            None,
        )
    }

    /// Build, sign and encode a payment header under the given domain name.
    ///
    /// A fresh nonce is generated on every call: an authorization payload is
    /// never reused across attempts. The signature is verified locally by
    /// recovery before anything goes over the wire.
    async fn create_payment_header(
        &self,
        signer: &dyn SigningAccount,
        requirements: &PaymentRequirements,
        domain_name: &str,
        domain_version: &str,
    ) -> AppResult<String> {
        let from = signer.address();
        let to = Address::from_str(&requirements.pay_to)
            .map_err(|e| AppError::InvalidAddress(format!("payTo {}: {e}", requirements.pay_to)))?;
        let asset = Address::from_str(&requirements.asset)
            .map_err(|e| AppError::InvalidAddress(format!("asset {}: {e}", requirements.asset)))?;
        let value = U256::from_str(&requirements.max_amount_required).map_err(|e| {
            AppError::InvalidInput(format!(
                "amount {}: {e}",
                requirements.max_amount_required
            ))
        })?;

        // Validity window [now, now + timeout], in seconds
        let valid_after = 0u64;
        let valid_before = Utc::now().timestamp() as u64 + requirements.max_timeout_seconds;
        let nonce = Self::generate_nonce();

        let authorization = TransferWithAuthorization {
            from,
            to,
            value,
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce,
        };

        let domain = self.build_domain(domain_name, domain_version, asset);
        let signature = signer.sign_authorization(&domain, &authorization).await?;

        let recovered = recover_signer(&domain, &authorization, &signature)?;
        if recovered != from {
            return Err(AppError::Signing(format!(
                "local signature recovery mismatch: expected {from}, recovered {recovered}"
            )));
        }

        let header = PaymentHeader {
            x402_version: 1,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            payload: PaymentPayload {
                from: from.to_string(),
                to: to.to_string(),
                value: value.to_string(),
                valid_after,
                valid_before,
                nonce: nonce.to_string(),
                signature: format!("0x{}", hex::encode(signature.as_bytes())),
                asset: asset.to_string(),
            },
        };

        header.encode()
    }

    /// Complete payment flow: authorize, verify, settle.
    ///
    /// When verification rejects the signature, the header is rebuilt with
    /// the next candidate domain name until one verifies or the list runs
    /// out. Transport failures at any step propagate as typed errors for the
    /// worker to classify.
    pub async fn pay(
        &self,
        signer: &dyn SigningAccount,
        requirements: &PaymentRequirements,
    ) -> AppResult<SettleResponse> {
        let (domain_name, domain_version) = self
            .domains
            .resolve(&requirements.asset)
            .await
            .unwrap_or_else(|| {
                info!(
                    "Domain query failed, using default domain \"{}\"",
                    FALLBACK_DOMAIN_NAMES[0]
                );
                (FALLBACK_DOMAIN_NAMES[0].to_string(), "1".to_string())
            });

        let mut header = self
            .create_payment_header(signer, requirements, &domain_name, &domain_version)
            .await?;
        let mut verify = self.facilitator.verify(&header, requirements).await?;

        if !verify.is_valid && is_signature_mismatch(&verify) {
            info!("🔄 Verification rejected the signature, trying fallback domain names");

            for candidate in fallback_candidates(&domain_name) {
                info!("🔄 Trying domain name \"{candidate}\"");
                header = self
                    .create_payment_header(signer, requirements, candidate, "1")
                    .await?;
                verify = self.facilitator.verify(&header, requirements).await?;

                if verify.is_valid {
                    info!("✓ Verification succeeded with domain name \"{candidate}\"");
                    break;
                }
            }
        }

        if !verify.is_valid {
            let reason = verify
                .invalid_reason
                .unwrap_or_else(|| "Payment verification failed".to_string());
            return Ok(SettleResponse::failed(&requirements.network, reason));
        }

        self.facilitator.settle(&header, requirements).await
    }
}

fn is_signature_mismatch(verify: &VerifyResponse) -> bool {
    verify
        .invalid_reason
        .as_deref()
        .map(|reason| reason.to_lowercase().contains("signature"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_candidates_exclude_already_tried() {
        let candidates = fallback_candidates("USD Coin");
        assert!(!candidates.contains(&"USD Coin"));
        assert_eq!(candidates.len(), FALLBACK_DOMAIN_NAMES.len() - 1);
        // Order is preserved
        assert_eq!(candidates[0], "USDX Coin");
    }

    #[test]
    fn test_fallback_candidates_with_unknown_resolved_name() {
        // A contract-resolved name outside the list leaves all candidates
        let candidates = fallback_candidates("Some Bridged Dollar");
        assert_eq!(candidates.len(), FALLBACK_DOMAIN_NAMES.len());
    }

    #[test]
    fn test_fallback_list_is_bounded() {
        // The list is a capped mitigation, not a complete registry: a
        // deployment using a domain name outside it will never verify.
        assert!(FALLBACK_DOMAIN_NAMES.len() <= 8);
        assert!(!FALLBACK_DOMAIN_NAMES.is_empty());
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let a = X402PaymentService::generate_nonce();
        let b = X402PaymentService::generate_nonce();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_mismatch_detection() {
        let mismatch = VerifyResponse {
            is_valid: false,
            invalid_reason: Some("Signature does not match payer".to_string()),
        };
        assert!(is_signature_mismatch(&mismatch));

        let other = VerifyResponse {
            is_valid: false,
            invalid_reason: Some("payment expired".to_string()),
        };
        assert!(!is_signature_mismatch(&other));

        let no_reason = VerifyResponse {
            is_valid: false,
            invalid_reason: None,
        };
        assert!(!is_signature_mismatch(&no_reason));
    }
}
