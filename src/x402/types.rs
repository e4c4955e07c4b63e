use alloy::primitives::U256;
use alloy::sol;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, PaymentError};

sol! {
    /// EIP-3009 transfer authorization, signed off-chain by the payer and
    /// redeemed on-chain by the facilitator
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    /// Read-only asset contract surface used for signing-domain discovery
    interface IErc20Meta {
        function name() external view returns (string tokenName);
        function eip712Domain()
            external
            view
            returns (
                bytes1 fields,
                string name,
                string version,
                uint256 chainId,
                address verifyingContract,
                bytes32 salt,
                uint256[] extensions
            );
    }
}

/// What a payment must look like for the facilitator to accept it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub pay_to: String,
    pub asset: String,
    /// Amount in atomic token units, as a decimal string
    pub max_amount_required: String,
    pub max_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Signed authorization payload carried inside the payment header.
/// Ephemeral: built fresh per attempt with a fresh nonce, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: String,
    pub signature: String,
    pub asset: String,
}

/// The x402 payment header, transported base64(JSON)-encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHeader {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: PaymentPayload,
}

impl PaymentHeader {
    pub fn encode(&self) -> AppResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize payment header: {e}")))?;
        Ok(BASE64.encode(json))
    }

    pub fn decode(encoded: &str) -> AppResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| AppError::InvalidInput(format!("Invalid payment header encoding: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::InvalidInput(format!("Invalid payment header: {e}")))
    }
}

/// Request body for the facilitator's verify and settle endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    pub x402_version: u32,
    pub payment_header: String,
    pub payment_requirements: PaymentRequirements,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleEvent {
    #[serde(rename = "payment.settled")]
    Settled,
    #[serde(rename = "payment.failed")]
    Failed,
}

/// Terminal outcome of a settlement attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    #[serde(default = "default_x402_version")]
    pub x402_version: u32,
    pub event: SettleEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_x402_version() -> u32 {
    1
}

impl SettleResponse {
    pub fn failed(network: &str, error: String) -> Self {
        Self {
            x402_version: 1,
            event: SettleEvent::Failed,
            tx_hash: None,
            network: Some(network.to_string()),
            error: Some(error),
        }
    }
}

/// Convert a decimal token amount into atomic units (e.g. 10.5 USDC with 6
/// decimals -> 10500000). Fixed-point all the way down; floats would drift
/// over many billing cycles.
pub fn to_atomic_units(amount: Decimal, decimals: u32) -> AppResult<U256> {
    if amount.is_sign_negative() {
        return Err(PaymentError::InvalidAmount(format!("negative amount: {amount}")).into());
    }
    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = amount
        .checked_mul(scale)
        .ok_or_else(|| PaymentError::InvalidAmount(format!("amount overflow: {amount}")))?;
    let atomic = scaled
        .trunc()
        .to_u128()
        .ok_or_else(|| PaymentError::InvalidAmount(format!("amount not representable: {amount}")))?;
    Ok(U256::from(atomic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_atomic_units() {
        assert_eq!(to_atomic_units(dec!(10.000), 6).unwrap(), U256::from(10_000_000u64));
        assert_eq!(to_atomic_units(dec!(0.000001), 6).unwrap(), U256::from(1u64));
        assert_eq!(to_atomic_units(dec!(0), 6).unwrap(), U256::ZERO);
        // Sub-atomic precision truncates rather than rounding up
        assert_eq!(to_atomic_units(dec!(0.0000019), 6).unwrap(), U256::from(1u64));
        assert!(to_atomic_units(dec!(-1), 6).is_err());
    }

    #[test]
    fn test_payment_header_round_trip() {
        let header = PaymentHeader {
            x402_version: 1,
            scheme: "exact".to_string(),
            network: "hedera-testnet".to_string(),
            payload: PaymentPayload {
                from: "0x1111111111111111111111111111111111111111".to_string(),
                to: "0x2222222222222222222222222222222222222222".to_string(),
                value: "10000000".to_string(),
                valid_after: 0,
                valid_before: 1_700_000_300,
                nonce: format!("0x{}", "ab".repeat(32)),
                signature: format!("0x{}", "cd".repeat(65)),
                asset: "0x3333333333333333333333333333333333333333".to_string(),
            },
        };

        let encoded = header.encode().unwrap();
        let decoded = PaymentHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.payload.from, header.payload.from);
        assert_eq!(decoded.payload.value, header.payload.value);
        assert_eq!(decoded.payload.nonce, header.payload.nonce);

        // Wire format uses the facilitator's camelCase field names
        let json: serde_json::Value =
            serde_json::from_slice(&base64::engine::general_purpose::STANDARD.decode(&encoded).unwrap())
                .unwrap();
        assert!(json.get("x402Version").is_some());
        assert!(json["payload"].get("validBefore").is_some());
    }

    #[test]
    fn test_settle_event_wire_names() {
        let settled: SettleEvent = serde_json::from_str("\"payment.settled\"").unwrap();
        assert_eq!(settled, SettleEvent::Settled);
        let failed: SettleEvent = serde_json::from_str("\"payment.failed\"").unwrap();
        assert_eq!(failed, SettleEvent::Failed);
    }
}
