use alloy::primitives::{Address, PrimitiveSignature as Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
use std::str::FromStr;

use super::types::TransferWithAuthorization;
use crate::error::{AppError, AppResult};

/// Narrow signing capability the payment pipeline depends on.
///
/// The pipeline never touches raw keys or assumes a concrete wallet: it only
/// needs the payer address and a typed-data signature over a transfer
/// authorization. Key custody lives behind this trait.
#[async_trait]
pub trait SigningAccount: Send + Sync {
    /// Address of the paying account
    fn address(&self) -> Address;

    /// Sign the EIP-712 digest of `authorization` under `domain`
    async fn sign_authorization(
        &self,
        domain: &Eip712Domain,
        authorization: &TransferWithAuthorization,
    ) -> AppResult<Signature>;
}

/// In-process signer backed by a local private key
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn from_key(key: &str) -> AppResult<Self> {
        let inner = PrivateKeySigner::from_str(key.trim_start_matches("0x"))
            .map_err(|e| AppError::Signing(format!("Invalid payer private key: {e}")))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl SigningAccount for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_authorization(
        &self,
        domain: &Eip712Domain,
        authorization: &TransferWithAuthorization,
    ) -> AppResult<Signature> {
        let digest: B256 = authorization.eip712_signing_hash(domain);
        self.inner
            .sign_hash_sync(&digest)
            .map_err(|e| AppError::Signing(format!("Failed to sign authorization: {e}")))
    }
}

/// Recover the signer address from a signature over the authorization digest
pub fn recover_signer(
    domain: &Eip712Domain,
    authorization: &TransferWithAuthorization,
    signature: &Signature,
) -> AppResult<Address> {
    let digest = authorization.eip712_signing_hash(domain);
    signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| AppError::Signing(format!("Signature recovery failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use alloy::sol_types::Eip712Domain;
    use std::borrow::Cow;

    fn test_domain(name: &str) -> Eip712Domain {
        Eip712Domain::new(
            Some(Cow::Owned(name.to_string())),
            Some(Cow::Borrowed("1")),
            Some(U256::from(296u64)),
            Some(Address::repeat_byte(0x33)),
            None,
        )
    }

    fn test_authorization(from: Address) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from,
            to: Address::repeat_byte(0x22),
            value: U256::from(10_000_000u64),
            validAfter: U256::ZERO,
            validBefore: U256::from(1_700_000_300u64),
            nonce: B256::repeat_byte(0xab),
        }
    }

    #[tokio::test]
    async fn test_sign_and_recover_round_trip() {
        let signer = LocalSigner {
            inner: PrivateKeySigner::random(),
        };
        let domain = test_domain("USD Coin");
        let authorization = test_authorization(signer.address());

        let signature = signer
            .sign_authorization(&domain, &authorization)
            .await
            .unwrap();

        let recovered = recover_signer(&domain, &authorization, &signature).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_domain_name_changes_the_digest() {
        // A signature produced under one domain name must not verify under
        // another: that asymmetry is exactly why the fallback domain list
        // exists.
        let signer = LocalSigner {
            inner: PrivateKeySigner::random(),
        };
        let authorization = test_authorization(signer.address());

        let signature = signer
            .sign_authorization(&test_domain("USD Coin"), &authorization)
            .await
            .unwrap();

        let recovered =
            recover_signer(&test_domain("USDC.e"), &authorization, &signature).unwrap();
        assert_ne!(recovered, signer.address());
    }
}
