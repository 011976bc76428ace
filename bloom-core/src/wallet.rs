//! Wallet custody seam.
//!
//! Custody (wallet creation and signing) sits behind [`WalletCustody`]. The
//! chain side (gas, nonce, call encoding, broadcast) sits behind
//! [`ChainClient`], whose only implementation refuses every call: there is
//! no chain integration yet.

use crate::db::Database;
use crate::error::{BloomError, Result};
use crate::models::{CreditTransaction, TransactionType};
use crate::staking::CREDIT_PRICE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Receives credit purchase payments.
pub const TREASURY_ADDRESS: &str = "0x0000000000000000000000000000000000b100";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub from: String,
    pub to: String,
    pub value: f64,
    pub data: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub signature: String,
}

pub trait WalletCustody: Send + Sync {
    fn create_wallet(&self, user_id: &str) -> Result<Wallet>;
    fn sign_transaction(
        &self,
        wallet: &Wallet,
        transaction: &UnsignedTransaction,
    ) -> Result<SignedTransaction>;
}

pub trait ChainClient: Send + Sync {
    fn estimate_gas(&self, transaction: &UnsignedTransaction) -> Result<u64>;
    fn nonce(&self, address: &str) -> Result<u64>;
    fn encode_call(&self, function: &str, args: &[String]) -> Result<String>;
    fn broadcast(&self, signed: &SignedTransaction) -> Result<String>;
}

/// Deterministic stand-in for a custody provider. Addresses and signatures
/// are SHA-256 digests; they are not valid on any chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalCustody;

impl WalletCustody for LocalCustody {
    fn create_wallet(&self, user_id: &str) -> Result<Wallet> {
        if user_id.trim().is_empty() {
            return Err(BloomError::validation("user_id", "is required"));
        }
        let digest = Sha256::digest(format!("wallet:{user_id}").as_bytes());
        Ok(Wallet {
            id: format!("wallet-{}", to_hex(&digest[..8])),
            user_id: user_id.to_string(),
            address: format!("0x{}", to_hex(&digest[..20])),
            created_at: Utc::now(),
        })
    }

    fn sign_transaction(
        &self,
        wallet: &Wallet,
        transaction: &UnsignedTransaction,
    ) -> Result<SignedTransaction> {
        if !transaction.from.eq_ignore_ascii_case(&wallet.address) {
            return Err(BloomError::Wallet(format!(
                "wallet {} cannot sign for {}",
                wallet.address, transaction.from
            )));
        }
        let payload = serde_json::to_vec(transaction)?;
        let mut hasher = Sha256::new();
        hasher.update(wallet.id.as_bytes());
        hasher.update(&payload);
        Ok(SignedTransaction {
            transaction: transaction.clone(),
            signature: format!("0x{}", to_hex(&hasher.finalize())),
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnimplementedChain;

impl ChainClient for UnimplementedChain {
    fn estimate_gas(&self, _transaction: &UnsignedTransaction) -> Result<u64> {
        Err(BloomError::Unimplemented("gas estimation"))
    }

    fn nonce(&self, _address: &str) -> Result<u64> {
        Err(BloomError::Unimplemented("nonce lookup"))
    }

    fn encode_call(&self, _function: &str, _args: &[String]) -> Result<String> {
        Err(BloomError::Unimplemented("contract call encoding"))
    }

    fn broadcast(&self, _signed: &SignedTransaction) -> Result<String> {
        Err(BloomError::Unimplemented("transaction broadcast"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPurchase {
    pub payment: SignedTransaction,
    /// Set once the payment is on chain; `None` while broadcasting is unavailable.
    pub tx_hash: Option<String>,
    pub credits: CreditTransaction,
}

/// Signs a payment of `amount_paid` to the treasury, hands it to the chain
/// client and records the credits it buys. Steps are not compensated: if
/// recording fails the payment stays signed and only the error is logged.
pub fn purchase_credits(
    db: &Database,
    custody: &dyn WalletCustody,
    chain: &dyn ChainClient,
    user_id: &str,
    amount_paid: f64,
) -> Result<CreditPurchase> {
    if !(amount_paid > 0.0) {
        return Err(BloomError::validation("amount", "must be positive"));
    }
    let wallet = custody.create_wallet(user_id)?;
    let payment = custody.sign_transaction(
        &wallet,
        &UnsignedTransaction {
            from: wallet.address.clone(),
            to: TREASURY_ADDRESS.into(),
            value: amount_paid,
            data: None,
        },
    )?;

    let tx_hash = match chain.broadcast(&payment) {
        Ok(hash) => Some(hash),
        Err(BloomError::Unimplemented(what)) => {
            tracing::warn!(user_id, "{what} unavailable; payment kept signed only");
            None
        }
        Err(err) => return Err(err),
    };

    let credits = amount_paid / CREDIT_PRICE;
    let recorded = db.record_transaction(
        user_id,
        TransactionType::Purchase,
        credits,
        Some(format!("Purchased with {amount_paid} ({})", payment.signature)),
    );
    match recorded {
        Ok(credits) => Ok(CreditPurchase {
            payment,
            tx_hash,
            credits,
        }),
        Err(err) => {
            tracing::error!(
                user_id,
                signature = %payment.signature,
                error = %err,
                "payment signed but credits not recorded"
            );
            Err(err)
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
