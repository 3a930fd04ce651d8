//! Transaction building, signing, and broadcasting.
//!
//! # Responsibilities
//! - Drop messages whose signers cannot be used
//! - Refresh account number/sequence for every signer
//! - Estimate gas by simulation and derive the fee
//! - Sign for every signer in first-seen order and submit in block mode

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::blockchain::client::ChainRpc;
use crate::blockchain::signer::{ExternalSigner, PublicKey, TxSigner};
use crate::blockchain::types::{AccountInfo, BlockchainError, BlockchainResult, Coin, TxResponse};
use crate::config::schema::BlockchainInfoConfig;
use crate::observability::metrics;
use crate::sds::messages::UnsignedMessage;

const SIGN_MODE_DIRECT: &str = "SIGN_MODE_DIRECT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxBody {
    pub messages: Vec<serde_json::Value>,
    pub memo: String,
    pub timeout_height: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub single: SingleMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMode {
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub public_key: PublicKey,
    pub mode_info: ModeInfo,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    pub gas_limit: String,
    pub payer: String,
    pub granter: String,
}

impl Fee {
    fn new(amount: Option<Coin>, gas_limit: u64) -> Self {
        Self {
            amount: amount.into_iter().collect(),
            gas_limit: gas_limit.to_string(),
            payer: String::new(),
            granter: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub signer_infos: Vec<SignerInfo>,
    pub fee: Fee,
}

/// Encoded transaction: body, auth info and one signature per signer info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub body: TxBody,
    pub auth_info: AuthInfo,
    /// Base64 encoded, same order as `auth_info.signer_infos`.
    pub signatures: Vec<String>,
}

#[derive(Serialize)]
struct SignDoc<'a> {
    body: &'a TxBody,
    auth_info: &'a AuthInfo,
    chain_id: &'a str,
    account_number: String,
}

/// Bytes a signer signs for this transaction.
pub fn sign_bytes(
    body: &TxBody,
    auth_info: &AuthInfo,
    chain_id: &str,
    account_number: u64,
) -> BlockchainResult<Vec<u8>> {
    serde_json::to_vec(&SignDoc {
        body,
        auth_info,
        chain_id,
        account_number: account_number.to_string(),
    })
    .map_err(|e| BlockchainError::Decode(e.to_string()))
}

/// Gas adjustment resolution: parts per million.
const GAS_ADJUSTMENT_SCALE: u128 = 1_000_000;

/// `ceil(gas_used × gas_adjustment)`, computed in integers.
///
/// The adjustment is rounded to parts per million first, so `1.1` is exactly
/// `1_100_000 / 1_000_000` and never `1.1000000000000001`.
pub fn compute_gas_limit(gas_used: u64, gas_adjustment: f64) -> u64 {
    let ppm = (gas_adjustment.max(0.0) * GAS_ADJUSTMENT_SCALE as f64).round() as u128;
    let limit = (u128::from(gas_used) * ppm).div_ceil(GAS_ADJUSTMENT_SCALE);
    u64::try_from(limit).unwrap_or(u64::MAX)
}

/// `gas_price.amount × gas_limit` in the gas price denomination.
pub fn compute_fee(gas_price: &Coin, gas_limit: u64) -> BlockchainResult<Coin> {
    gas_price
        .amount
        .checked_mul(u128::from(gas_limit))
        .map(|amount| Coin::new(amount, gas_price.denom.clone()))
        .ok_or_else(|| BlockchainError::Fee(format!("fee overflow for gas limit {}", gas_limit)))
}

/// Drop messages without signature keys or with a signer lacking an address.
pub fn filter_invalid_signers(messages: Vec<UnsignedMessage>) -> Vec<UnsignedMessage> {
    let total = messages.len();
    let valid: Vec<_> = messages
        .into_iter()
        .filter(|m| !m.signature_keys.is_empty() && m.signature_keys.iter().all(|k| !k.address.is_empty()))
        .collect();
    if valid.len() != total {
        tracing::warn!(
            total,
            valid = valid.len(),
            "Dropped messages without a usable signer"
        );
        metrics::record_dropped_messages("invalid_signer", total - valid.len());
    }
    valid
}

/// A signer ready to sign a batch.
#[derive(Debug, Clone)]
pub struct BatchSigner {
    pub address: String,
    pub account: AccountInfo,
    pub public_key: PublicKey,
    signer: TxSigner,
}

/// Messages and their resolved signers, in first-seen order.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub messages: Vec<UnsignedMessage>,
    pub signers: Vec<BatchSigner>,
}

/// Result of a successful broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub response: TxResponse,
    pub messages: usize,
    pub gas_limit: u64,
    pub fee: Coin,
}

/// Builds, signs and submits multi-message transactions.
pub struct TxBuilder {
    chain: Arc<dyn ChainRpc>,
    external: Option<Arc<dyn ExternalSigner>>,
    chain_id: String,
    gas_price: Coin,
    gas_adjustment: f64,
}

impl TxBuilder {
    /// Create a new transaction builder.
    pub fn new(chain: Arc<dyn ChainRpc>, info: &BlockchainInfoConfig) -> BlockchainResult<Self> {
        let gas_price = info
            .transactions
            .gas_price
            .parse::<Coin>()
            .map_err(|e| BlockchainError::Fee(e.to_string()))?;
        Ok(Self {
            chain,
            external: None,
            chain_id: info.chain_id.clone(),
            gas_price,
            gas_adjustment: info.transactions.gas_adjustment,
        })
    }

    /// Delegate signing for keys that arrive without private key bytes.
    pub fn with_external_signer(mut self, signer: Arc<dyn ExternalSigner>) -> Self {
        self.external = Some(signer);
        self
    }

    /// Filter, sign, simulate and submit a batch. The chain call blocks until inclusion.
    pub async fn broadcast(&self, messages: Vec<UnsignedMessage>) -> BlockchainResult<BroadcastOutcome> {
        let batch = self.prepare(messages).await?;

        let simulation_tx = self.sign(&batch, Fee::new(None, 0)).await?;
        let gas = self.chain.simulate(&simulation_tx).await?;
        let gas_limit = compute_gas_limit(gas.gas_used, self.gas_adjustment);
        let fee = compute_fee(&self.gas_price, gas_limit)?;
        tracing::debug!(gas_used = gas.gas_used, gas_limit, fee = %fee, "Simulated transaction");

        let tx_bytes = self.sign(&batch, Fee::new(Some(fee.clone()), gas_limit)).await?;
        let response = self.chain.broadcast_tx_block(&tx_bytes).await?;
        if !response.is_success() {
            return Err(BlockchainError::Rejected {
                code: response.code,
                txhash: response.txhash,
                raw_log: response.raw_log,
            });
        }

        Ok(BroadcastOutcome {
            response,
            messages: batch.messages.len(),
            gas_limit,
            fee,
        })
    }

    /// Drop unusable messages, refresh account data and resolve signers.
    pub async fn prepare(&self, messages: Vec<UnsignedMessage>) -> BlockchainResult<PreparedBatch> {
        let mut messages = filter_invalid_signers(messages);

        let accounts = self.fetch_accounts(&signer_order(&messages)).await;
        let before = messages.len();
        messages.retain_mut(|message| {
            for key in &mut message.signature_keys {
                match accounts.get(&key.address) {
                    Some(info) => {
                        key.account_number = info.account_number;
                        key.account_sequence = info.sequence;
                    }
                    None => return false,
                }
            }
            true
        });
        if messages.len() != before {
            tracing::warn!(
                dropped = before - messages.len(),
                "Dropped messages with unresolved signer accounts"
            );
            metrics::record_dropped_messages("account_lookup", before - messages.len());
        }

        let mut resolved: HashMap<String, Option<BatchSigner>> = HashMap::new();
        for message in &messages {
            for key in &message.signature_keys {
                if resolved.contains_key(&key.address) {
                    continue;
                }
                let Some(account) = accounts.get(&key.address).copied() else {
                    continue;
                };
                let signer = match self.resolve_signer(key, account).await {
                    Ok(signer) => Some(signer),
                    Err(e) => {
                        tracing::warn!(address = %key.address, error = %e, "Cannot sign for address");
                        None
                    }
                };
                resolved.insert(key.address.clone(), signer);
            }
        }
        let before = messages.len();
        messages.retain(|m| {
            m.signature_keys
                .iter()
                .all(|k| resolved.get(&k.address).is_some_and(Option::is_some))
        });
        if messages.len() != before {
            metrics::record_dropped_messages("invalid_key", before - messages.len());
        }

        if messages.is_empty() {
            return Err(BlockchainError::EmptyTransaction(
                "no message left after signer resolution".to_string(),
            ));
        }

        let signers = signer_order(&messages)
            .into_iter()
            .filter_map(|address| resolved.remove(&address).flatten())
            .collect();
        Ok(PreparedBatch { messages, signers })
    }

    /// Look up every address concurrently; failed lookups are absent from the result.
    async fn fetch_accounts(&self, addresses: &[String]) -> HashMap<String, AccountInfo> {
        let lookups = addresses.iter().map(|address| async move {
            (address.clone(), self.chain.account(address).await)
        });

        let mut accounts = HashMap::with_capacity(addresses.len());
        for (address, result) in join_all(lookups).await {
            match result {
                Ok(info) => {
                    accounts.insert(address, info);
                }
                Err(e) => tracing::warn!(address = %address, error = %e, "Account lookup failed"),
            }
        }
        accounts
    }

    async fn resolve_signer(
        &self,
        key: &crate::sds::messages::SignatureKey,
        account: AccountInfo,
    ) -> BlockchainResult<BatchSigner> {
        let wallet_err = |e: crate::blockchain::signer::SignerError| BlockchainError::Wallet(e.to_string());
        let signer = TxSigner::resolve(
            &key.address,
            key.algorithm,
            key.private_key.as_deref(),
            self.external.as_ref(),
        )
        .map_err(wallet_err)?;
        let public_key = signer.public_key(&key.address).await.map_err(wallet_err)?;
        Ok(BatchSigner {
            address: key.address.clone(),
            account,
            public_key,
            signer,
        })
    }

    /// Two passes: every signer info and a placeholder signature first, then
    /// each placeholder is replaced by a signature over the complete auth info.
    async fn sign(&self, batch: &PreparedBatch, fee: Fee) -> BlockchainResult<Vec<u8>> {
        let body = TxBody {
            messages: batch.messages.iter().map(|m| m.msg.clone()).collect(),
            memo: String::new(),
            timeout_height: "0".to_string(),
        };
        let auth_info = AuthInfo {
            signer_infos: batch
                .signers
                .iter()
                .map(|s| SignerInfo {
                    public_key: s.public_key.clone(),
                    mode_info: ModeInfo {
                        single: SingleMode {
                            mode: SIGN_MODE_DIRECT.to_string(),
                        },
                    },
                    sequence: s.account.sequence.to_string(),
                })
                .collect(),
            fee,
        };

        let mut signatures = vec![String::new(); batch.signers.len()];
        for (slot, signer) in signatures.iter_mut().zip(&batch.signers) {
            let doc = sign_bytes(&body, &auth_info, &self.chain_id, signer.account.account_number)?;
            let signature = signer
                .signer
                .sign(&signer.address, &doc)
                .await
                .map_err(|e| BlockchainError::Wallet(e.to_string()))?;
            *slot = BASE64.encode(signature);
        }

        serde_json::to_vec(&Tx {
            body,
            auth_info,
            signatures,
        })
        .map_err(|e| BlockchainError::Decode(e.to_string()))
    }
}

/// Distinct signer addresses in first-seen order.
fn signer_order(messages: &[UnsignedMessage]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for key in messages.iter().flat_map(|m| &m.signature_keys) {
        if !order.contains(&key.address) {
            order.push(key.address.clone());
        }
    }
    order
}

impl std::fmt::Debug for TxBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxBuilder")
            .field("chain_id", &self.chain_id)
            .field("gas_price", &self.gas_price)
            .field("gas_adjustment", &self.gas_adjustment)
            .field("external_signer", &self.external.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blockchain::signer::SignatureAlgorithm;
    use crate::blockchain::types::GasInfo;
    use crate::sds::messages::SignatureKey;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    pub const KEY_A: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub const KEY_B: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    /// In-memory chain: fixed accounts, fixed simulated gas, records broadcasts.
    #[derive(Default)]
    pub struct MockChain {
        pub accounts: HashMap<String, AccountInfo>,
        pub failing: HashSet<String>,
        pub gas_used: u64,
        pub code: u32,
        pub broadcasts: Mutex<Vec<Tx>>,
        /// Canned answers for [`ChainRpc::query`], keyed by path.
        pub queries: HashMap<String, serde_json::Value>,
    }

    impl MockChain {
        pub fn with_accounts(addresses: &[&str]) -> Self {
            let accounts = addresses
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    (
                        a.to_string(),
                        AccountInfo {
                            account_number: i as u64 + 10,
                            sequence: i as u64 + 100,
                        },
                    )
                })
                .collect();
            Self {
                accounts,
                gas_used: 1001,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChainRpc for MockChain {
        async fn account(&self, address: &str) -> BlockchainResult<AccountInfo> {
            if self.failing.contains(address) {
                return Err(BlockchainError::Rpc("account not found".to_string()));
            }
            self.accounts
                .get(address)
                .copied()
                .ok_or_else(|| BlockchainError::Rpc("unknown".to_string()))
        }

        async fn simulate(&self, tx_bytes: &[u8]) -> BlockchainResult<GasInfo> {
            let _: Tx = serde_json::from_slice(tx_bytes).map_err(|e| BlockchainError::Decode(e.to_string()))?;
            Ok(GasInfo {
                gas_wanted: 0,
                gas_used: self.gas_used,
            })
        }

        async fn broadcast_tx_block(&self, tx_bytes: &[u8]) -> BlockchainResult<TxResponse> {
            let tx: Tx = serde_json::from_slice(tx_bytes).map_err(|e| BlockchainError::Decode(e.to_string()))?;
            self.broadcasts.lock().unwrap().push(tx);
            Ok(TxResponse {
                height: 42,
                txhash: "ABCDEF".to_string(),
                code: self.code,
                raw_log: String::new(),
            })
        }

        async fn node_network(&self) -> BlockchainResult<String> {
            Ok("stratos-1".to_string())
        }

        async fn latest_block_height(&self) -> BlockchainResult<u64> {
            Ok(42)
        }

        async fn query(&self, path: &str) -> BlockchainResult<serde_json::Value> {
            self.queries
                .get(path)
                .cloned()
                .ok_or_else(|| BlockchainError::Rpc(format!("HTTP 404 Not Found: {}", path)))
        }
    }

    pub fn signed_message(msg_type: &str, signers: &[(&str, &str)]) -> UnsignedMessage {
        UnsignedMessage {
            msg: serde_json::json!({ "@type": msg_type }),
            signature_keys: signers
                .iter()
                .map(|(address, key)| SignatureKey {
                    address: address.to_string(),
                    private_key: Some(hex::decode(key).unwrap()),
                    algorithm: SignatureAlgorithm::Secp256k1,
                    ..Default::default()
                })
                .collect(),
            msg_type: msg_type.to_string(),
        }
    }

    fn builder(chain: Arc<MockChain>) -> TxBuilder {
        let info = BlockchainInfoConfig::default();
        TxBuilder::new(chain, &info).unwrap()
    }

    #[test]
    fn test_gas_and_fee_formula() {
        assert_eq!(compute_gas_limit(81234, 1.5), 121851);
        assert_eq!(compute_gas_limit(1001, 1.5), 1502);
        assert_eq!(compute_gas_limit(0, 1.3), 0);
        assert_eq!(compute_gas_limit(u64::MAX, 2.0), u64::MAX);

        let fee = compute_fee(&Coin::new(1_000_000_000, "wei"), 1502).unwrap();
        assert_eq!(fee, Coin::new(1_502_000_000_000, "wei"));
        assert!(compute_fee(&Coin::new(u128::MAX, "wei"), 2).is_err());
    }

    #[test]
    fn test_gas_limit_has_no_float_drift() {
        // 100 × 1.1 is 110.00000000000001 in binary floating point.
        assert_eq!(compute_gas_limit(100, 1.1), 110);
        assert_eq!(compute_gas_limit(1000, 1.3), 1300);
        assert_eq!(compute_gas_limit(3, 1.5), 5);
        assert_eq!(compute_gas_limit(7, 1.0), 7);
    }

    #[test]
    fn test_filter_invalid_signers() {
        let mut no_keys = signed_message("a", &[]);
        no_keys.signature_keys.clear();
        let empty_address = signed_message("b", &[("", KEY_A)]);
        let ok = signed_message("c", &[("st1a", KEY_A)]);

        let kept = filter_invalid_signers(vec![no_keys, empty_address, ok]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].msg_type, "c");
    }

    #[tokio::test]
    async fn test_failed_account_lookup_excludes_only_that_message() {
        let mut chain = MockChain::with_accounts(&["st1a", "st1b"]);
        chain.failing.insert("st1b".to_string());
        let chain = Arc::new(chain);

        let outcome = builder(chain.clone())
            .broadcast(vec![
                signed_message("first", &[("st1a", KEY_A)]),
                signed_message("second", &[("st1b", KEY_B)]),
                signed_message("third", &[("st1a", KEY_A)]),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.messages, 2);
        let txs = chain.broadcasts.lock().unwrap();
        let types: Vec<_> = txs[0].body.messages.iter().map(|m| m["@type"].clone()).collect();
        assert_eq!(types, vec!["first", "third"]);
        assert_eq!(txs[0].auth_info.signer_infos.len(), 1);
    }

    #[tokio::test]
    async fn test_fee_uses_simulated_gas() {
        let chain = Arc::new(MockChain::with_accounts(&["st1a"]));
        let mut info = BlockchainInfoConfig::default();
        info.transactions.gas_price = "3ustos".to_string();
        info.transactions.gas_adjustment = 1.5;
        let builder = TxBuilder::new(chain.clone(), &info).unwrap();

        let outcome = builder
            .broadcast(vec![signed_message("m", &[("st1a", KEY_A)])])
            .await
            .unwrap();

        assert_eq!(outcome.gas_limit, 1502);
        assert_eq!(outcome.fee, Coin::new(4506, "ustos"));
        let tx = &chain.broadcasts.lock().unwrap()[0];
        assert_eq!(tx.auth_info.fee.gas_limit, "1502");
        assert_eq!(tx.auth_info.fee.amount, vec![Coin::new(4506, "ustos")]);
    }

    #[tokio::test]
    async fn test_signers_in_first_seen_order_with_valid_signatures() {
        use k256::ecdsa::signature::Verifier;

        let chain = Arc::new(MockChain::with_accounts(&["st1a", "st1b"]));
        builder(chain.clone())
            .broadcast(vec![
                signed_message("m1", &[("st1b", KEY_B)]),
                signed_message("m2", &[("st1a", KEY_A), ("st1b", KEY_B)]),
            ])
            .await
            .unwrap();

        let tx = chain.broadcasts.lock().unwrap()[0].clone();
        assert_eq!(tx.signatures.len(), 2);
        // st1b was seen first: account 11 / sequence 101.
        assert_eq!(tx.auth_info.signer_infos[0].sequence, "101");
        assert_eq!(tx.auth_info.signer_infos[1].sequence, "100");

        for (i, (key, account_number)) in [(KEY_B, 11u64), (KEY_A, 10u64)].iter().enumerate() {
            let signing = k256::ecdsa::SigningKey::from_slice(&hex::decode(key).unwrap()).unwrap();
            let doc = sign_bytes(&tx.body, &tx.auth_info, "stratos-1", *account_number).unwrap();
            let raw = BASE64.decode(&tx.signatures[i]).unwrap();
            let signature = k256::ecdsa::Signature::from_slice(&raw).unwrap();
            assert!(signing.verifying_key().verify(&doc, &signature).is_ok());
        }
    }

    #[tokio::test]
    async fn test_invalid_key_drops_message() {
        let chain = Arc::new(MockChain::with_accounts(&["st1a", "st1bad"]));
        let mut bad = signed_message("bad", &[("st1bad", KEY_A)]);
        bad.signature_keys[0].private_key = Some(vec![0u8; 32]);

        let batch = builder(chain)
            .prepare(vec![bad, signed_message("good", &[("st1a", KEY_A)])])
            .await
            .unwrap();
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.signers.len(), 1);
        assert_eq!(batch.signers[0].address, "st1a");
    }

    #[tokio::test]
    async fn test_nothing_left_is_an_error() {
        let mut chain = MockChain::with_accounts(&[]);
        chain.failing.insert("st1a".to_string());
        let result = builder(Arc::new(chain))
            .broadcast(vec![signed_message("m", &[("st1a", KEY_A)])])
            .await;
        assert!(matches!(result, Err(BlockchainError::EmptyTransaction(_))));
    }

    #[tokio::test]
    async fn test_rejected_transaction() {
        let mut chain = MockChain::with_accounts(&["st1a"]);
        chain.code = 13;
        let result = builder(Arc::new(chain))
            .broadcast(vec![signed_message("m", &[("st1a", KEY_A)])])
            .await;
        assert!(matches!(result, Err(BlockchainError::Rejected { code: 13, .. })));
    }
}
