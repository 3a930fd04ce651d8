//! Static table of chain event handlers.
//!
//! Each handler names the event whose attributes it reads, the attributes a
//! sub-event must carry, the indexing-service path it notifies and the
//! transform from aligned tuples to the JSON body.

use serde::Serialize;

use crate::blockchain::types::Amount;
use crate::events::types::Tuple;

const BOND_STATUS_BONDED: &str = "BOND_STATUS_BONDED";

/// Message action of EVM transactions; prepayments made through a contract
/// arrive under it.
pub const EVM_TX_ACTION: &str = "/stratos.evm.v1.MsgEthereumTx";

/// Serialized notification plus the number of tuples it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub accepted: usize,
    pub body: Vec<u8>,
}

pub type Transform = fn(&str, &[Tuple]) -> Result<Notification, serde_json::Error>;

#[derive(Debug, Clone, Copy)]
pub struct HandlerSpec {
    /// Message action subscribed to.
    pub event_type: &'static str,
    /// Attribute prefix in the event map.
    pub event: &'static str,
    pub required: &'static [&'static str],
    pub endpoint: &'static str,
    pub transform: Transform,
    /// Tuples are filtered on purpose, so fewer accepted than received is expected.
    pub selective: bool,
}

pub const HANDLERS: &[HandlerSpec] = &[
    HandlerSpec {
        event_type: "create_resource_node",
        event: "create_resource_node",
        required: &["network_address", "pub_key", "ozone_limit_changes", "initial_deposit"],
        endpoint: "/pp/activated",
        transform: activated_pp,
        selective: false,
    },
    HandlerSpec {
        event_type: "update_resource_node",
        event: "update_resource_node",
        required: &["sender", "network_address", "beneficiary_address"],
        endpoint: "/pp/updateBeneficiaryAddress",
        transform: updated_beneficiary,
        selective: false,
    },
    HandlerSpec {
        event_type: "update_resource_node_deposit",
        event: "update_resource_node_deposit",
        required: DEPOSIT_ATTRIBUTES,
        endpoint: "/pp/updatedDeposit",
        transform: updated_pp_deposit,
        selective: false,
    },
    HandlerSpec {
        event_type: "unbonding_resource_node",
        event: "unbonding_resource_node",
        required: &["resource_node", "unbonding_mature_time", "deposit_to_remove"],
        endpoint: "/pp/unbonding",
        transform: unbonding_pp,
        selective: false,
    },
    HandlerSpec {
        event_type: "complete_unbonding_resource_node",
        event: "complete_unbonding_resource_node",
        required: &["network_address"],
        endpoint: "/pp/deactivated",
        transform: deactivated_pp,
        selective: false,
    },
    HandlerSpec {
        event_type: "update_meta_node_deposit",
        event: "update_meta_node_deposit",
        required: DEPOSIT_ATTRIBUTES,
        endpoint: "/chain/updatedDeposit",
        transform: updated_sp_deposit,
        selective: false,
    },
    HandlerSpec {
        event_type: "unbonding_meta_node",
        event: "unbonding_meta_node",
        required: &["meta_node", "unbonding_mature_time", "deposit_to_remove"],
        endpoint: "/chain/unbonding",
        transform: unbonding_sp,
        selective: false,
    },
    HandlerSpec {
        event_type: "meta_node_reg_vote",
        event: "meta_node_reg_vote",
        required: &["candidate_network_address", "candidate_status", "ozone_limit_changes"],
        endpoint: "/chain/activated",
        transform: activated_sp,
        selective: false,
    },
    HandlerSpec {
        event_type: "SdsPrepayTx",
        event: "Prepay",
        required: PREPAY_ATTRIBUTES,
        endpoint: "/pp/prepaid",
        transform: prepaid,
        selective: false,
    },
    HandlerSpec {
        event_type: EVM_TX_ACTION,
        event: "Prepay",
        required: PREPAY_ATTRIBUTES,
        endpoint: "/pp/prepaid",
        transform: prepaid,
        selective: false,
    },
    HandlerSpec {
        event_type: "FileUploadTx",
        event: "FileUpload",
        required: &["reporter", "uploader", "file_hash"],
        endpoint: "/pp/uploaded",
        transform: uploaded,
        selective: false,
    },
    HandlerSpec {
        event_type: "volume_report",
        event: "volume_report",
        required: &["epoch"],
        endpoint: "/volume/reported",
        transform: volume_reported,
        selective: false,
    },
    HandlerSpec {
        event_type: "slashing_resource_node",
        event: "slashing",
        required: &["network_address", "suspend", "amount"],
        endpoint: "/pp/slashed",
        transform: slashed_pp,
        selective: false,
    },
    HandlerSpec {
        event_type: "update_effective_deposit",
        event: "update_effective_deposit",
        required: &["network_address", "is_unsuspended", "effective_deposit_after"],
        endpoint: "/pp/updatedEffectiveDeposit",
        transform: updated_effective_deposit,
        selective: true,
    },
];

const PREPAY_ATTRIBUTES: &[&str] = &["sender", "beneficiary", "purchased_noz"];

const DEPOSIT_ATTRIBUTES: &[&str] = &[
    "network_address",
    "ozone_limit_changes",
    "deposit_delta",
    "current_deposit",
    "available_token_before",
    "available_token_after",
];

#[derive(Serialize)]
struct PpList<T> {
    pp_list: Vec<T>,
}

#[derive(Serialize)]
struct SpList<T> {
    sp_list: Vec<T>,
}

#[derive(Serialize)]
struct TxPpList<'a, T> {
    pp_list: Vec<T>,
    tx_hash: &'a str,
}

#[derive(Serialize)]
struct ActivatedPp<'a> {
    p2p_address: &'a str,
    p2p_pubkey: String,
    ozone_limit_changes: &'a str,
    tx_hash: &'a str,
    initial_deposit: &'a str,
}

#[derive(Serialize)]
struct UpdatedBeneficiary<'a> {
    p2p_address: &'a str,
    beneficiary_address: &'a str,
}

#[derive(Serialize)]
struct UpdatedDeposit<'a> {
    p2p_address: &'a str,
    ozone_limit_changes: &'a str,
    deposit_delta: &'a str,
    current_deposit: &'a str,
    available_token_before: &'a str,
    available_token_after: &'a str,
    tx_hash: &'a str,
}

#[derive(Serialize)]
struct Unbonding<'a> {
    p2p_address: &'a str,
    unbonding_mature_time: &'a str,
    tx_hash: &'a str,
    deposit_to_remove: &'a str,
}

#[derive(Serialize)]
struct AddressWithTx<'a> {
    p2p_address: &'a str,
    tx_hash: &'a str,
}

#[derive(Serialize)]
struct Prepaid<'a> {
    wallet_list: Vec<PrepaidWallet<'a>>,
}

#[derive(Serialize)]
struct PrepaidWallet<'a> {
    wallet_address: &'a str,
    purchased_uoz: &'a str,
    tx_hash: &'a str,
}

#[derive(Serialize)]
struct Uploaded<'a> {
    upload_list: Vec<UploadedFile<'a>>,
}

#[derive(Serialize)]
struct UploadedFile<'a> {
    reporter_address: &'a str,
    uploader_address: &'a str,
    file_hash: &'a str,
    tx_hash: &'a str,
}

#[derive(Serialize)]
struct VolumeReported<'a> {
    epochs: Vec<&'a str>,
}

#[derive(Serialize)]
struct SlashedPp<'a> {
    p2p_address: &'a str,
    query_first: bool,
    suspended: bool,
    slashed_amt: Amount,
}

#[derive(Serialize)]
struct EffectiveDepositPp<'a> {
    p2p_address: &'a str,
    is_unsuspended_during_update: bool,
    effective_deposit_after: Amount,
}

fn field<'a>(tuple: &'a Tuple, attribute: &str) -> &'a str {
    tuple.get(attribute).map(String::as_str).unwrap_or_default()
}

/// Accepts the same spellings as the chain's boolean formatter.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Re-encode a hex public key, rejecting anything that is not hex.
fn normalize_hex_pubkey(value: &str) -> Option<String> {
    hex::decode(value).ok().map(hex::encode)
}

fn encode<T: Serialize>(accepted: usize, body: &T) -> Result<Notification, serde_json::Error> {
    Ok(Notification {
        accepted,
        body: serde_json::to_vec(body)?,
    })
}

fn activated_pp(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list: Vec<_> = tuples
        .iter()
        .filter_map(|t| {
            let Some(p2p_pubkey) = normalize_hex_pubkey(field(t, "pub_key")) else {
                tracing::error!(tx_hash, pub_key = field(t, "pub_key"), "Invalid P2P pubkey hex");
                return None;
            };
            Some(ActivatedPp {
                p2p_address: field(t, "network_address"),
                p2p_pubkey,
                ozone_limit_changes: field(t, "ozone_limit_changes"),
                tx_hash,
                initial_deposit: field(t, "initial_deposit"),
            })
        })
        .collect();
    encode(pp_list.len(), &PpList { pp_list })
}

fn updated_beneficiary(_tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list: Vec<_> = tuples
        .iter()
        .map(|t| UpdatedBeneficiary {
            p2p_address: field(t, "network_address"),
            beneficiary_address: field(t, "beneficiary_address"),
        })
        .collect();
    encode(pp_list.len(), &PpList { pp_list })
}

fn deposit_updates<'a>(tx_hash: &'a str, tuples: &'a [Tuple]) -> Vec<UpdatedDeposit<'a>> {
    tuples
        .iter()
        .map(|t| UpdatedDeposit {
            p2p_address: field(t, "network_address"),
            ozone_limit_changes: field(t, "ozone_limit_changes"),
            deposit_delta: field(t, "deposit_delta"),
            current_deposit: field(t, "current_deposit"),
            available_token_before: field(t, "available_token_before"),
            available_token_after: field(t, "available_token_after"),
            tx_hash,
        })
        .collect()
}

fn updated_pp_deposit(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list = deposit_updates(tx_hash, tuples);
    encode(pp_list.len(), &PpList { pp_list })
}

fn updated_sp_deposit(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let sp_list = deposit_updates(tx_hash, tuples);
    encode(sp_list.len(), &SpList { sp_list })
}

fn unbondings<'a>(tx_hash: &'a str, tuples: &'a [Tuple], node: &str) -> Vec<Unbonding<'a>> {
    tuples
        .iter()
        .map(|t| Unbonding {
            p2p_address: field(t, node),
            unbonding_mature_time: field(t, "unbonding_mature_time"),
            tx_hash,
            deposit_to_remove: field(t, "deposit_to_remove"),
        })
        .collect()
}

fn unbonding_pp(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list = unbondings(tx_hash, tuples, "resource_node");
    encode(pp_list.len(), &PpList { pp_list })
}

fn unbonding_sp(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let sp_list = unbondings(tx_hash, tuples, "meta_node");
    encode(sp_list.len(), &SpList { sp_list })
}

fn deactivated_pp(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list: Vec<_> = tuples
        .iter()
        .map(|t| AddressWithTx {
            p2p_address: field(t, "network_address"),
            tx_hash,
        })
        .collect();
    encode(pp_list.len(), &PpList { pp_list })
}

fn activated_sp(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let sp_list: Vec<_> = tuples
        .iter()
        .filter_map(|t| {
            let candidate = field(t, "candidate_network_address");
            if field(t, "candidate_status") != BOND_STATUS_BONDED {
                tracing::debug!(candidate, "Meta node candidate needs more votes before activation");
                return None;
            }
            Some(AddressWithTx {
                p2p_address: candidate,
                tx_hash,
            })
        })
        .collect();
    encode(sp_list.len(), &SpList { sp_list })
}

fn prepaid(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let wallet_list: Vec<_> = tuples
        .iter()
        .map(|t| PrepaidWallet {
            wallet_address: field(t, "beneficiary"),
            purchased_uoz: field(t, "purchased_noz"),
            tx_hash,
        })
        .collect();
    encode(wallet_list.len(), &Prepaid { wallet_list })
}

fn uploaded(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let upload_list: Vec<_> = tuples
        .iter()
        .map(|t| UploadedFile {
            reporter_address: field(t, "reporter"),
            uploader_address: field(t, "uploader"),
            file_hash: field(t, "file_hash"),
            tx_hash,
        })
        .collect();
    encode(upload_list.len(), &Uploaded { upload_list })
}

fn volume_reported(_tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let epochs: Vec<_> = tuples.iter().map(|t| field(t, "epoch")).collect();
    encode(epochs.len(), &VolumeReported { epochs })
}

fn slashed_pp(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list: Vec<_> = tuples
        .iter()
        .filter_map(|t| {
            let Some(suspended) = parse_bool(field(t, "suspend")) else {
                tracing::debug!(tx_hash, value = field(t, "suspend"), "Invalid suspend flag in slashing event");
                return None;
            };
            let Some(slashed_amt) = Amount::parse(field(t, "amount")) else {
                tracing::debug!(tx_hash, value = field(t, "amount"), "Invalid slashed amount in slashing event");
                return None;
            };
            Some(SlashedPp {
                p2p_address: field(t, "network_address"),
                query_first: false,
                suspended,
                slashed_amt,
            })
        })
        .collect();
    encode(pp_list.len(), &TxPpList { pp_list, tx_hash })
}

fn updated_effective_deposit(tx_hash: &str, tuples: &[Tuple]) -> Result<Notification, serde_json::Error> {
    let pp_list: Vec<_> = tuples
        .iter()
        .filter_map(|t| {
            let address = field(t, "network_address");
            let Some(unsuspended) = parse_bool(field(t, "is_unsuspended")) else {
                tracing::debug!(tx_hash, address, "Invalid is_unsuspended flag in update_effective_deposit event");
                return None;
            };
            let Some(effective_deposit_after) = Amount::parse(field(t, "effective_deposit_after")) else {
                tracing::debug!(tx_hash, address, "Invalid effective_deposit_after in update_effective_deposit event");
                return None;
            };
            tracing::debug!(
                address,
                unsuspended,
                effective_deposit_after = effective_deposit_after.as_str(),
                "Effective deposit updated"
            );
            // Only unsuspended nodes are of interest to the indexing service.
            unsuspended.then_some(EffectiveDepositPp {
                p2p_address: address,
                is_unsuspended_during_update: true,
                effective_deposit_after,
            })
        })
        .collect();
    encode(pp_list.len(), &TxPpList { pp_list, tx_hash })
}

/// Handler registered for a message action.
pub fn find(event_type: &str) -> Option<&'static HandlerSpec> {
    HANDLERS.iter().find(|h| h.event_type == event_type)
}
