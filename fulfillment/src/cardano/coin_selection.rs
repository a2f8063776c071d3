//! First-fit greedy input selection over the hot wallet's UTXO set.
//!
//! UTXOs are visited in the order the node returned them; asset quantities
//! are decremented in place as they are claimed, which is why callers must
//! re-fetch the UTXO set before building a second transaction over it.

use crate::constants::{LOVELACE_PER_ADA, MIN_ADA};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LOVELACE: &str = "lovelace";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub currency_id: String,
    pub quantity: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub assets: Vec<Asset>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Utxos {
    pub utxos: Vec<Utxo>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("insufficient UTXOs to satisfy {currency_id} {quantity} requirement")]
pub struct InsufficientUtxos {
    pub currency_id: String,
    pub quantity: i64,
}

/// `--tx-in` and `--tx-out` arguments for `transaction build-raw`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionPlan {
    pub tx_ins: Vec<String>,
    pub tx_outs: Vec<String>,
}

/// Claims what the goal still needs from one UTXO. Returns the `--tx-in`
/// if the UTXO was touched and a change `--tx-out` back to the hot wallet
/// if it was only partially consumed.
fn process_utxo(
    utxo: &mut Utxo,
    current_tokens: &mut BTreeMap<String, i64>,
    goal_tokens: &BTreeMap<String, i64>,
    hot_wallet_address: &str,
) -> (Option<String>, Option<String>) {
    let mut partially_spent = false;
    let mut used_utxo = false;
    let asset_count = utxo.assets.len();
    for asset in utxo.assets.iter_mut() {
        // Do not use lovelace already paired with native tokens; pure-ada
        // UTXOs are reserved for the fee and dust payment.
        if asset.currency_id == LOVELACE && asset_count != 1 {
            continue;
        }

        let goal_quantity = match goal_tokens.get(&asset.currency_id) {
            Some(quantity) => *quantity,
            None => continue,
        };

        let current_quantity = current_tokens.entry(asset.currency_id.clone()).or_insert(0);
        if *current_quantity == goal_quantity {
            continue;
        }

        let needed = goal_quantity - *current_quantity;
        let amount_to_use = needed.min(asset.quantity);
        if asset.quantity > needed {
            partially_spent = true;
        }

        asset.quantity -= amount_to_use;
        *current_quantity += amount_to_use;
        used_utxo = true;

        // Ada must be left over from spent native tokens.
        if asset_count != 1 {
            partially_spent = true;
        }
    }

    let tx_out = if partially_spent {
        let mut out = hot_wallet_address.to_string();
        for asset in &utxo.assets {
            if asset.quantity > 0 {
                out = format!("{} + {} {}", out, asset.quantity, asset.currency_id);
            }
        }
        Some(out)
    } else {
        None
    };
    let tx_in = used_utxo.then(|| utxo.txid.clone());

    (tx_in, tx_out)
}

/// Selects inputs covering all of `goal_tokens` plus the minimum-ada dust
/// payment and lays out the outputs: change back to the hot wallet for every
/// partially consumed UTXO and one consolidated delivery output carrying
/// `MIN_ADA - fee` lovelace and all goal tokens.
pub fn plan_transaction(
    delivery_address: &str,
    hot_wallet_address: &str,
    goal_tokens: &BTreeMap<String, i64>,
    utxos: &mut Utxos,
    fee_lovelace: i64,
) -> Result<TransactionPlan, InsufficientUtxos> {
    let min_lovelace = MIN_ADA * LOVELACE_PER_ADA;
    let mut goal_tokens = goal_tokens.clone();
    goal_tokens.insert(LOVELACE.to_string(), min_lovelace);

    let mut current_tokens = BTreeMap::new();
    let mut tx_ins = Vec::new();
    let mut tx_outs = Vec::new();
    for utxo in utxos.utxos.iter_mut() {
        let (tx_in, tx_out) =
            process_utxo(utxo, &mut current_tokens, &goal_tokens, hot_wallet_address);
        if let Some(tx_in) = tx_in {
            tx_ins.push(tx_in);
        }
        if let Some(tx_out) = tx_out {
            tx_outs.push(tx_out);
        }
    }

    for (currency_id, quantity) in &goal_tokens {
        if current_tokens.get(currency_id).copied().unwrap_or(0) < *quantity {
            return Err(InsufficientUtxos {
                currency_id: currency_id.clone(),
                quantity: *quantity,
            });
        }
    }

    let min_ada_less_fee = min_lovelace - fee_lovelace;
    let mut delivery = format!("{}+{}", delivery_address, min_ada_less_fee);
    for (currency_id, quantity) in &goal_tokens {
        if currency_id == LOVELACE {
            continue;
        }
        delivery = format!("{} + {} {}", delivery, quantity, currency_id);
    }
    tx_outs.push(delivery);

    Ok(TransactionPlan { tx_ins, tx_outs })
}
