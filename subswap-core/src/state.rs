use crate::scanner::total_amount;
use crate::scanner::Utxo;
use crate::settlement::SettlementKind;
use crate::swap::SwapRecord;
use crate::swap::PREIMAGE_SIZE;
use crate::Error;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::Amount;
use bitcoin::Transaction;
use bitcoin::Txid;

/// The state of a swap as observed on chain.
///
/// The engine never drives these transitions. They are read back from the chain every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStatus {
    /// No deposit seen at the swap address.
    Initialized,
    /// At least one confirmed, unspent deposit.
    Funded { amount: Amount },
    Redeemed { txid: Txid },
    Refunded { txid: Txid },
}

impl SwapStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, SwapStatus::Redeemed { .. } | SwapStatus::Refunded { .. })
    }
}

/// Work out which path of `record`'s script, if any, `tx` spends.
///
/// A spending input carries `[signature, selector, witness_script]`. A selector that hashes to the
/// swap's payment hash marks a redeem. An empty one marks a refund.
pub fn classify_spend(record: &SwapRecord, tx: &Transaction) -> Option<SettlementKind> {
    let witness_script = record.script().witness_script().as_bytes();

    tx.input.iter().find_map(|input| {
        let witness = &input.witness;
        if witness.len() != 3 || witness.nth(2)? != witness_script {
            return None;
        }

        match witness.nth(1)? {
            [] => Some(SettlementKind::Refund),
            selector
                if selector.len() == PREIMAGE_SIZE
                    && sha256::Hash::hash(selector) == record.hash() =>
            {
                Some(SettlementKind::Redeem)
            }
            _ => None,
        }
    })
}

/// Combine what is unspent at the swap address with what has spent from it.
///
/// A settlement takes precedence over any deposit that arrived after it.
pub fn swap_status(
    record: &SwapRecord,
    unspent: &[Utxo],
    spends: &[Transaction],
) -> Result<SwapStatus, Error> {
    for tx in spends {
        match classify_spend(record, tx) {
            Some(SettlementKind::Redeem) => {
                return Ok(SwapStatus::Redeemed {
                    txid: tx.compute_txid(),
                })
            }
            Some(SettlementKind::Refund) => {
                return Ok(SwapStatus::Refunded {
                    txid: tx.compute_txid(),
                })
            }
            None => {}
        }
    }

    if unspent.is_empty() {
        return Ok(SwapStatus::Initialized);
    }

    Ok(SwapStatus::Funded {
        amount: total_amount(unspent)?,
    })
}
