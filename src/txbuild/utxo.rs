//! UTXO input selection (§4.5 edge-case policy): greatest-first until the
//! selected sum covers `amount + estimatedFee`; dust change is folded into
//! the fee rather than returned as a change output.

use crate::error::{Error, ErrorContext};
use crate::rpc::Utxo;
use crate::vault::{BlockchainSpecific, UtxoInput};

use super::parse_u128;

/// Below this many sats a change output is considered dust and is folded
/// into the miner fee instead of being returned to the sender.
const DUST_FLOOR_SATS: u64 = 546;

fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    // Typical P2WPKH-in/P2WPKH-out virtual size approximation.
    10 + 68 * num_inputs as u64 + 31 * num_outputs as u64
}

pub fn select_inputs(
    unspent: &[Utxo],
    amount: &str,
    fee_sat_per_vbyte: u64,
    chain: &str,
) -> Result<BlockchainSpecific, Error> {
    let target: u128 = parse_u128(amount, chain)?;

    let mut candidates: Vec<&Utxo> = unspent.iter().collect();
    candidates.sort_by(|a, b| b.amount_sats.cmp(&a.amount_sats));

    let mut selected: Vec<&Utxo> = Vec::new();
    let mut sum: u128 = 0;
    for utxo in candidates {
        selected.push(utxo);
        sum += utxo.amount_sats as u128;

        // Two outputs assumed (payment + change) until we know the change
        // is dust, at which point the fee estimate effectively absorbs it.
        let fee = estimate_vsize(selected.len(), 2) as u128 * fee_sat_per_vbyte as u128;
        if sum >= target + fee {
            let change = sum - target - fee;
            let outputs = if change > 0 && change < DUST_FLOOR_SATS as u128 { 1 } else { 2 };
            let final_fee = estimate_vsize(selected.len(), outputs) as u128 * fee_sat_per_vbyte as u128;
            if sum >= target + final_fee {
                return Ok(BlockchainSpecific::Utxo {
                    inputs: selected
                        .into_iter()
                        .map(|u| UtxoInput {
                            txid: u.txid.clone(),
                            vout: u.vout,
                            amount_sats: u.amount_sats,
                            derivation_index: 0,
                        })
                        .collect(),
                    fee_sat_per_vbyte,
                });
            }
        }
    }

    Err(Error::InsufficientFunds {
        available: sum.to_string(),
        required: target.to_string(),
        ctx: ErrorContext::new("txbuild::utxo::select_inputs").chain(chain),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(sats: u64, vout: u32) -> Utxo {
        Utxo {
            txid: format!("tx{vout}"),
            vout,
            amount_sats: sats,
        }
    }

    #[test]
    fn selects_greatest_first_until_covered() {
        let unspent = vec![utxo(1_000, 0), utxo(50_000, 1), utxo(20_000, 2)];
        let result = select_inputs(&unspent, "30000", 10, "bitcoin").unwrap();
        match result {
            BlockchainSpecific::Utxo { inputs, .. } => {
                assert_eq!(inputs.len(), 1);
                assert_eq!(inputs[0].amount_sats, 50_000);
            }
            _ => panic!("expected utxo variant"),
        }
    }

    #[test]
    fn insufficient_funds_is_reported() {
        let unspent = vec![utxo(100, 0)];
        let err = select_inputs(&unspent, "30000", 10, "bitcoin").unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
    }
}
