//! Transaction validation.
//!
//! Two levels:
//!
//! - **Structural** ([`validate_transaction_structure`]): context-free
//!   checks on shape and internal consistency.
//! - **Contextual** ([`validate_transaction`]): UTXO-aware checks —
//!   signature verification, coinbase maturity, value conservation.
//!
//! Coinbase transactions are only structurally validated here; the reward
//! bound is enforced during block validation where the fee total is known.

use std::collections::HashSet;

use crate::constants::{MAX_COINBASE_TAG, MAX_TX_SIZE};
use crate::crypto;
use crate::error::TransactionError;
use crate::types::{OutPoint, Transaction, UtxoEntry};

/// Summary of a successfully validated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    /// Total value of all spent inputs.
    pub total_input: u64,
    /// Total value of all created outputs.
    pub total_output: u64,
    /// Fee: `total_input − total_output`.
    pub fee: u64,
}

/// Read the block height from a coinbase script_sig (4-byte LE prefix).
pub fn coinbase_height(script_sig: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = script_sig.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Build a coinbase script_sig: the height, then an arbitrary miner tag
/// (truncated to [`MAX_COINBASE_TAG`]).
pub fn coinbase_script_sig(height: u32, tag: &[u8]) -> Vec<u8> {
    let tag = &tag[..tag.len().min(MAX_COINBASE_TAG)];
    let mut script = Vec::with_capacity(4 + tag.len());
    script.extend_from_slice(&height.to_le_bytes());
    script.extend_from_slice(tag);
    script
}

/// Validate transaction structure (context-free).
pub fn validate_transaction_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    if tx.total_output_value().is_none() {
        return Err(TransactionError::ValueOverflow);
    }

    let size = tx.serialized_size();
    if size > MAX_TX_SIZE {
        return Err(TransactionError::Oversized {
            size,
            max: MAX_TX_SIZE,
        });
    }

    if tx.is_coinbase() {
        validate_coinbase_structure(tx)
    } else {
        validate_regular_structure(tx)
    }
}

/// Coinbase shape: one null-outpoint input whose script carries the
/// height prefix and at most [`MAX_COINBASE_TAG`] bytes of tag.
fn validate_coinbase_structure(tx: &Transaction) -> Result<(), TransactionError> {
    let script = &tx.inputs[0].script_sig;
    if script.len() < 4 {
        return Err(TransactionError::InvalidCoinbase(
            "script_sig shorter than height prefix".into(),
        ));
    }
    if script.len() > 4 + MAX_COINBASE_TAG {
        return Err(TransactionError::InvalidCoinbase(format!(
            "tag too large: {} > {MAX_COINBASE_TAG}",
            script.len() - 4,
        )));
    }
    Ok(())
}

fn validate_regular_structure(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.prev.is_null() {
            return Err(TransactionError::NullOutpoint(i));
        }
        if !seen.insert(input.prev) {
            return Err(TransactionError::DuplicateInput(input.prev.to_string()));
        }
    }
    Ok(())
}

/// Validate a non-coinbase transaction against the UTXO set.
///
/// `get_utxo` resolves an outpoint to its unspent output, letting the
/// caller layer any source (chain store, same-block outputs, mempool
/// parents). `spend_height` is the height the transaction would be
/// included at, used for the maturity check.
///
/// `check_sigs` is false when re-admitting transactions that already
/// validated once (mempool load from disk, reorg eviction).
pub fn validate_transaction<F>(
    tx: &Transaction,
    get_utxo: F,
    spend_height: u32,
    check_sigs: bool,
) -> Result<ValidatedTransaction, TransactionError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    if tx.is_coinbase() {
        return Err(TransactionError::InvalidCoinbase(
            "coinbase cannot be validated against the UTXO set".into(),
        ));
    }

    validate_transaction_structure(tx)?;

    let mut total_input: u64 = 0;
    for (i, input) in tx.inputs.iter().enumerate() {
        let utxo = get_utxo(&input.prev)
            .ok_or_else(|| TransactionError::MissingPrevOut(input.prev.to_string()))?;

        if !utxo.is_mature(spend_height) {
            return Err(TransactionError::ImmatureCoinbase {
                index: i,
                confirmations: utxo.confirmations(spend_height),
                required: crate::constants::COINBASE_MATURITY,
            });
        }

        if check_sigs {
            crypto::verify_input(tx, i, &utxo.output.script_pubkey)
                .map_err(|_| TransactionError::SigInvalid { index: i })?;
        }

        total_input = total_input
            .checked_add(utxo.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_output = tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;

    if total_output > total_input {
        return Err(TransactionError::InputsLessThanOutputs {
            inputs: total_input,
            outputs: total_output,
        });
    }

    Ok(ValidatedTransaction {
        total_input,
        total_output,
        fee: total_input - total_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, COINBASE_MATURITY};
    use crate::crypto::KeyPair;
    use crate::script;
    use crate::types::{Hash256, TxInput, TxOutput};
    use std::collections::HashMap;

    // --- Helpers ---

    fn utxo(value: u64, script_pubkey: Vec<u8>, height: u32, is_coinbase: bool) -> UtxoEntry {
        UtxoEntry {
            output: TxOutput { value, script_pubkey },
            height,
            is_coinbase,
        }
    }

    fn lookup(
        map: &HashMap<OutPoint, UtxoEntry>,
    ) -> impl Fn(&OutPoint) -> Option<UtxoEntry> + '_ {
        |op| map.get(op).cloned()
    }

    fn signed_spend(
        kp: &KeyPair,
        prev: OutPoint,
        prev_value: u64,
        out_value: u64,
    ) -> Transaction {
        let mut input = TxInput::new(prev);
        input.prev_output = Some(TxOutput {
            value: prev_value,
            script_pubkey: script::p2pkh_script(&kp.pubkey_hash()),
        });
        let mut tx = Transaction {
            version: 1,
            inputs: vec![input],
            outputs: vec![TxOutput {
                value: out_value,
                script_pubkey: script::p2pkh_script(&[0xBB; 20]),
            }],
            locktime: 0,
        };
        crypto::sign_input(&mut tx, 0, kp).unwrap();
        tx
    }

    fn sample_coinbase(height: u32) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev: OutPoint::null(),
                script_sig: coinbase_script_sig(height, b"sable"),
                sequence: 0xFFFF_FFFF,
                prev_output: None,
            }],
            outputs: vec![TxOutput {
                value: 100 * COIN,
                script_pubkey: script::p2pkh_script(&[0xAA; 20]),
            }],
            locktime: 0,
        }
    }

    // ------------------------------------------------------------------
    // Coinbase script helpers
    // ------------------------------------------------------------------

    #[test]
    fn coinbase_height_round_trips() {
        let script = coinbase_script_sig(123_456, b"tag");
        assert_eq!(coinbase_height(&script), Some(123_456));
    }

    #[test]
    fn coinbase_tag_truncated() {
        let script = coinbase_script_sig(1, &[0xCC; 500]);
        assert_eq!(script.len(), 4 + MAX_COINBASE_TAG);
    }

    #[test]
    fn coinbase_height_missing() {
        assert_eq!(coinbase_height(&[1, 2]), None);
    }

    // ------------------------------------------------------------------
    // Structural
    // ------------------------------------------------------------------

    #[test]
    fn empty_inputs_rejected() {
        let tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput { value: 1, script_pubkey: vec![] }],
            locktime: 0,
        };
        assert_eq!(
            validate_transaction_structure(&tx),
            Err(TransactionError::EmptyInputsOrOutputs)
        );
    }

    #[test]
    fn empty_outputs_rejected() {
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput::new(OutPoint { txid: Hash256([1; 32]), index: 0 })],
            outputs: vec![],
            locktime: 0,
        };
        assert_eq!(
            validate_transaction_structure(&tx),
            Err(TransactionError::EmptyInputsOrOutputs)
        );
    }

    #[test]
    fn output_overflow_rejected() {
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput::new(OutPoint { txid: Hash256([1; 32]), index: 0 })],
            outputs: vec![
                TxOutput { value: u64::MAX, script_pubkey: vec![] },
                TxOutput { value: 1, script_pubkey: vec![] },
            ],
            locktime: 0,
        };
        assert_eq!(
            validate_transaction_structure(&tx),
            Err(TransactionError::ValueOverflow)
        );
    }

    #[test]
    fn oversized_rejected() {
        let mut tx = sample_coinbase(1);
        tx.inputs[0].script_sig = coinbase_script_sig(1, b"x");
        tx.outputs[0].script_pubkey = vec![0; MAX_TX_SIZE];
        assert!(matches!(
            validate_transaction_structure(&tx),
            Err(TransactionError::Oversized { .. })
        ));
    }

    #[test]
    fn null_outpoint_in_regular_tx_rejected() {
        let mut tx = sample_coinbase(1);
        tx.inputs.push(TxInput::new(OutPoint { txid: Hash256([1; 32]), index: 0 }));
        // Two inputs → not coinbase, but input 0 still has a null prev.
        assert_eq!(
            validate_transaction_structure(&tx),
            Err(TransactionError::NullOutpoint(0))
        );
    }

    #[test]
    fn duplicate_inputs_rejected() {
        let op = OutPoint { txid: Hash256([1; 32]), index: 0 };
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput::new(op), TxInput::new(op)],
            outputs: vec![TxOutput { value: 1, script_pubkey: vec![] }],
            locktime: 0,
        };
        assert!(matches!(
            validate_transaction_structure(&tx),
            Err(TransactionError::DuplicateInput(_))
        ));
    }

    #[test]
    fn coinbase_structure_ok() {
        assert!(validate_transaction_structure(&sample_coinbase(7)).is_ok());
    }

    #[test]
    fn coinbase_short_script_rejected() {
        let mut tx = sample_coinbase(1);
        tx.inputs[0].script_sig = vec![1, 2];
        assert!(matches!(
            validate_transaction_structure(&tx),
            Err(TransactionError::InvalidCoinbase(_))
        ));
    }

    #[test]
    fn coinbase_oversized_tag_rejected() {
        let mut tx = sample_coinbase(1);
        let mut script = coinbase_script_sig(1, &[]);
        script.extend_from_slice(&[0u8; MAX_COINBASE_TAG + 1]);
        tx.inputs[0].script_sig = script;
        assert!(matches!(
            validate_transaction_structure(&tx),
            Err(TransactionError::InvalidCoinbase(_))
        ));
    }

    // ------------------------------------------------------------------
    // Contextual
    // ------------------------------------------------------------------

    #[test]
    fn valid_spend_accepted_with_fee() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let tx = signed_spend(&kp, op, 50 * COIN, 49 * COIN);

        let mut utxos = HashMap::new();
        utxos.insert(
            op,
            utxo(50 * COIN, script::p2pkh_script(&kp.pubkey_hash()), 1, false),
        );

        let validated = validate_transaction(&tx, lookup(&utxos), 10, true).unwrap();
        assert_eq!(validated.total_input, 50 * COIN);
        assert_eq!(validated.total_output, 49 * COIN);
        assert_eq!(validated.fee, COIN);
    }

    #[test]
    fn missing_prevout_rejected() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let tx = signed_spend(&kp, op, 50 * COIN, 49 * COIN);

        let utxos = HashMap::new();
        assert!(matches!(
            validate_transaction(&tx, lookup(&utxos), 10, true),
            Err(TransactionError::MissingPrevOut(_))
        ));
    }

    #[test]
    fn outputs_exceeding_inputs_rejected() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let tx = signed_spend(&kp, op, 50 * COIN, 51 * COIN);

        let mut utxos = HashMap::new();
        utxos.insert(
            op,
            utxo(50 * COIN, script::p2pkh_script(&kp.pubkey_hash()), 1, false),
        );
        assert!(matches!(
            validate_transaction(&tx, lookup(&utxos), 10, true),
            Err(TransactionError::InputsLessThanOutputs { .. })
        ));
    }

    #[test]
    fn bad_signature_rejected() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let mut tx = signed_spend(&kp, op, 50 * COIN, 49 * COIN);
        // Signature over different outputs.
        tx.outputs[0].value = 48 * COIN;

        let mut utxos = HashMap::new();
        utxos.insert(
            op,
            utxo(50 * COIN, script::p2pkh_script(&kp.pubkey_hash()), 1, false),
        );
        assert_eq!(
            validate_transaction(&tx, lookup(&utxos), 10, true),
            Err(TransactionError::SigInvalid { index: 0 })
        );
    }

    #[test]
    fn trusted_mode_skips_signatures() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let mut tx = signed_spend(&kp, op, 50 * COIN, 49 * COIN);
        tx.outputs[0].value = 48 * COIN; // invalidates the signature

        let mut utxos = HashMap::new();
        utxos.insert(
            op,
            utxo(50 * COIN, script::p2pkh_script(&kp.pubkey_hash()), 1, false),
        );
        assert!(validate_transaction(&tx, lookup(&utxos), 10, false).is_ok());
    }

    #[test]
    fn immature_coinbase_rejected_then_accepted() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let tx = signed_spend(&kp, op, 100 * COIN, 99 * COIN);

        let mut utxos = HashMap::new();
        utxos.insert(
            op,
            utxo(100 * COIN, script::p2pkh_script(&kp.pubkey_hash()), 10, true),
        );

        // 108 − 10 + 1 = 99 confirmations: one short.
        let err = validate_transaction(&tx, lookup(&utxos), 108, true).unwrap_err();
        assert_eq!(
            err,
            TransactionError::ImmatureCoinbase {
                index: 0,
                confirmations: 99,
                required: COINBASE_MATURITY,
            }
        );

        // 109 − 10 + 1 = 100: exactly mature.
        assert!(validate_transaction(&tx, lookup(&utxos), 109, true).is_ok());
    }

    #[test]
    fn coinbase_not_contextually_validatable() {
        let tx = sample_coinbase(1);
        let utxos = HashMap::new();
        assert!(matches!(
            validate_transaction(&tx, lookup(&utxos), 10, true),
            Err(TransactionError::InvalidCoinbase(_))
        ));
    }

    #[test]
    fn zero_fee_spend_is_legal() {
        let kp = KeyPair::generate();
        let op = OutPoint { txid: Hash256([0x11; 32]), index: 0 };
        let tx = signed_spend(&kp, op, 50 * COIN, 50 * COIN);

        let mut utxos = HashMap::new();
        utxos.insert(
            op,
            utxo(50 * COIN, script::p2pkh_script(&kp.pubkey_hash()), 1, false),
        );
        let validated = validate_transaction(&tx, lookup(&utxos), 10, true).unwrap();
        assert_eq!(validated.fee, 0);
    }
}
