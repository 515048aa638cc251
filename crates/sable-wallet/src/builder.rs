//! Transaction construction and signing.
//!
//! Builder flow: add recipients, build against a set of spendable
//! UTXOs (coin selection, change output), then sign every input with
//! the keychain. After signing, the txid is final.

use sable_core::address::Address;
use sable_core::crypto;
use sable_core::script;
use sable_core::types::{Transaction, TxInput, TxOutput};

use crate::coin_selection::{select_coins, CoinSelection, WalletUtxo};
use crate::error::WalletError;
use crate::keys::KeyChain;

/// A payment destination.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub address: Address,
    pub amount: u64,
}

/// An unsigned transaction with its selection breakdown.
#[derive(Debug)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub selection: CoinSelection,
}

/// Builds payment transactions from wallet UTXOs.
pub struct TransactionBuilder {
    recipients: Vec<Recipient>,
    fee: u64,
}

impl TransactionBuilder {
    pub fn new(fee: u64) -> Self {
        Self {
            recipients: Vec::new(),
            fee,
        }
    }

    pub fn add_recipient(mut self, address: Address, amount: u64) -> Self {
        self.recipients.push(Recipient { address, amount });
        self
    }

    /// Select coins and assemble the unsigned transaction.
    ///
    /// Each input carries its `prev_output` so [`sign`](Self::sign) can
    /// reconstruct sighashes. Change (when above dust) pays
    /// `change_address`.
    pub fn build(
        self,
        candidates: Vec<WalletUtxo>,
        change_address: &Address,
    ) -> Result<UnsignedTransaction, WalletError> {
        if self.recipients.is_empty() {
            return Err(WalletError::NoRecipients);
        }
        let target: u64 = self.recipients.iter().map(|r| r.amount).sum();
        let selection = select_coins(candidates, target, self.fee)?;

        let inputs = selection
            .selected
            .iter()
            .map(|utxo| {
                let mut input = TxInput::new(utxo.outpoint);
                input.prev_output = Some(utxo.entry.output.clone());
                input
            })
            .collect();

        let mut outputs: Vec<TxOutput> = self
            .recipients
            .iter()
            .map(|r| TxOutput {
                value: r.amount,
                script_pubkey: r.address.script_pubkey(),
            })
            .collect();
        if selection.change > 0 {
            outputs.push(TxOutput {
                value: selection.change,
                script_pubkey: change_address.script_pubkey(),
            });
        }

        Ok(UnsignedTransaction {
            tx: Transaction {
                version: 1,
                inputs,
                outputs,
                locktime: 0,
            },
            selection,
        })
    }

    /// Sign every input with keys from the chain. Returns the signed
    /// transaction; its txid is stable from here on.
    pub fn sign(
        mut unsigned: UnsignedTransaction,
        keychain: &KeyChain,
    ) -> Result<Transaction, WalletError> {
        for index in 0..unsigned.tx.inputs.len() {
            let pubkey_hash = unsigned.tx.inputs[index]
                .prev_output
                .as_ref()
                .and_then(|out| script::extract_pubkey_hash(&out.script_pubkey))
                .ok_or(WalletError::SigningFailed {
                    index,
                    reason: "input does not pay a P2PKH script".into(),
                })?;
            let keypair = keychain
                .key_for_pubkey_hash(&pubkey_hash)
                .ok_or_else(|| WalletError::UnknownKey(hex::encode(pubkey_hash)))?;
            crypto::sign_input(&mut unsigned.tx, index, keypair).map_err(|e| {
                WalletError::SigningFailed {
                    index,
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(unsigned.tx)
    }
}
