use crate::fee::fee_for_weight;
use crate::scanner::total_amount;
use crate::scanner::Utxo;
use crate::scanner::UtxoScanner;
use crate::swap::Preimage;
use crate::swap::SwapRecord;
use crate::Error;
use crate::ErrorContext;
use bitcoin::absolute::LockTime;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::hex::DisplayHex;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1;
use bitcoin::secp256k1::PublicKey;
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::FeeRate;
use bitcoin::Script;
use bitcoin::Sequence;
use bitcoin::Transaction;
use bitcoin::TxIn;
use bitcoin::TxOut;
use bitcoin::Txid;
use bitcoin::Weight;
use bitcoin::Witness;

/// DER-encoded ECDSA signature with the sighash byte, worst case.
pub const MAX_SIGNATURE_SIZE: usize = 73;

/// Enables `nLockTime` (and opts into replacement).
const SETTLEMENT_SEQUENCE: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;

/// Which spending condition of the swap script a settlement uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementKind {
    /// The service claims the deposit by revealing the preimage.
    Redeem,
    /// The client reclaims the deposit after the lock height.
    Refund,
}

#[derive(Debug, Clone, Copy)]
enum SpendPath<'a> {
    Redeem(&'a Preimage),
    Refund,
}

impl SpendPath<'_> {
    fn kind(&self) -> SettlementKind {
        match self {
            SpendPath::Redeem(_) => SettlementKind::Redeem,
            SpendPath::Refund => SettlementKind::Refund,
        }
    }

    /// The witness element that selects the branch of the swap script.
    fn branch_selector(&self) -> Vec<u8> {
        match self {
            SpendPath::Redeem(preimage) => preimage.as_bytes().to_vec(),
            SpendPath::Refund => Vec::new(),
        }
    }

    fn placeholder_selector(&self) -> Vec<u8> {
        match self {
            SpendPath::Redeem(_) => vec![0; crate::swap::PREIMAGE_SIZE],
            SpendPath::Refund => Vec::new(),
        }
    }
}

/// A fully signed, unbroadcast transaction spending a swap deposit.
#[derive(Debug, Clone)]
pub struct SettlementTransaction {
    tx: Transaction,
    kind: SettlementKind,
    fee: Amount,
    inputs: Vec<Utxo>,
}

impl SettlementTransaction {
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn into_tx(self) -> Transaction {
        self.tx
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn kind(&self) -> SettlementKind {
        self.kind
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    pub fn output_amount(&self) -> Amount {
        self.tx.output.iter().map(|o| o.value).sum()
    }

    pub fn serialize(&self) -> Vec<u8> {
        bitcoin::consensus::serialize(&self.tx)
    }
}

/// Build and sign a transaction sending every output in `utxos` to `destination` through the
/// redeem path of the swap.
///
/// The preimage is checked before anything else.
pub fn build_redeem_transaction<S>(
    record: &SwapRecord,
    preimage: &Preimage,
    destination: &Address,
    fee_rate: FeeRate,
    utxos: &[Utxo],
    sign_fn: S,
) -> Result<SettlementTransaction, Error>
where
    S: FnMut(secp256k1::Message) -> Result<secp256k1::ecdsa::Signature, Error>,
{
    verify_preimage(record, preimage)?;

    build_settlement(
        record,
        SpendPath::Redeem(preimage),
        destination,
        fee_rate,
        utxos,
        sign_fn,
    )
}

/// Build and sign a transaction sending every output in `utxos` to `destination` through the
/// refund path of the swap.
///
/// Fails without building anything if `current_height` is below the swap's lock height.
pub fn build_refund_transaction<S>(
    record: &SwapRecord,
    destination: &Address,
    fee_rate: FeeRate,
    current_height: u32,
    utxos: &[Utxo],
    sign_fn: S,
) -> Result<SettlementTransaction, Error>
where
    S: FnMut(secp256k1::Message) -> Result<secp256k1::ecdsa::Signature, Error>,
{
    verify_lock_expired(record, current_height)?;

    build_settlement(
        record,
        SpendPath::Refund,
        destination,
        fee_rate,
        utxos,
        sign_fn,
    )
}

/// Upper bound on the weight of a redeem transaction spending `n_inputs` outputs of the swap
/// to `destination`.
pub fn estimate_redeem_weight(
    record: &SwapRecord,
    destination: &Script,
    n_inputs: usize,
) -> Result<Weight, Error> {
    let placeholder = Preimage::new([0; crate::swap::PREIMAGE_SIZE]);

    estimate_weight(record, SpendPath::Redeem(&placeholder), destination, n_inputs)
}

/// Upper bound on the weight of a refund transaction spending `n_inputs` outputs of the swap
/// to `destination`.
pub fn estimate_refund_weight(
    record: &SwapRecord,
    destination: &Script,
    n_inputs: usize,
) -> Result<Weight, Error> {
    estimate_weight(record, SpendPath::Refund, destination, n_inputs)
}

/// The fee a redeem of `utxos` to `destination` would pay at `fee_rate`.
pub fn redeem_fee(
    record: &SwapRecord,
    destination: &Script,
    fee_rate: FeeRate,
    utxos: &[Utxo],
) -> Result<Amount, Error> {
    if utxos.is_empty() {
        return Err(Error::insufficient_funds(format!(
            "no unspent outputs at swap address {}",
            record.address()
        )));
    }

    let weight = estimate_redeem_weight(record, destination, utxos.len())?;

    fee_for_weight(fee_rate, weight)
}

/// Fails with an invalid-preimage error unless `preimage` hashes to the swap's payment hash.
pub fn verify_preimage(record: &SwapRecord, preimage: &Preimage) -> Result<(), Error> {
    if preimage.hash() != record.hash() {
        tracing::warn!(
            hash = %record.hash(),
            provided_hash = %preimage.hash(),
            "Rejected redeem attempt with wrong preimage"
        );

        return Err(Error::invalid_preimage(format!(
            "preimage does not match payment hash {}",
            record.hash()
        )));
    }

    Ok(())
}

pub fn verify_lock_expired(record: &SwapRecord, current_height: u32) -> Result<(), Error> {
    if current_height < record.lock_height() {
        return Err(Error::lock_not_expired(format!(
            "refund of {} is locked until height {}, current height is {current_height}",
            record.hash(),
            record.lock_height()
        )));
    }

    Ok(())
}

fn unsigned_settlement(
    record: &SwapRecord,
    path: SpendPath,
    destination: &Script,
    outpoints: impl Iterator<Item = bitcoin::OutPoint>,
    value: Amount,
) -> Result<Transaction, Error> {
    let lock_time = match path {
        SpendPath::Redeem(_) => LockTime::ZERO,
        SpendPath::Refund => {
            LockTime::from_height(record.lock_height()).map_err(Error::transaction)?
        }
    };

    Ok(Transaction {
        version: transaction::Version::TWO,
        lock_time,
        input: outpoints
            .map(|previous_output| TxIn {
                previous_output,
                sequence: SETTLEMENT_SEQUENCE,
                ..Default::default()
            })
            .collect(),
        output: vec![TxOut {
            value,
            script_pubkey: destination.to_owned(),
        }],
    })
}

fn estimate_weight(
    record: &SwapRecord,
    path: SpendPath,
    destination: &Script,
    n_inputs: usize,
) -> Result<Weight, Error> {
    let placeholder_outpoints = (0..n_inputs).map(|vout| bitcoin::OutPoint {
        txid: Txid::all_zeros(),
        vout: vout as u32,
    });

    let mut tx = unsigned_settlement(record, path, destination, placeholder_outpoints, Amount::ZERO)?;

    let witness_script = record.script().witness_script();
    for input in tx.input.iter_mut() {
        input.witness = Witness::from_slice(&[
            vec![0; MAX_SIGNATURE_SIZE],
            path.placeholder_selector(),
            witness_script.to_bytes(),
        ]);
    }

    Ok(tx.weight())
}

fn build_settlement<S>(
    record: &SwapRecord,
    path: SpendPath,
    destination: &Address,
    fee_rate: FeeRate,
    utxos: &[Utxo],
    mut sign_fn: S,
) -> Result<SettlementTransaction, Error>
where
    S: FnMut(secp256k1::Message) -> Result<secp256k1::ecdsa::Signature, Error>,
{
    if utxos.is_empty() {
        return Err(Error::insufficient_funds(format!(
            "no unspent outputs at swap address {}",
            record.address()
        )));
    }

    let destination_script = destination.script_pubkey();

    let total = total_amount(utxos)?;
    let weight = estimate_weight(record, path, &destination_script, utxos.len())?;
    let fee = fee_for_weight(fee_rate, weight)?;

    let dust_limit = destination_script.minimal_non_dust();
    let value = total
        .checked_sub(fee)
        .filter(|value| *value >= dust_limit)
        .ok_or_else(|| {
            Error::insufficient_funds(format!(
                "deposit of {total} cannot pay fee of {fee} and leave at least {dust_limit}"
            ))
        })?;

    let mut tx = unsigned_settlement(
        record,
        path,
        &destination_script,
        utxos.iter().map(|u| u.outpoint),
        value,
    )?;

    let witness_script = record.script().witness_script();
    let signer_pk = match path {
        SpendPath::Redeem(_) => record.params().service_pk(),
        SpendPath::Refund => record.params().client_pk(),
    };

    let secp = Secp256k1::verification_only();
    let mut witnesses = Vec::with_capacity(utxos.len());
    {
        let mut cache = SighashCache::new(&tx);
        for (i, utxo) in utxos.iter().enumerate() {
            let sighash = cache
                .p2wsh_signature_hash(i, witness_script, utxo.amount, EcdsaSighashType::All)
                .map_err(Error::transaction)
                .with_context(|| format!("failed to compute sighash for input {i}"))?;

            let msg = secp256k1::Message::from_digest(sighash.to_byte_array());

            let signature = sign_fn(msg)
                .with_context(|| format!("failed to sign input {}", utxo.outpoint))?;

            verify_signature(&secp, &msg, &signature, &signer_pk)
                .with_context(|| format!("failed to verify own signature for input {i}"))?;

            let signature = ecdsa::Signature {
                signature,
                sighash_type: EcdsaSighashType::All,
            };

            witnesses.push(Witness::from_slice(&[
                signature.to_vec(),
                path.branch_selector(),
                witness_script.to_bytes(),
            ]));
        }
    }

    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }

    let raw_tx = bitcoin::consensus::serialize(&tx);
    tracing::debug!(
        kind = ?path.kind(),
        hash = %record.hash(),
        txid = %tx.compute_txid(),
        %fee,
        %value,
        raw_tx = %raw_tx.as_hex(),
        "Built settlement transaction"
    );

    Ok(SettlementTransaction {
        tx,
        kind: path.kind(),
        fee,
        inputs: utxos.to_vec(),
    })
}

fn verify_signature(
    secp: &Secp256k1<secp256k1::VerifyOnly>,
    msg: &secp256k1::Message,
    signature: &secp256k1::ecdsa::Signature,
    pk: &PublicKey,
) -> Result<(), Error> {
    secp.verify_ecdsa(msg, signature, pk).map_err(Error::signing)
}

/// Builds settlements against whatever is currently unspent at a swap's address.
#[derive(Clone)]
pub struct SettlementBuilder {
    scanner: UtxoScanner,
}

impl SettlementBuilder {
    pub fn new(scanner: UtxoScanner) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &UtxoScanner {
        &self.scanner
    }

    pub fn build_redeem<S>(
        &self,
        record: &SwapRecord,
        preimage: &Preimage,
        destination: &Address,
        fee_rate: FeeRate,
        sign_fn: S,
    ) -> Result<SettlementTransaction, Error>
    where
        S: FnMut(secp256k1::Message) -> Result<secp256k1::ecdsa::Signature, Error>,
    {
        // Before scanning: a wrong preimage must not cost a chain query.
        verify_preimage(record, preimage)?;

        let utxos = self.scanner.scan_swap(record)?.collect::<Vec<_>>();

        build_redeem_transaction(record, preimage, destination, fee_rate, &utxos, sign_fn)
    }

    pub fn build_refund<S>(
        &self,
        record: &SwapRecord,
        destination: &Address,
        fee_rate: FeeRate,
        current_height: u32,
        sign_fn: S,
    ) -> Result<SettlementTransaction, Error>
    where
        S: FnMut(secp256k1::Message) -> Result<secp256k1::ecdsa::Signature, Error>,
    {
        verify_lock_expired(record, current_height)?;

        let utxos = self.scanner.scan_swap(record)?.collect::<Vec<_>>();

        build_refund_transaction(
            record,
            destination,
            fee_rate,
            current_height,
            &utxos,
            sign_fn,
        )
    }

    pub fn redeem_fee(
        &self,
        record: &SwapRecord,
        destination: &Script,
        fee_rate: FeeRate,
    ) -> Result<Amount, Error> {
        let utxos = self.scanner.scan_swap(record)?.collect::<Vec<_>>();

        redeem_fee(record, destination, fee_rate, &utxos)
    }
}
