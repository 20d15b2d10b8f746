use crate::index::SwapIndex;
use crate::swap::SwapRecord;
use crate::Error;
use crate::ErrorContext;
use crate::ErrorKind;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::OutPoint;
use bitcoin::Transaction;
use std::collections::HashSet;
use std::sync::Arc;

/// A confirmed, unspent output paying a swap address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub confirmation_height: u32,
}

/// Read-only access to a chain index.
pub trait ChainClient: Send + Sync {
    /// All confirmed outputs paying `address` that are still unspent, confirmed at or after
    /// `from_height`.
    fn unspent_outputs(&self, address: &Address, from_height: u32) -> Result<Vec<Utxo>, Error>;

    /// Confirmed transactions, at or after `from_height`, that spend outputs paying `address`.
    fn spending_transactions(
        &self,
        address: &Address,
        from_height: u32,
    ) -> Result<Vec<Transaction>, Error>;

    fn current_height(&self) -> Result<u32, Error>;
}

/// The outputs found by a single [`UtxoScanner::scan`], in ascending confirmation height.
#[derive(Debug, Clone)]
pub struct Utxos {
    inner: std::vec::IntoIter<Utxo>,
}

impl Iterator for Utxos {
    type Item = Utxo;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Utxos {}

/// Sum the amounts of `utxos`, failing instead of wrapping on overflow.
pub fn total_amount<'a>(utxos: impl IntoIterator<Item = &'a Utxo>) -> Result<Amount, Error> {
    utxos.into_iter().try_fold(Amount::ZERO, |acc, utxo| {
        acc.checked_add(utxo.amount)
            .ok_or_else(|| Error::transaction("total UTXO amount overflows"))
    })
}

fn into_chain_error(error: Error) -> Error {
    match error.kind() {
        ErrorKind::ChainQueryFailed => error,
        _ => Error::chain_query(error),
    }
}

/// Scopes chain queries to a single swap address.
#[derive(Clone)]
pub struct UtxoScanner {
    chain: Arc<dyn ChainClient>,
    index: SwapIndex,
}

impl UtxoScanner {
    pub fn new(chain: Arc<dyn ChainClient>, index: SwapIndex) -> Self {
        Self { chain, index }
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    pub fn index(&self) -> &SwapIndex {
        &self.index
    }

    /// Find every unspent output paying `address` confirmed at or after `from_height`.
    ///
    /// Results are deduplicated and ordered by confirmation height, then outpoint. Calling this
    /// repeatedly is safe.
    pub fn scan(&self, address: &Address, from_height: u32) -> Result<Utxos, Error> {
        let found = self
            .chain
            .unspent_outputs(address, from_height)
            .map_err(into_chain_error)
            .with_context(|| format!("failed to scan {address} from height {from_height}"))?;

        let mut seen = HashSet::new();
        let mut utxos = found
            .into_iter()
            .filter(|utxo| utxo.confirmation_height >= from_height)
            .filter(|utxo| seen.insert(utxo.outpoint))
            .collect::<Vec<_>>();

        utxos.sort_by(|a, b| {
            a.confirmation_height
                .cmp(&b.confirmation_height)
                .then_with(|| a.outpoint.txid.cmp(&b.outpoint.txid))
                .then_with(|| a.outpoint.vout.cmp(&b.outpoint.vout))
        });

        tracing::debug!(%address, from_height, n_utxos = utxos.len(), "Scanned swap address");

        Ok(Utxos {
            inner: utxos.into_iter(),
        })
    }

    /// Scan a swap's address from the height at which the swap was created.
    pub fn scan_swap(&self, record: &SwapRecord) -> Result<Utxos, Error> {
        self.scan(record.address(), record.creation_height())
    }

    /// The creation height and lock height of the swap that owns `address`.
    pub fn creation_height(&self, address: &Address) -> Result<(u32, u32), Error> {
        let record = self.index.find_by_address(address)?;

        Ok((record.creation_height(), record.lock_height()))
    }

    pub fn spending_transactions(&self, record: &SwapRecord) -> Result<Vec<Transaction>, Error> {
        self.chain
            .spending_transactions(record.address(), record.creation_height())
            .map_err(into_chain_error)
            .with_context(|| format!("failed to find spends of {}", record.address()))
    }

    pub fn current_height(&self) -> Result<u32, Error> {
        self.chain
            .current_height()
            .map_err(into_chain_error)
            .context("failed to get current height")
    }
}
