use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::sha256;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::FeeRate;
use bitcoin::Network;
use std::sync::Arc;
use subswap_core::parse_hash;
use subswap_core::total_amount;
use subswap_core::ChainClient;
use subswap_core::Error;
use subswap_core::ErrorContext;
use subswap_core::FeeEstimator;
use subswap_core::FeePolicy;
use subswap_core::FeePreference;
use subswap_core::SettlementBuilder;
use subswap_core::SwapIndex;
use subswap_core::SwapRecord;
use subswap_core::SwapStatus;
use subswap_core::SwapStore;
use subswap_core::Utxo;
use subswap_core::UtxoScanner;

pub mod auth;
pub mod config;
pub mod peer_notifier;
pub mod subscribe;
pub mod wallet;

mod client;
mod service;

pub use auth::AuthGate;
pub use auth::Authorizer;
pub use auth::Credentials;
pub use auth::Operation;
pub use auth::Permission;
pub use auth::PermissionTable;
pub use client::ClientInit;
pub use client::ClientWatch;
pub use client::SignedRefund;
pub use config::Config;
pub use peer_notifier::PeerConnectionChangedEvent;
pub use peer_notifier::PeerNotifier;
pub use service::ServiceInit;
pub use subscribe::Broker;
pub use subscribe::Subscription;
pub use wallet::AddressKind;
pub use wallet::Broadcaster;
pub use wallet::PreimageSource;
pub use wallet::SigningWallet;

/// The external capabilities a [`SwapServer`] is built on.
pub struct Collaborators {
    pub wallet: Arc<dyn SigningWallet>,
    pub chain: Arc<dyn ChainClient>,
    pub fee_estimator: Arc<dyn FeeEstimator>,
    pub store: Arc<dyn SwapStore>,
    pub preimages: Arc<dyn PreimageSource>,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// Identifies a swap either by its payment hash or by its deposit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapLocator {
    Hash(sha256::Hash),
    Address(Address),
}

impl SwapLocator {
    /// Build a locator from request fields, preferring the hash when both are given.
    pub fn from_request(hash: &[u8], address: &str, network: Network) -> Result<Self, Error> {
        if !hash.is_empty() {
            return Ok(SwapLocator::Hash(parse_hash(hash)?));
        }

        Ok(SwapLocator::Address(parse_address(address, network)?))
    }
}

impl From<sha256::Hash> for SwapLocator {
    fn from(value: sha256::Hash) -> Self {
        SwapLocator::Hash(value)
    }
}

impl From<Address> for SwapLocator {
    fn from(value: Address) -> Self {
        SwapLocator::Address(value)
    }
}

/// What is currently waiting at a swap's deposit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentAmount {
    pub total: Amount,
    pub lock_height: u32,
    pub utxos: Vec<Utxo>,
}

/// Coordinates the client and service sides of submarine swaps.
///
/// Every operation runs to completion against the collaborators and holds no lock across a chain
/// query, so a `SwapServer` can be shared freely between callers.
pub struct SwapServer {
    config: Config,
    fee_policy: FeePolicy,
    wallet: Arc<dyn SigningWallet>,
    fee_estimator: Arc<dyn FeeEstimator>,
    preimages: Arc<dyn PreimageSource>,
    broadcaster: Arc<dyn Broadcaster>,
    index: SwapIndex,
    scanner: UtxoScanner,
    settlement: SettlementBuilder,
}

impl SwapServer {
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self, Error> {
        config.validate().context("invalid swap server config")?;

        let fee_policy = config.fee_policy()?;
        let index = SwapIndex::new(collaborators.store, config.network);
        let scanner = UtxoScanner::new(collaborators.chain, index.clone());
        let settlement = SettlementBuilder::new(scanner.clone());

        Ok(Self {
            config,
            fee_policy,
            wallet: collaborators.wallet,
            fee_estimator: collaborators.fee_estimator,
            preimages: collaborators.preimages,
            broadcaster: collaborators.broadcaster,
            index,
            scanner,
            settlement,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    /// The total amount, lock height and outputs currently unspent at a swap's address.
    pub fn unspent_amount(&self, locator: &SwapLocator) -> Result<UnspentAmount, Error> {
        let record = self.locate(locator)?;

        let utxos = self.scanner.scan_swap(&record)?.collect::<Vec<_>>();
        let total = total_amount(&utxos)?;

        tracing::info!(address = %record.address(), %total, "Unspent swap amount");

        Ok(UnspentAmount {
            total,
            lock_height: record.lock_height(),
            utxos,
        })
    }

    /// Where the swap stands, as observed on chain.
    pub fn swap_status(&self, locator: &SwapLocator) -> Result<SwapStatus, Error> {
        let record = self.locate(locator)?;

        let unspent = self.scanner.scan_swap(&record)?.collect::<Vec<_>>();
        let spends = self.scanner.spending_transactions(&record)?;

        let status = subswap_core::state::swap_status(&record, &unspent, &spends)?;

        tracing::debug!(hash = %record.hash(), ?status, "Swap status");

        Ok(status)
    }

    fn locate(&self, locator: &SwapLocator) -> Result<SwapRecord, Error> {
        match locator {
            SwapLocator::Hash(hash) => self.index.get(hash),
            SwapLocator::Address(address) => self.index.find_by_address(address),
        }
    }

    fn resolve_fee_rate(&self, sat_per_vbyte: u64, conf_target: u32) -> Result<FeeRate, Error> {
        let preference = FeePreference::from_hints(sat_per_vbyte, conf_target)?;

        self.fee_policy
            .resolve_fee_rate(self.fee_estimator.as_ref(), preference)
    }
}

fn parse_address(address: &str, network: Network) -> Result<Address, Error> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(Error::invalid_parameters)
        .and_then(|a| a.require_network(network).map_err(Error::invalid_parameters))
        .with_context(|| format!("invalid address {address}"))
}
