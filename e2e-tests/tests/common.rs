#![allow(clippy::unwrap_used)]
#![allow(dead_code)]

use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1;
use bitcoin::secp256k1::All;
use bitcoin::secp256k1::PublicKey;
use bitcoin::secp256k1::SecretKey;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::CompressedPublicKey;
use bitcoin::FeeRate;
use bitcoin::Network;
use bitcoin::OutPoint;
use bitcoin::ScriptBuf;
use bitcoin::Transaction;
use bitcoin::TxOut;
use bitcoin::Txid;
use rand::thread_rng;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Once;
use std::sync::RwLock;
use subswap_core::ChainClient;
use subswap_core::Error;
use subswap_core::FeeEstimator;
use subswap_core::InMemorySwapStore;
use subswap_core::KeyRef;
use subswap_core::Preimage;
use subswap_core::Utxo;
use subswap_server::AddressKind;
use subswap_server::Broadcaster;
use subswap_server::Collaborators;
use subswap_server::Config;
use subswap_server::PreimageSource;
use subswap_server::SigningWallet;
use subswap_server::SwapServer;

struct ChainOutput {
    utxo: Utxo,
    script_pubkey: ScriptBuf,
    spent: bool,
}

#[derive(Default)]
struct ChainState {
    height: u32,
    outputs: Vec<ChainOutput>,
    confirmed: Vec<(Transaction, u32)>,
    n_faucet_txs: u64,
}

/// A chain index that only knows what the test told it.
pub struct MockChain {
    state: RwLock<ChainState>,
}

impl MockChain {
    pub fn new(height: u32) -> Self {
        Self {
            state: RwLock::new(ChainState {
                height,
                ..Default::default()
            }),
        }
    }

    pub fn set_height(&self, height: u32) {
        self.state.write().unwrap().height = height;
    }

    pub fn mine(&self, n: u32) {
        self.state.write().unwrap().height += n;
    }

    pub fn height(&self) -> u32 {
        self.state.read().unwrap().height
    }

    /// Confirm a deposit of `amount` to `address` at the current height.
    pub fn fund(&self, address: &Address, amount: Amount) -> Utxo {
        let mut state = self.state.write().unwrap();

        state.n_faucet_txs += 1;
        let txid = Txid::from_byte_array(
            sha256::Hash::hash(&state.n_faucet_txs.to_le_bytes()).to_byte_array(),
        );

        let utxo = Utxo {
            outpoint: OutPoint { txid, vout: 0 },
            amount,
            confirmation_height: state.height,
        };

        state.outputs.push(ChainOutput {
            utxo,
            script_pubkey: address.script_pubkey(),
            spent: false,
        });

        tracing::debug!(%address, %amount, height = state.height, "Funded address");

        utxo
    }

    /// Confirm `tx` at the current height, spending its inputs.
    pub fn confirm(&self, tx: &Transaction) {
        let mut state = self.state.write().unwrap();
        let height = state.height;
        let txid = tx.compute_txid();

        for input in tx.input.iter() {
            let output = state
                .outputs
                .iter_mut()
                .find(|o| o.utxo.outpoint == input.previous_output)
                .expect("input spends a known output");

            assert!(!output.spent, "double spend of {}", input.previous_output);
            output.spent = true;
        }

        for (vout, TxOut {
            value,
            script_pubkey,
        }) in tx.output.iter().enumerate()
        {
            state.outputs.push(ChainOutput {
                utxo: Utxo {
                    outpoint: OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    amount: *value,
                    confirmation_height: height,
                },
                script_pubkey: script_pubkey.clone(),
                spent: false,
            });
        }

        state.confirmed.push((tx.clone(), height));
    }
}

impl ChainClient for MockChain {
    fn unspent_outputs(&self, address: &Address, from_height: u32) -> Result<Vec<Utxo>, Error> {
        let state = self.state.read().unwrap();
        let script_pubkey = address.script_pubkey();

        Ok(state
            .outputs
            .iter()
            .filter(|o| {
                !o.spent
                    && o.script_pubkey == script_pubkey
                    && o.utxo.confirmation_height >= from_height
            })
            .map(|o| o.utxo)
            .collect())
    }

    fn spending_transactions(
        &self,
        address: &Address,
        from_height: u32,
    ) -> Result<Vec<Transaction>, Error> {
        let state = self.state.read().unwrap();
        let script_pubkey = address.script_pubkey();

        let spends_address = |tx: &Transaction| {
            tx.input.iter().any(|input| {
                state.outputs.iter().any(|o| {
                    o.utxo.outpoint == input.previous_output && o.script_pubkey == script_pubkey
                })
            })
        };

        Ok(state
            .confirmed
            .iter()
            .filter(|(tx, height)| *height >= from_height && spends_address(tx))
            .map(|(tx, _)| tx.clone())
            .collect())
    }

    fn current_height(&self) -> Result<u32, Error> {
        Ok(self.height())
    }
}

/// Holds real secp256k1 keys in memory.
pub struct InMemoryWallet {
    name: String,
    network: Network,
    secp: Secp256k1<All>,
    keys: RwLock<HashMap<KeyRef, SecretKey>>,
    n_keys: AtomicU64,
}

impl InMemoryWallet {
    pub fn new(name: &str, network: Network) -> Self {
        Self {
            name: name.to_string(),
            network,
            secp: Secp256k1::new(),
            keys: RwLock::new(HashMap::new()),
            n_keys: AtomicU64::new(0),
        }
    }

    fn sk(&self, key: &KeyRef) -> Result<SecretKey, Error> {
        self.keys
            .read()
            .unwrap()
            .get(key)
            .copied()
            .ok_or_else(|| Error::signing(format!("unknown key {key}")))
    }
}

impl SigningWallet for InMemoryWallet {
    fn new_address(&self, kind: AddressKind) -> Result<Address, Error> {
        let (_, pk) = self.derive_key()?;
        let pk = CompressedPublicKey(pk);

        let address = match kind {
            AddressKind::WitnessPubKey => Address::p2wpkh(&pk, self.network),
            AddressKind::NestedWitnessPubKey => Address::p2shwpkh(&pk, self.network),
        };

        Ok(address)
    }

    fn derive_key(&self) -> Result<(KeyRef, PublicKey), Error> {
        let sk = SecretKey::new(&mut thread_rng());
        let pk = sk.public_key(&self.secp);

        let n = self.n_keys.fetch_add(1, Ordering::Relaxed);
        let key = KeyRef::new(format!("{}/{n}", self.name));

        self.keys.write().unwrap().insert(key.clone(), sk);

        Ok((key, pk))
    }

    fn public_key(&self, key: &KeyRef) -> Result<PublicKey, Error> {
        Ok(self.sk(key)?.public_key(&self.secp))
    }

    fn sign_ecdsa(
        &self,
        key: &KeyRef,
        msg: &secp256k1::Message,
    ) -> Result<secp256k1::ecdsa::Signature, Error> {
        let sk = self.sk(key)?;

        Ok(self.secp.sign_ecdsa(msg, &sk))
    }
}

/// Answers every confirmation target with the same rate, or fails if none is set.
#[derive(Default)]
pub struct FixedFeeEstimator {
    fee_rate: RwLock<Option<FeeRate>>,
}

impl FixedFeeEstimator {
    pub fn set(&self, fee_rate: Option<FeeRate>) {
        *self.fee_rate.write().unwrap() = fee_rate;
    }
}

impl FeeEstimator for FixedFeeEstimator {
    fn estimate_fee_rate(&self, _: u32) -> Result<FeeRate, Error> {
        self.fee_rate
            .read()
            .unwrap()
            .ok_or_else(|| Error::chain_query("fee estimator has no data"))
    }
}

#[derive(Default)]
pub struct MapPreimageSource {
    preimages: RwLock<HashMap<sha256::Hash, Preimage>>,
}

impl MapPreimageSource {
    /// Pretend the Lightning payment for `preimage` settled.
    pub fn reveal(&self, preimage: Preimage) {
        self.preimages
            .write()
            .unwrap()
            .insert(preimage.hash(), preimage);
    }

    /// Register `preimage` under a hash it does not belong to.
    pub fn reveal_for(&self, hash: sha256::Hash, preimage: Preimage) {
        self.preimages.write().unwrap().insert(hash, preimage);
    }
}

impl PreimageSource for MapPreimageSource {
    fn preimage(&self, hash: &sha256::Hash) -> Result<Option<Preimage>, Error> {
        Ok(self.preimages.read().unwrap().get(hash).copied())
    }
}

/// Records every published transaction and confirms it on the chain straight away.
pub struct RecordingBroadcaster {
    chain: Arc<MockChain>,
    published: RwLock<Vec<Transaction>>,
}

impl RecordingBroadcaster {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            published: RwLock::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<Transaction> {
        self.published.read().unwrap().clone()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, tx: &Transaction) -> Result<(), Error> {
        self.chain.confirm(tx);
        self.published.write().unwrap().push(tx.clone());

        Ok(())
    }
}

/// A swap server together with handles to the collaborators it was built on.
pub struct Node {
    pub server: SwapServer,
    pub wallet: Arc<InMemoryWallet>,
    pub fees: Arc<FixedFeeEstimator>,
    pub preimages: Arc<MapPreimageSource>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

pub fn set_up_node(name: &str, chain: Arc<MockChain>, config: Config) -> Node {
    let wallet = Arc::new(InMemoryWallet::new(name, config.network));
    let fees = Arc::new(FixedFeeEstimator::default());
    let preimages = Arc::new(MapPreimageSource::default());
    let broadcaster = Arc::new(RecordingBroadcaster::new(chain.clone()));

    fees.set(Some(FeeRate::from_sat_per_kwu(1_000)));

    let server = SwapServer::new(
        config,
        Collaborators {
            wallet: wallet.clone(),
            chain,
            fee_estimator: fees.clone(),
            store: Arc::new(InMemorySwapStore::new()),
            preimages: preimages.clone(),
            broadcaster: broadcaster.clone(),
        },
    )
    .unwrap();

    Node {
        server,
        wallet,
        fees,
        preimages,
        broadcaster,
    }
}

pub fn init_tracing() {
    static TRACING_TEST_SUBSCRIBER: Once = Once::new();

    TRACING_TEST_SUBSCRIBER.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .init()
    })
}
