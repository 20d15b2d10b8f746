use bitcoin::hashes::sha256;
use bitcoin::secp256k1;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Address;
use bitcoin::Transaction;
use subswap_core::Error;
use subswap_core::KeyRef;
use subswap_core::Preimage;

/// The kind of address to request from a [`SigningWallet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Native segwit v0 (P2WPKH).
    WitnessPubKey,
    /// P2WPKH nested in P2SH.
    NestedWitnessPubKey,
}

/// Supplies keys, addresses and signatures. Private key material never leaves the wallet.
pub trait SigningWallet: Send + Sync {
    fn new_address(&self, kind: AddressKind) -> Result<Address, Error>;

    /// Derive a fresh key pair, returning a handle to the private key.
    fn derive_key(&self) -> Result<(KeyRef, PublicKey), Error>;

    fn public_key(&self, key: &KeyRef) -> Result<PublicKey, Error>;

    /// Produce an ECDSA signature over `msg` with the key behind `key`.
    fn sign_ecdsa(
        &self,
        key: &KeyRef,
        msg: &secp256k1::Message,
    ) -> Result<secp256k1::ecdsa::Signature, Error>;
}

/// Looks up preimages revealed to us, e.g. by a settled Lightning invoice.
pub trait PreimageSource: Send + Sync {
    fn preimage(&self, hash: &sha256::Hash) -> Result<Option<Preimage>, Error>;
}

/// Publishes transactions to the network.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, tx: &Transaction) -> Result<(), Error>;
}
