use crate::script::SwapScript;
use crate::Error;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::hex::DisplayHex;
use bitcoin::hex::FromHex;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Address;
use bitcoin::Network;
use rand::RngCore;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use std::fmt;

pub const PREIMAGE_SIZE: usize = 32;

pub const COMPRESSED_PUBKEY_SIZE: usize = 33;

/// The secret whose SHA256 hash commits a swap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Preimage([u8; PREIMAGE_SIZE]);

impl Preimage {
    pub fn new(bytes: [u8; PREIMAGE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; PREIMAGE_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);

        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; PREIMAGE_SIZE] = bytes.try_into().map_err(|_| {
            Error::invalid_parameters(format!(
                "preimage must be {PREIMAGE_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Self(bytes))
    }

    pub fn hash(&self) -> sha256::Hash {
        sha256::Hash::hash(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PREIMAGE_SIZE] {
        &self.0
    }
}

// Never print the secret itself.
impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(hash={})", self.hash())
    }
}

impl Serialize for Preimage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_lower_hex_string())
    }
}

impl<'de> Deserialize<'de> for Preimage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        let bytes = <[u8; PREIMAGE_SIZE]>::from_hex(&hex).map_err(serde::de::Error::custom)?;

        Ok(Self(bytes))
    }
}

/// A handle to a key held by the signing wallet. The engine never sees private key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRef(String);

impl KeyRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The immutable terms of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapParameters {
    hash: sha256::Hash,
    client_pk: PublicKey,
    service_pk: PublicKey,
    lock_height: u32,
}

impl SwapParameters {
    /// Build swap parameters, checking that `lock_height` is a block height strictly after
    /// `current_height`.
    pub fn new(
        hash: sha256::Hash,
        client_pk: PublicKey,
        service_pk: PublicKey,
        lock_height: u32,
        current_height: u32,
    ) -> Result<Self, Error> {
        if lock_height <= current_height {
            return Err(Error::invalid_parameters(format!(
                "lock height {lock_height} is not after current height {current_height}"
            )));
        }

        if !LockTime::from_height(lock_height).is_ok_and(|lock| lock.is_block_height()) {
            return Err(Error::invalid_parameters(format!(
                "lock height {lock_height} is not a valid block height"
            )));
        }

        Ok(Self::from_parts(hash, client_pk, service_pk, lock_height))
    }

    /// Parse raw swap parameters as they arrive from a caller.
    pub fn from_slices(
        hash: &[u8],
        client_pk: &[u8],
        service_pk: &[u8],
        lock_height: u32,
        current_height: u32,
    ) -> Result<Self, Error> {
        let hash = parse_hash(hash)?;
        let client_pk = parse_public_key(client_pk).map_err(|e| {
            Error::invalid_parameters(format!("invalid client public key: {e}"))
        })?;
        let service_pk = parse_public_key(service_pk).map_err(|e| {
            Error::invalid_parameters(format!("invalid service public key: {e}"))
        })?;

        Self::new(hash, client_pk, service_pk, lock_height, current_height)
    }

    /// Rebuild parameters that were validated when the swap was created.
    pub(crate) fn from_parts(
        hash: sha256::Hash,
        client_pk: PublicKey,
        service_pk: PublicKey,
        lock_height: u32,
    ) -> Self {
        Self {
            hash,
            client_pk,
            service_pk,
            lock_height,
        }
    }

    pub fn hash(&self) -> sha256::Hash {
        self.hash
    }

    pub fn client_pk(&self) -> PublicKey {
        self.client_pk
    }

    pub fn service_pk(&self) -> PublicKey {
        self.service_pk
    }

    pub fn lock_height(&self) -> u32 {
        self.lock_height
    }
}

pub fn parse_hash(bytes: &[u8]) -> Result<sha256::Hash, Error> {
    sha256::Hash::from_slice(bytes).map_err(|_| {
        Error::invalid_parameters(format!(
            "payment hash must be 32 bytes, got {}",
            bytes.len()
        ))
    })
}

/// Only compressed keys are accepted, since the swap script commits to the serialized key.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, Error> {
    if bytes.len() != COMPRESSED_PUBKEY_SIZE {
        return Err(Error::invalid_parameters(format!(
            "public key must be {COMPRESSED_PUBKEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }

    PublicKey::from_slice(bytes).map_err(Error::invalid_parameters)
}

/// Which side of the swap this node plays, and the key it signs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum SwapRole {
    /// Created by the service. Signs the redeem path.
    Service { key: KeyRef },
    /// Created by the client when it starts watching. Signs the refund path.
    Client {
        key: KeyRef,
        preimage: Option<Preimage>,
    },
}

impl SwapRole {
    pub fn key(&self) -> &KeyRef {
        match self {
            SwapRole::Service { key } | SwapRole::Client { key, .. } => key,
        }
    }
}

/// A swap as persisted by the [`crate::SwapIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRecord {
    params: SwapParameters,
    script: SwapScript,
    creation_height: u32,
    role: SwapRole,
}

impl SwapRecord {
    pub fn new(
        params: SwapParameters,
        creation_height: u32,
        role: SwapRole,
        network: Network,
    ) -> Result<Self, Error> {
        if params.lock_height() <= creation_height {
            return Err(Error::invalid_parameters(format!(
                "lock height {} is not after creation height {creation_height}",
                params.lock_height()
            )));
        }

        let script = SwapScript::new(&params, network);

        Ok(Self {
            params,
            script,
            creation_height,
            role,
        })
    }

    pub(crate) fn from_parts(
        params: SwapParameters,
        script: SwapScript,
        creation_height: u32,
        role: SwapRole,
    ) -> Self {
        Self {
            params,
            script,
            creation_height,
            role,
        }
    }

    pub fn params(&self) -> &SwapParameters {
        &self.params
    }

    pub fn hash(&self) -> sha256::Hash {
        self.params.hash
    }

    pub fn script(&self) -> &SwapScript {
        &self.script
    }

    pub fn address(&self) -> &Address {
        self.script.address()
    }

    pub fn creation_height(&self) -> u32 {
        self.creation_height
    }

    pub fn lock_height(&self) -> u32 {
        self.params.lock_height
    }

    pub fn role(&self) -> &SwapRole {
        &self.role
    }
}
