use crate::wallet::AddressKind;
use crate::SwapServer;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::ScriptBuf;
use bitcoin::Txid;
use bitcoin::WPubkeyHash;
use subswap_core::parse_hash;
use subswap_core::parse_public_key;
use subswap_core::settlement::verify_preimage;
use subswap_core::Error;
use subswap_core::ErrorContext;
use subswap_core::ErrorKind;
use subswap_core::KeyRef;
use subswap_core::Preimage;
use subswap_core::SwapParameters;
use subswap_core::SwapRecord;
use subswap_core::SwapRole;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInit {
    pub address: Address,
    pub service_pk: PublicKey,
    pub lock_height: u32,
}

impl SwapServer {
    /// Create and record a new swap for a client's payment hash, locked `lock_delta` blocks from
    /// now.
    pub fn service_init(&self, hash: &[u8], client_pk: &[u8]) -> Result<ServiceInit, Error> {
        let hash = parse_hash(hash)?;
        let client_pk = parse_public_key(client_pk).context("invalid client public key")?;

        // Don't burn a wallet key on a swap we are going to reject.
        if self.index.contains(&hash)? {
            return Err(Error::duplicate_swap(format!(
                "swap with hash {hash} already exists"
            )));
        }

        let current_height = self.scanner.current_height()?;
        let lock_height = current_height
            .checked_add(self.config.lock_delta)
            .ok_or_else(|| Error::invalid_parameters("lock height overflows"))?;

        let (key, service_pk) = self
            .wallet
            .derive_key()
            .map_err(Error::signing)
            .context("failed to derive service key")?;

        let params =
            SwapParameters::new(hash, client_pk, service_pk, lock_height, current_height)?;
        let record = SwapRecord::new(
            params,
            current_height,
            SwapRole::Service { key },
            self.network(),
        )?;

        self.index.put(&record)?;

        tracing::info!(
            %hash,
            address = %record.address(),
            script = %record.script().witness_script().to_hex_string(),
            %service_pk,
            lock_height,
            "Created service swap"
        );

        Ok(ServiceInit {
            address: record.address().clone(),
            service_pk,
            lock_height,
        })
    }

    /// The fee [`SwapServer::redeem`] would pay right now, at the given fee preference.
    pub fn redeem_fees(
        &self,
        hash: &[u8],
        sat_per_vbyte: u64,
        conf_target: u32,
    ) -> Result<Amount, Error> {
        let hash = parse_hash(hash)?;
        let record = self.index.get(&hash)?;
        service_key(&record)?;

        let fee_rate = self.resolve_fee_rate(sat_per_vbyte, conf_target)?;

        // Redeems pay to a fresh P2WPKH address, and every P2WPKH script has the same size.
        let destination = ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros());

        let fee = self
            .settlement
            .redeem_fee(&record, &destination, fee_rate)?;

        tracing::debug!(%hash, %fee, "Computed redeem fee");

        Ok(fee)
    }

    /// Claim the deposit of the swap with payment hash `hash`, using the preimage revealed to the
    /// [`crate::PreimageSource`]. Returns the txid of the published transaction.
    pub fn redeem(&self, hash: &[u8], sat_per_vbyte: u64, conf_target: u32) -> Result<Txid, Error> {
        let hash = parse_hash(hash)?;

        let preimage = self
            .preimages
            .preimage(&hash)
            .with_context(|| format!("failed to look up preimage for {hash}"))?
            .ok_or_else(|| Error::not_found(format!("no preimage known for hash {hash}")))?;

        self.redeem_swap(&hash, &preimage, sat_per_vbyte, conf_target)
    }

    /// Like [`SwapServer::redeem`], for callers that already hold the preimage.
    pub fn redeem_with_preimage(
        &self,
        hash: &[u8],
        preimage: &Preimage,
        sat_per_vbyte: u64,
        conf_target: u32,
    ) -> Result<Txid, Error> {
        let hash = parse_hash(hash)?;

        self.redeem_swap(&hash, preimage, sat_per_vbyte, conf_target)
    }

    fn redeem_swap(
        &self,
        hash: &sha256::Hash,
        preimage: &Preimage,
        sat_per_vbyte: u64,
        conf_target: u32,
    ) -> Result<Txid, Error> {
        let record = self.index.get(hash)?;
        let key = service_key(&record)?.clone();

        verify_preimage(&record, preimage)?;

        let fee_rate = self.resolve_fee_rate(sat_per_vbyte, conf_target)?;

        let destination = self
            .wallet
            .new_address(AddressKind::WitnessPubKey)
            .map_err(Error::signing)
            .context("failed to get redeem address")?;

        let settlement =
            self.settlement
                .build_redeem(&record, preimage, &destination, fee_rate, |msg| {
                    self.wallet
                        .sign_ecdsa(&key, &msg)
                        .map_err(Error::signing)
                })?;

        self.broadcaster
            .broadcast(settlement.tx())
            .map_err(|e| match e.kind() {
                ErrorKind::Broadcast => e,
                _ => Error::broadcast(e),
            })
            .with_context(|| format!("failed to publish redeem of {hash}"))?;

        let txid = settlement.txid();

        tracing::info!(
            %txid,
            %hash,
            fee = %settlement.fee(),
            %destination,
            "Redeemed swap"
        );

        Ok(txid)
    }
}

fn service_key(record: &SwapRecord) -> Result<&KeyRef, Error> {
    match record.role() {
        SwapRole::Service { key } => Ok(key),
        SwapRole::Client { .. } => Err(Error::invalid_parameters(format!(
            "swap {} was not created by this service",
            record.hash()
        ))),
    }
}
