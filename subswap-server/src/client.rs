use crate::parse_address;
use crate::SwapServer;
use bitcoin::hashes::sha256;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::ScriptBuf;
use bitcoin::Txid;
use subswap_core::parse_public_key;
use subswap_core::settlement::verify_lock_expired;
use subswap_core::Error;
use subswap_core::ErrorContext;
use subswap_core::KeyRef;
use subswap_core::Preimage;
use subswap_core::SwapParameters;
use subswap_core::SwapRecord;
use subswap_core::SwapRole;

/// Everything a client needs to start a swap.
#[derive(Debug, Clone)]
pub struct ClientInit {
    pub preimage: Preimage,
    pub hash: sha256::Hash,
    /// Handle to the client's refund key in the signing wallet.
    pub key: KeyRef,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWatch {
    pub address: Address,
    pub script: ScriptBuf,
}

/// A signed refund, not yet published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRefund {
    pub tx: Vec<u8>,
    pub txid: Txid,
    pub fee: Amount,
}

impl SwapServer {
    /// Pick a fresh preimage and refund key for a new swap.
    pub fn client_init(&self) -> Result<ClientInit, Error> {
        let preimage = Preimage::random();
        let hash = preimage.hash();

        let (key, public_key) = self
            .wallet
            .derive_key()
            .map_err(Error::signing)
            .context("failed to derive client key")?;

        tracing::info!(%hash, %key, %public_key, "Initialized client swap");

        Ok(ClientInit {
            preimage,
            hash,
            key,
            public_key,
        })
    }

    /// Record a swap the service created for us and return its deposit address.
    ///
    /// The address is derived locally, so the client does not have to trust the one the service
    /// reports.
    pub fn client_watch(
        &self,
        preimage: &Preimage,
        key: &KeyRef,
        service_pk: &[u8],
        lock_height: u32,
    ) -> Result<ClientWatch, Error> {
        let service_pk = parse_public_key(service_pk).context("invalid service public key")?;

        let client_pk = self
            .wallet
            .public_key(key)
            .map_err(Error::signing)
            .with_context(|| format!("failed to get public key for {key}"))?;

        let current_height = self.scanner.current_height()?;

        let max_lock_height = current_height.saturating_add(self.config.max_client_lock_delta);
        if lock_height > max_lock_height {
            return Err(Error::invalid_parameters(format!(
                "lock height {lock_height} is more than {} blocks after current height \
                 {current_height}",
                self.config.max_client_lock_delta
            )));
        }

        let params = SwapParameters::new(
            preimage.hash(),
            client_pk,
            service_pk,
            lock_height,
            current_height,
        )?;

        // The deposit may have confirmed before we started watching. Scan from the earliest
        // height at which a swap with this lock height could have been accepted.
        let scan_from = lock_height.saturating_sub(self.config.max_client_lock_delta);

        let record = SwapRecord::new(
            params,
            scan_from,
            SwapRole::Client {
                key: key.clone(),
                preimage: Some(*preimage),
            },
            self.network(),
        )?;

        self.index.put(&record)?;

        tracing::info!(
            hash = %record.hash(),
            address = %record.address(),
            lock_height,
            "Watching swap"
        );

        Ok(ClientWatch {
            address: record.address().clone(),
            script: record.script().witness_script().to_owned(),
        })
    }

    /// Sign a transaction returning everything at `deposit_address` to `refund_destination`.
    ///
    /// The transaction is returned, not published.
    pub fn refund(
        &self,
        deposit_address: &str,
        refund_destination: &str,
        sat_per_vbyte: u64,
        conf_target: u32,
    ) -> Result<SignedRefund, Error> {
        let deposit_address = parse_address(deposit_address, self.network())?;
        let refund_destination = parse_address(refund_destination, self.network())?;

        let record = self.index.find_by_address(&deposit_address)?;

        let key = match record.role() {
            SwapRole::Client { key, .. } => key.clone(),
            SwapRole::Service { .. } => {
                return Err(Error::invalid_parameters(format!(
                    "swap at {deposit_address} was not created by this client"
                )))
            }
        };

        let current_height = self.scanner.current_height()?;
        verify_lock_expired(&record, current_height)?;

        let fee_rate = self.resolve_fee_rate(sat_per_vbyte, conf_target)?;

        let settlement = self.settlement.build_refund(
            &record,
            &refund_destination,
            fee_rate,
            current_height,
            |msg| {
                self.wallet
                    .sign_ecdsa(&key, &msg)
                    .map_err(Error::signing)
            },
        )?;

        let txid = settlement.txid();

        tracing::info!(
            %txid,
            address = %deposit_address,
            fee = %settlement.fee(),
            "Signed swap refund"
        );

        Ok(SignedRefund {
            tx: settlement.serialize(),
            txid,
            fee: settlement.fee(),
        })
    }
}
