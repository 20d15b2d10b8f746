use crate::swap::SwapParameters;
use crate::Error;
use bitcoin::hashes::ripemd160;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::*;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Address;
use bitcoin::Network;
use bitcoin::Script;
use bitcoin::ScriptBuf;

/// The witness script locking a swap deposit, together with its P2WSH address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwapScript {
    witness_script: ScriptBuf,
    address: Address,
}

impl SwapScript {
    /// Derive the swap script for `params`.
    ///
    /// This is a pure function of its inputs, so the client and the service can compute the same
    /// deposit address independently.
    pub fn new(params: &SwapParameters, network: Network) -> Self {
        let witness_script = swap_witness_script(params);
        let address = Address::p2wsh(&witness_script, network);

        Self {
            witness_script,
            address,
        }
    }

    pub fn witness_script(&self) -> &Script {
        &self.witness_script
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

/// Validate raw swap inputs and derive the deposit address and witness script.
pub fn derive_swap(
    hash: &[u8],
    client_pk: &[u8],
    service_pk: &[u8],
    lock_height: u32,
    current_height: u32,
    network: Network,
) -> Result<(SwapParameters, SwapScript), Error> {
    let params =
        SwapParameters::from_slices(hash, client_pk, service_pk, lock_height, current_height)?;
    let script = SwapScript::new(&params, network);

    tracing::debug!(
        hash = %params.hash(),
        lock_height,
        address = %script.address(),
        "Derived swap script"
    );

    Ok((params, script))
}

/// ```text
/// OP_HASH160 <RIPEMD160(hash)> OP_EQUAL
/// OP_IF
///     <service_pk>
/// OP_ELSE
///     <lock_height> OP_CHECKLOCKTIMEVERIFY OP_DROP
///     <client_pk>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
///
/// `OP_HASH160` of the preimage equals `RIPEMD160(SHA256(preimage))`, so committing to the
/// RIPEMD160 of the payment hash commits to the preimage.
fn swap_witness_script(params: &SwapParameters) -> ScriptBuf {
    let hash160 = ripemd160::Hash::hash(params.hash().as_byte_array());

    ScriptBuf::builder()
        .push_opcode(OP_HASH160)
        .push_slice(hash160.to_byte_array())
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_key(&compressed(params.service_pk()))
        .push_opcode(OP_ELSE)
        .push_int(params.lock_height() as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&compressed(params.client_pk()))
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

fn compressed(pk: PublicKey) -> bitcoin::PublicKey {
    bitcoin::PublicKey::new(pk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::Preimage;
    use bitcoin::key::Secp256k1;
    use bitcoin::script::Instruction;
    use bitcoin::secp256k1::SecretKey;

    fn pk(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();

        PublicKey::from_secret_key(&secp, &sk)
    }

    fn params(lock_height: u32) -> SwapParameters {
        let hash = Preimage::new([0; 32]).hash();

        SwapParameters::new(hash, pk(1), pk(2), lock_height, 799_000).unwrap()
    }

    #[test]
    fn derivation_is_deterministic() {
        let hash = Preimage::new([0; 32]).hash();

        let (_, a) = derive_swap(
            hash.as_byte_array(),
            &pk(1).serialize(),
            &pk(2).serialize(),
            800_000,
            799_000,
            Network::Regtest,
        )
        .unwrap();
        let (_, b) = derive_swap(
            hash.as_byte_array(),
            &pk(1).serialize(),
            &pk(2).serialize(),
            800_000,
            799_500,
            Network::Regtest,
        )
        .unwrap();

        assert_eq!(a.witness_script(), b.witness_script());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn every_parameter_changes_the_address() {
        let base = SwapScript::new(&params(800_000), Network::Regtest);

        let other_lock = SwapScript::new(&params(800_001), Network::Regtest);
        assert_ne!(base.address(), other_lock.address());

        let hash = Preimage::new([1; 32]).hash();
        let other_hash = SwapParameters::new(hash, pk(1), pk(2), 800_000, 0).unwrap();
        assert_ne!(
            base.address(),
            SwapScript::new(&other_hash, Network::Regtest).address()
        );

        let hash = Preimage::new([0; 32]).hash();
        let swapped_keys = SwapParameters::new(hash, pk(2), pk(1), 800_000, 0).unwrap();
        assert_ne!(
            base.address(),
            SwapScript::new(&swapped_keys, Network::Regtest).address()
        );
    }

    #[test]
    fn script_layout() {
        let params = params(800_000);
        let script = SwapScript::new(&params, Network::Regtest);

        let instructions = script
            .witness_script()
            .instructions()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(instructions.len(), 12);
        assert_eq!(instructions[0], Instruction::Op(OP_HASH160));
        assert_eq!(instructions[2], Instruction::Op(OP_EQUAL));
        assert_eq!(instructions[3], Instruction::Op(OP_IF));
        assert_eq!(instructions[5], Instruction::Op(OP_ELSE));
        assert_eq!(instructions[7], Instruction::Op(OP_CLTV));
        assert_eq!(instructions[8], Instruction::Op(OP_DROP));
        assert_eq!(instructions[10], Instruction::Op(OP_ENDIF));
        assert_eq!(instructions[11], Instruction::Op(OP_CHECKSIG));

        let expected_hash160 = ripemd160::Hash::hash(params.hash().as_byte_array());
        match instructions[1] {
            Instruction::PushBytes(bytes) => {
                assert_eq!(bytes.as_bytes(), expected_hash160.as_byte_array())
            }
            _ => panic!("expected hash push"),
        }
        match instructions[4] {
            Instruction::PushBytes(bytes) => assert_eq!(bytes.as_bytes(), pk(2).serialize()),
            _ => panic!("expected service key push"),
        }
        match instructions[9] {
            Instruction::PushBytes(bytes) => assert_eq!(bytes.as_bytes(), pk(1).serialize()),
            _ => panic!("expected client key push"),
        }
    }

    #[test]
    fn address_is_p2wsh_of_the_script() {
        let script = SwapScript::new(&params(800_000), Network::Regtest);

        assert_eq!(
            script.script_pubkey(),
            ScriptBuf::new_p2wsh(&script.witness_script().wscript_hash())
        );
        assert!(script.address().to_string().starts_with("bcrt1q"));
    }

    #[test]
    fn derive_swap_rejects_expired_lock() {
        let hash = Preimage::new([0; 32]).hash();

        let err = derive_swap(
            hash.as_byte_array(),
            &pk(1).serialize(),
            &pk(2).serialize(),
            800_000,
            800_000,
            Network::Regtest,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }
}
