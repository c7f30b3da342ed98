//! BLS12-381 verification of deposit-data signatures.
//!
//! A deposit signature covers the SSZ signing root of
//! `DepositMessage { pubkey, withdrawal_credentials, amount }` under the
//! deposit domain derived from the chain's genesis fork version and a zero
//! `genesis_validators_root` (deposits are valid across forks).

use ssz_types::{typenum, FixedVector};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use crate::eth::{ForkVersion, Hash256, PublicKeyBytes, SignatureBytes};

pub const DOMAIN_DEPOSIT: [u8; 4] = [3, 0, 0, 0];
/// Signature check is fixed to a full 32 ETH deposit.
pub const DEPOSIT_AMOUNT_GWEI: u64 = 32_000_000_000;
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

type SszPubkey = FixedVector<u8, typenum::U48>;
type SszForkVersion = FixedVector<u8, typenum::U4>;

#[derive(TreeHash)]
struct DepositMessage {
    pubkey: SszPubkey,
    withdrawal_credentials: Hash256,
    amount: u64,
}

#[derive(TreeHash)]
struct ForkData {
    current_version: SszForkVersion,
    genesis_validators_root: Hash256,
}

#[derive(TreeHash)]
struct SigningData {
    object_root: Hash256,
    domain: Hash256,
}

pub fn compute_deposit_domain(fork_version: ForkVersion) -> Hash256 {
    let fork_data = ForkData {
        current_version: fork_version.to_vec().into(),
        genesis_validators_root: Hash256::ZERO,
    };
    let fork_data_root = fork_data.tree_hash_root();

    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(&DOMAIN_DEPOSIT);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    Hash256::from(domain)
}

pub fn compute_deposit_signing_root(
    pubkey: &PublicKeyBytes,
    withdrawal_credentials: Hash256,
    amount_gwei: u64,
    domain: Hash256,
) -> Hash256 {
    let message = DepositMessage {
        pubkey: pubkey.as_slice().to_vec().into(),
        withdrawal_credentials,
        amount: amount_gwei,
    };
    let signing_data = SigningData {
        object_root: message.tree_hash_root(),
        domain,
    };
    signing_data.tree_hash_root()
}

/// Full deposit-signature check. Malformed or non-group points and the
/// identity pubkey all verify as `false` rather than erroring: on-chain
/// deposit logs can carry arbitrary bytes.
pub fn verify_deposit_signature(
    pubkey: &PublicKeyBytes,
    withdrawal_credentials: Hash256,
    amount_gwei: u64,
    signature: &SignatureBytes,
    fork_version: ForkVersion,
) -> bool {
    let public_key = match blst::min_pk::PublicKey::key_validate(pubkey.as_slice()) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let bls_signature = match blst::min_pk::Signature::from_bytes(signature.as_slice()) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let domain = compute_deposit_domain(fork_version);
    let signing_root =
        compute_deposit_signing_root(pubkey, withdrawal_credentials, amount_gwei, domain);

    bls_signature.verify(true, signing_root.as_slice(), BLS_DST, &[], &public_key, false)
        == blst::BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const MAINNET_FORK: ForkVersion = [0, 0, 0, 0];

    #[test]
    fn deposit_domain_matches_spec_fixture() {
        // DOMAIN_DEPOSIT ++ fork_data_root(0x00000000, zero_root)[..28]
        assert_eq!(
            compute_deposit_domain(MAINNET_FORK).as_slice(),
            hex!("03000000f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a9")
        );
    }

    #[test]
    fn signing_root_matches_ssz_fixture() {
        let pubkey = PublicKeyBytes::repeat_byte(0x11);
        let withdrawal_credentials = Hash256::repeat_byte(0x22);
        let domain = compute_deposit_domain(MAINNET_FORK);

        let root = compute_deposit_signing_root(
            &pubkey,
            withdrawal_credentials,
            DEPOSIT_AMOUNT_GWEI,
            domain,
        );
        assert_eq!(
            root.as_slice(),
            hex!("3d41a2b0d376ca75c3d542482a2d20a9e2831f0a7d0c33329a6f8b576de159c1")
        );
    }

    #[test]
    fn garbage_pubkey_or_signature_is_invalid_not_an_error() {
        let withdrawal_credentials = Hash256::repeat_byte(0x22);
        assert!(!verify_deposit_signature(
            &PublicKeyBytes::repeat_byte(0xff),
            withdrawal_credentials,
            DEPOSIT_AMOUNT_GWEI,
            &SignatureBytes::repeat_byte(0xff),
            MAINNET_FORK,
        ));
    }

    #[test]
    fn identity_pubkey_is_rejected() {
        // Compressed point at infinity: 0xc0 followed by zeros.
        let mut infinity = [0u8; 48];
        infinity[0] = 0xc0;
        assert!(!verify_deposit_signature(
            &PublicKeyBytes::from(infinity),
            Hash256::ZERO,
            DEPOSIT_AMOUNT_GWEI,
            &SignatureBytes::repeat_byte(0),
            MAINNET_FORK,
        ));
    }
}
