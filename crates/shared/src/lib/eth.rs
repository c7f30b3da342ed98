//! Primitive aliases shared across the daemon.

pub type Address = alloy_primitives::Address;
pub type Hash256 = alloy_primitives::B256;
/// Compressed BLS12-381 G1 public key, as stored in the registry and deposit logs.
pub type PublicKeyBytes = alloy_primitives::FixedBytes<48>;
/// Compressed BLS12-381 G2 signature.
pub type SignatureBytes = alloy_primitives::FixedBytes<96>;
pub type ForkVersion = [u8; 4];
pub type Gwei = u64;
