use ff::PrimeField;
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};

pub mod deferred;
pub mod executor;
pub mod fields;
pub mod graph;
pub mod numeric;
pub mod spdz;
pub mod transport;

pub use deferred::Deferred;
pub use executor::{run_program, SessionError, SessionStats};
pub use graph::{BuildStep, EvaluationStatus, NativeProtocol, ProtocolBuilder, ProtocolError};

/// Prime field used for MPC computation, with a canonical fixed-length
/// big-endian wire encoding.
///
/// Implemented automatically for every `ff::PrimeField` type that supports
/// serde; concrete fields live in [`fields`].
pub trait MpcField: PrimeField + Serialize + DeserializeOwned {
    /// Length of the canonical encoding in bytes.
    fn byte_length() -> usize {
        (Self::NUM_BITS as usize + 7) / 8
    }

    /// Canonical big-endian encoding of this element.
    fn to_bytes(&self) -> Vec<u8> {
        let repr = self.to_repr();
        let repr = repr.as_ref();
        repr[repr.len() - Self::byte_length()..].to_vec()
    }

    /// Decode the canonical encoding. Returns `None` for byte strings that
    /// are not the canonical representative of any element.
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::byte_length() {
            return None;
        }
        let mut repr = Self::Repr::default();
        let repr_bytes = repr.as_mut();
        let offset = repr_bytes.len() - bytes.len();
        repr_bytes[offset..].copy_from_slice(bytes);
        Self::from_repr_vartime(repr)
    }

    /// Sample a uniform element from a DRBG bitstream by rejection.
    ///
    /// Candidates are masked down to `NUM_BITS` bits, which keeps the
    /// acceptance probability above 1/2, so fewer than two draws are expected;
    /// 256 consecutive rejections indicate a broken generator.
    fn sample<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let len = Self::byte_length();
        let excess = len * 8 - Self::NUM_BITS as usize;
        let mask = 0xffu8 >> excess;
        let mut candidate = vec![0u8; len];
        for _ in 0..256 {
            rng.fill_bytes(&mut candidate);
            candidate[0] &= mask;
            if let Some(element) = Self::from_bytes(&candidate) {
                return element;
            }
        }
        panic!("Rejection sampling exceeded its retry bound");
    }
}

impl<T: PrimeField + Serialize + DeserializeOwned> MpcField for T {}

/// Participant identity within a multi-party session.
pub trait MpcContext {
    /// Number of parties participating in MPC computation.
    fn num_parties(&self) -> usize;

    /// ID of current party.
    fn party_id(&self) -> usize;
}
