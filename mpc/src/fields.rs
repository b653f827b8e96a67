use crate::MpcField;

mod mersenne_61 {
    use ff::PrimeField;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Finite field mod 2^61-1.
    #[derive(PrimeField)]
    #[PrimeFieldModulus = "2305843009213693951"]
    #[PrimeFieldGenerator = "37"]
    #[PrimeFieldReprEndianness = "big"]
    pub struct Mersenne61([u64; 1]);

    impl Serialize for Mersenne61 {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.to_repr().0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Mersenne61 {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let repr = Mersenne61Repr(Deserialize::deserialize(deserializer)?);
            Self::from_repr_vartime(repr)
                .ok_or_else(|| serde::de::Error::custom("Invalid field element"))
        }
    }
}

mod mersenne_127 {
    use ff::PrimeField;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Finite field mod 2^127-1.
    #[derive(PrimeField)]
    #[PrimeFieldModulus = "170141183460469231731687303715884105727"]
    #[PrimeFieldGenerator = "43"]
    #[PrimeFieldReprEndianness = "big"]
    pub struct Mersenne127([u64; 2]);

    impl Serialize for Mersenne127 {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.to_repr().0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Mersenne127 {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let repr = Mersenne127Repr(Deserialize::deserialize(deserializer)?);
            Self::from_repr_vartime(repr)
                .ok_or_else(|| serde::de::Error::custom("Invalid field element"))
        }
    }
}

pub use mersenne_127::{Mersenne127, Mersenne127Repr};
pub use mersenne_61::{Mersenne61, Mersenne61Repr};

/// Shift the canonical representative of an element right by `bits`.
///
/// Used for truncation pairs, where the dealer hands out a random `r`
/// together with a sharing of `floor(r / 2^d)`.
pub fn shift_representative<T: MpcField>(value: &T, bits: usize) -> T {
    let mut bytes = value.to_bytes();
    let byte_shift = bits / 8;
    let bit_shift = bits % 8;

    if byte_shift > 0 {
        let len = bytes.len();
        bytes.copy_within(..len - byte_shift, byte_shift);
        bytes[..byte_shift].fill(0);
    }
    if bit_shift > 0 {
        let mut carry = 0u8;
        for byte in bytes.iter_mut() {
            let next_carry = *byte << (8 - bit_shift);
            *byte = (*byte >> bit_shift) | carry;
            carry = next_carry;
        }
    }

    T::from_bytes(&bytes).expect("Right shift cannot leave the canonical range")
}

#[cfg(test)]
mod tests {
    use ff::Field;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::MpcField;

    #[test]
    fn test_byte_length() {
        assert_eq!(Mersenne61::byte_length(), 8);
        assert_eq!(Mersenne127::byte_length(), 16);
    }

    #[test]
    fn test_encoding_roundtrip() {
        let x = Mersenne61::from(123456789u64);
        let bytes = x.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(Mersenne61::from_bytes(&bytes), Some(x));
    }

    #[test]
    fn test_encoding_is_big_endian() {
        let bytes = Mersenne61::from(0x0102u64).to_bytes();
        assert_eq!(bytes, [0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn test_non_canonical_bytes_rejected() {
        // The modulus itself is not a canonical representative.
        let p: u64 = 2305843009213693951;
        assert_eq!(Mersenne61::from_bytes(&p.to_be_bytes()), None);
        assert!(Mersenne61::from_bytes(&(p - 1).to_be_bytes()).is_some());
        assert_eq!(Mersenne61::from_bytes(&[0u8; 7]), None);
    }

    #[test]
    fn test_sampling_is_deterministic_and_canonical() {
        let mut rng_a = ChaCha20Rng::from_seed([5; 32]);
        let mut rng_b = ChaCha20Rng::from_seed([5; 32]);
        for _ in 0..100 {
            let a = Mersenne61::sample(&mut rng_a);
            let b = Mersenne61::sample(&mut rng_b);
            assert_eq!(a, b);
            assert!(Mersenne61::from_bytes(&a.to_bytes()).is_some());
        }
    }

    #[test]
    fn test_shift_representative() {
        let x = Mersenne61::from(0b1101100u64);
        assert_eq!(shift_representative(&x, 2), Mersenne61::from(0b11011u64));
        assert_eq!(shift_representative(&x, 7), Mersenne61::ZERO);
        let y = Mersenne61::from(1u64 << 40);
        assert_eq!(shift_representative(&y, 33), Mersenne61::from(1u64 << 7));
    }
}
