use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::MpcField;

/// Authenticated value share in the SPDZ protocol.
///
/// Holds an additive share of the secret together with an additive share of
/// its MAC under the global key. The invariant `sum(mac) = key * sum(value)`
/// is preserved by every linear operation and validated by the batched
/// MAC-check before any opened value is trusted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpdzShare<T> {
    pub value: T,
    pub mac: T,
}

impl<T: MpcField> SpdzShare<T> {
    /// Sharing of zero.
    pub fn zero() -> Self {
        SpdzShare {
            value: T::ZERO,
            mac: T::ZERO,
        }
    }

    /// Canonical sharing of a public value: party 0 carries the value part,
    /// every party authenticates with its key share.
    pub fn from_plain(value: T, auth_key_share: T, party_id: usize) -> Self {
        SpdzShare {
            value: if party_id == 0 { value } else { T::ZERO },
            mac: value * auth_key_share,
        }
    }
}

impl<T: MpcField> Add for SpdzShare<T> {
    type Output = SpdzShare<T>;
    fn add(self, rhs: Self) -> Self::Output {
        SpdzShare {
            value: self.value + rhs.value,
            mac: self.mac + rhs.mac,
        }
    }
}

impl<T: MpcField> Sub for SpdzShare<T> {
    type Output = SpdzShare<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        SpdzShare {
            value: self.value - rhs.value,
            mac: self.mac - rhs.mac,
        }
    }
}

impl<T: MpcField> Neg for SpdzShare<T> {
    type Output = SpdzShare<T>;
    fn neg(self) -> Self::Output {
        SpdzShare {
            value: -self.value,
            mac: -self.mac,
        }
    }
}

impl<T: MpcField> Mul<T> for SpdzShare<T> {
    type Output = SpdzShare<T>;
    fn mul(self, rhs: T) -> Self::Output {
        SpdzShare {
            value: self.value * rhs,
            mac: self.mac * rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use ff::Field;

    use super::*;
    use crate::fields::Mersenne61;

    type Fp = Mersenne61;

    fn reconstruct(shares: &[SpdzShare<Fp>]) -> (Fp, Fp) {
        shares.iter().fold((Fp::ZERO, Fp::ZERO), |(v, m), share| {
            (v + share.value, m + share.mac)
        })
    }

    #[test]
    fn test_from_plain_preserves_mac_equation() {
        let key_shares = [Fp::from(11u64), Fp::from(13u64), Fp::from(17u64)];
        let key: Fp = key_shares.iter().sum();
        let value = Fp::from(42u64);

        let shares: Vec<_> = key_shares
            .iter()
            .enumerate()
            .map(|(id, &key_share)| SpdzShare::from_plain(value, key_share, id))
            .collect();

        let (total, mac) = reconstruct(&shares);
        assert_eq!(total, value);
        assert_eq!(mac, key * value);
    }

    #[test]
    fn test_linear_operations() {
        let x = SpdzShare {
            value: Fp::from(5u64),
            mac: Fp::from(50u64),
        };
        let y = SpdzShare {
            value: Fp::from(3u64),
            mac: Fp::from(30u64),
        };

        let sum = x + y;
        assert_eq!(sum.value, Fp::from(8u64));
        assert_eq!(sum.mac, Fp::from(80u64));

        let diff = x - y;
        assert_eq!(diff.value, Fp::from(2u64));
        assert_eq!(diff.mac, Fp::from(20u64));

        let scaled = x * Fp::from(4u64);
        assert_eq!(scaled.value, Fp::from(20u64));
        assert_eq!(scaled.mac, Fp::from(200u64));

        let negated = -x;
        assert_eq!(negated + x, SpdzShare::zero());
    }
}
