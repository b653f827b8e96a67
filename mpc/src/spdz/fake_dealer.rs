use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::{
    fields::shift_representative,
    spdz::{SpdzDealer, SpdzShare},
    MpcContext, MpcField,
};

/// Insecure dealer that derives unbounded correlated randomness from a
/// shared seed. Every party instantiated with the same seed produces its
/// share of the same joint samples, which makes the dealer suitable for
/// tests and benchmarks only.
pub struct FakeSpdzDealer<T> {
    auth_key: FakeAuthKey<T>,
    triple_gen: FakeShareGenerator<T>,
    random_gen: FakeShareGenerator<T>,
    bits_gen: FakeShareGenerator<T>,
    truncation_gen: FakeShareGenerator<T>,
    input_masks_gen: Vec<FakeShareGenerator<T>>,
}

impl<T: MpcField> FakeSpdzDealer<T> {
    /// Create new instance.
    pub fn new(num_parties: usize, party_id: usize, seed: u8) -> Self {
        let mut rng = SmallRng::from_seed([seed; 32]);
        let auth_key = FakeAuthKey::random(&mut rng, party_id, num_parties);
        Self {
            auth_key,
            triple_gen: FakeShareGenerator::new(auth_key, rng.gen()),
            random_gen: FakeShareGenerator::new(auth_key, rng.gen()),
            bits_gen: FakeShareGenerator::new(auth_key, rng.gen()),
            truncation_gen: FakeShareGenerator::new(auth_key, rng.gen()),
            input_masks_gen: (0..num_parties)
                .map(|_| FakeShareGenerator::new(auth_key, rng.gen()))
                .collect(),
        }
    }
}

impl<T: MpcField> MpcContext for FakeSpdzDealer<T> {
    fn num_parties(&self) -> usize {
        self.auth_key.num_parties
    }

    fn party_id(&self) -> usize {
        self.auth_key.party_id
    }
}

impl<T: MpcField> SpdzDealer<T> for FakeSpdzDealer<T> {
    fn auth_key_share(&self) -> T {
        self.auth_key.share_value
    }

    fn next_triple(&mut self) -> Option<(SpdzShare<T>, SpdzShare<T>, SpdzShare<T>)> {
        let (a_share, a_plain) = self.triple_gen.gen_random_authenticated_share();
        let (b_share, b_plain) = self.triple_gen.gen_random_authenticated_share();
        let c_share = self.triple_gen.gen_authenticated_share(a_plain * b_plain);
        Some((a_share, b_share, c_share))
    }

    fn next_input_mask_own(&mut self) -> Option<(SpdzShare<T>, T)> {
        Some(self.input_masks_gen[self.auth_key.party_id].gen_random_authenticated_share())
    }

    fn next_input_mask_for(&mut self, party: usize) -> Option<SpdzShare<T>> {
        Some(self.input_masks_gen[party].gen_random_authenticated_share().0)
    }

    fn next_random_share(&mut self) -> Option<SpdzShare<T>> {
        Some(self.random_gen.gen_random_authenticated_share().0)
    }

    fn next_bit(&mut self) -> Option<SpdzShare<T>> {
        let value = if self.bits_gen.rng().gen() {
            T::ONE
        } else {
            T::ZERO
        };
        Some(self.bits_gen.gen_authenticated_share(value))
    }

    fn next_truncation_pair(&mut self, d: usize) -> Option<(SpdzShare<T>, SpdzShare<T>)> {
        let (r_share, r_plain) = self.truncation_gen.gen_random_authenticated_share();
        let truncated = self
            .truncation_gen
            .gen_authenticated_share(shift_representative(&r_plain, d));
        Some((truncated, r_share))
    }
}

/// Authentication key in plain and its share.
#[derive(Copy, Clone)]
struct FakeAuthKey<T> {
    num_parties: usize,
    party_id: usize,
    share_value: T,
    plain_value: T,
}

impl<T: MpcField> FakeAuthKey<T> {
    /// Generate fake authentication key and its share.
    fn random(rng: &mut impl Rng, party_id: usize, num_parties: usize) -> Self {
        let (share_value, plain_value) = gen_random_raw_share(rng, party_id, num_parties);
        Self {
            num_parties,
            party_id,
            share_value,
            plain_value,
        }
    }
}

/// Insecure generator of SPDZ-shared values.
struct FakeShareGenerator<T> {
    auth_key: FakeAuthKey<T>,
    rng: SmallRng,
}

impl<T: MpcField> FakeShareGenerator<T> {
    fn new(auth_key: FakeAuthKey<T>, seed: [u8; 32]) -> Self {
        Self {
            rng: SmallRng::from_seed(seed),
            auth_key,
        }
    }

    fn rng(&mut self) -> &mut impl Rng {
        &mut self.rng
    }

    /// Generate local unauthenticated share of specified value.
    fn gen_raw_share(&mut self, value: T) -> T {
        gen_raw_share(
            &mut self.rng,
            self.auth_key.party_id,
            self.auth_key.num_parties,
            value,
        )
    }

    /// Generate local authenticated share of specified value.
    fn gen_authenticated_share(&mut self, value: T) -> SpdzShare<T> {
        SpdzShare {
            value: self.gen_raw_share(value),
            mac: self.gen_raw_share(value * self.auth_key.plain_value),
        }
    }

    /// Generate random value and its local authenticated share.
    fn gen_random_authenticated_share(&mut self) -> (SpdzShare<T>, T) {
        let value = T::random(&mut self.rng);
        (self.gen_authenticated_share(value), value)
    }
}

/// Generate local unauthenticated share of specified value.
///
/// All parties advance their generators identically; the share of party i is
/// the i-th term of a random arithmetic progression, and party 0 absorbs the
/// correction that makes the shares sum to the value.
fn gen_raw_share<T: MpcField>(
    mut rng: &mut impl Rng,
    party_id: usize,
    num_parties: usize,
    value: T,
) -> T {
    let start = T::random(&mut rng);
    let step = T::random(&mut rng);
    let share = arithmetic_progression(start, step, party_id as u64);
    let sum = arithmetic_progression_sum(start, step, num_parties as u64);
    if party_id == 0 {
        share + value - sum
    } else {
        share
    }
}

/// Generate random value and its local unauthenticated share.
fn gen_random_raw_share<T: MpcField>(
    rng: &mut impl Rng,
    party_id: usize,
    num_parties: usize,
) -> (T, T) {
    let value = T::random(&mut *rng);
    (gen_raw_share(rng, party_id, num_parties, value), value)
}

/// Compute n-th term of linear progression.
fn arithmetic_progression<T: MpcField>(start: T, step: T, n: u64) -> T {
    start + step * T::from(n)
}

/// Compute sum of terms 0..n-1 of linear progression.
fn arithmetic_progression_sum<T: MpcField>(start: T, step: T, n: u64) -> T {
    let sum = if n % 2 == 0 {
        T::from(n / 2) * T::from(n - 1)
    } else {
        T::from(n) * T::from((n - 1) / 2)
    };
    start * T::from(n) + step * sum
}

#[cfg(test)]
mod tests {
    use ff::Field;

    use super::*;
    use crate::fields::Mersenne61;

    type Fp = Mersenne61;

    fn dealers(num_parties: usize, seed: u8) -> Vec<FakeSpdzDealer<Fp>> {
        (0..num_parties)
            .map(|id| FakeSpdzDealer::new(num_parties, id, seed))
            .collect()
    }

    fn reconstruct(shares: impl IntoIterator<Item = SpdzShare<Fp>>) -> (Fp, Fp) {
        shares.into_iter().fold((Fp::ZERO, Fp::ZERO), |(v, m), s| {
            (v + s.value, m + s.mac)
        })
    }

    #[test]
    fn test_auth_key_is_consistent() {
        let mut dealers = dealers(4, 3);
        let key: Fp = dealers.iter().map(|d| d.auth_key_share()).sum();

        // Every authenticated sharing must satisfy sum(mac) = key * sum(value).
        let shares: Vec<_> = dealers
            .iter_mut()
            .map(|d| d.next_random_share().unwrap())
            .collect();
        let (value, mac) = reconstruct(shares);
        assert_eq!(mac, key * value);
    }

    #[test]
    fn test_triples_are_multiplicative() {
        let mut dealers = dealers(3, 9);
        let key: Fp = dealers.iter().map(|d| d.auth_key_share()).sum();

        for _ in 0..10 {
            let triples: Vec<_> = dealers
                .iter_mut()
                .map(|d| d.next_triple().unwrap())
                .collect();
            let (a, a_mac) = reconstruct(triples.iter().map(|t| t.0));
            let (b, b_mac) = reconstruct(triples.iter().map(|t| t.1));
            let (c, c_mac) = reconstruct(triples.iter().map(|t| t.2));
            assert_eq!(c, a * b);
            assert_eq!(a_mac, key * a);
            assert_eq!(b_mac, key * b);
            assert_eq!(c_mac, key * c);
        }
    }

    #[test]
    fn test_input_masks_align() {
        let mut dealers = dealers(3, 1);
        let (own_share, plain) = dealers[1].next_input_mask_own().unwrap();
        let other_shares = [
            dealers[0].next_input_mask_for(1).unwrap(),
            dealers[2].next_input_mask_for(1).unwrap(),
        ];
        let (value, _) = reconstruct([own_share, other_shares[0], other_shares[1]]);
        assert_eq!(value, plain);
    }

    #[test]
    fn test_bits_are_binary() {
        let mut dealers = dealers(2, 5);
        for _ in 0..20 {
            let shares: Vec<_> = dealers.iter_mut().map(|d| d.next_bit().unwrap()).collect();
            let (bit, _) = reconstruct(shares);
            assert!(bit == Fp::ZERO || bit == Fp::ONE);
        }
    }

    #[test]
    fn test_truncation_pairs() {
        let mut dealers = dealers(2, 8);
        let pairs: Vec<_> = dealers
            .iter_mut()
            .map(|d| d.next_truncation_pair(5).unwrap())
            .collect();
        let (truncated, _) = reconstruct(pairs.iter().map(|p| p.0));
        let (full, _) = reconstruct(pairs.iter().map(|p| p.1));
        assert_eq!(truncated, shift_representative(&full, 5));
    }
}
