use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, BufWriter},
    path::Path,
};

use itertools::izip;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    fields::shift_representative,
    spdz::{SpdzDealer, SpdzShare},
    MpcContext, MpcField,
};

/// Precomputed correlated randomness for one party of the SPDZ protocol.
///
/// Queues are aligned across the files of a session: the i-th entry of each
/// queue on every party belongs to the same joint sample. Consumption pops
/// from the back, so alignment is preserved as long as every party consumes
/// in the same order, which the evaluator guarantees.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PrecomputedSpdzData<T> {
    pub num_parties: usize,
    pub party_id: usize,
    pub auth_key: T,
    pub beaver_triples: Vec<(SpdzShare<T>, SpdzShare<T>, SpdzShare<T>)>,
    pub random_elements: Vec<SpdzShare<T>>,
    pub random_bits: Vec<SpdzShare<T>>,
    pub input_masks: Vec<Vec<SpdzShare<T>>>,
    pub input_masks_plain: Vec<T>,
    pub truncation_pairs: BTreeMap<usize, Vec<(SpdzShare<T>, SpdzShare<T>)>>,
}

impl<T: MpcField> PrecomputedSpdzData<T> {
    /// Empty table for one party.
    pub fn empty(num_parties: usize, party_id: usize, auth_key: T) -> Self {
        PrecomputedSpdzData {
            num_parties,
            party_id,
            auth_key,
            beaver_triples: Vec::new(),
            random_elements: Vec::new(),
            random_bits: Vec::new(),
            input_masks: (0..num_parties).map(|_| Vec::new()).collect(),
            input_masks_plain: Vec::new(),
            truncation_pairs: BTreeMap::new(),
        }
    }

    /// Load precomputed data from file.
    pub fn load_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        bincode::deserialize_from(reader).map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }

    /// Save precomputed data to file.
    pub fn save_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }
}

/// How much correlated randomness to manufacture for a session.
#[derive(Clone, Debug, Default)]
pub struct PreprocessingCounts {
    pub beaver_triples: usize,
    pub random_elements: usize,
    pub random_bits: usize,
    /// Input masks per party.
    pub input_masks: usize,
    /// (shift, count) pairs.
    pub truncation_pairs: Vec<(usize, usize)>,
}

/// Manufacture aligned preprocessing tables for every party.
///
/// This is the trusted-dealer stand-in for the offline phase: shares are
/// additively random with party `num_parties - 1` absorbing the correction.
pub fn generate_precomputed_data<T, R>(
    num_parties: usize,
    counts: &PreprocessingCounts,
    rng: &mut R,
) -> Vec<PrecomputedSpdzData<T>>
where
    T: MpcField,
    R: Rng,
{
    let key_shares: Vec<T> = (0..num_parties).map(|_| T::random(&mut *rng)).collect();
    let auth_key = key_shares.iter().copied().fold(T::ZERO, |acc, x| acc + x);

    let mut data: Vec<_> = izip!(0..num_parties, key_shares)
        .map(|(id, key_share)| PrecomputedSpdzData::empty(num_parties, id, key_share))
        .collect();

    let mut sharer = Sharer {
        num_parties,
        auth_key,
        rng,
    };

    for _ in 0..counts.beaver_triples {
        let (shares_a, a) = sharer.share_random();
        let (shares_b, b) = sharer.share_random();
        let shares_c = sharer.share(a * b);
        for (party, a, b, c) in izip!(&mut data, shares_a, shares_b, shares_c) {
            party.beaver_triples.push((a, b, c));
        }
    }

    for _ in 0..counts.random_elements {
        let (shares, _) = sharer.share_random();
        for (party, share) in izip!(&mut data, shares) {
            party.random_elements.push(share);
        }
    }

    for _ in 0..counts.random_bits {
        let bit = T::from(sharer.rng.gen_range(0..=1u64));
        let shares = sharer.share(bit);
        for (party, share) in izip!(&mut data, shares) {
            party.random_bits.push(share);
        }
    }

    for inputter in 0..num_parties {
        for _ in 0..counts.input_masks {
            let (shares, plain) = sharer.share_random();
            for (party, share) in izip!(&mut data, shares) {
                party.input_masks[inputter].push(share);
            }
            data[inputter].input_masks_plain.push(plain);
        }
    }

    for &(shift, count) in &counts.truncation_pairs {
        for _ in 0..count {
            let (shares_r, r) = sharer.share_random();
            let shares_truncated = sharer.share(shift_representative(&r, shift));
            for (party, truncated, r) in izip!(&mut data, shares_truncated, shares_r) {
                party
                    .truncation_pairs
                    .entry(shift)
                    .or_default()
                    .push((truncated, r));
            }
        }
    }

    data
}

/// Generator of random SPDZ sharings.
struct Sharer<'a, T, R> {
    num_parties: usize,
    auth_key: T,
    rng: &'a mut R,
}

impl<T: MpcField, R: Rng> Sharer<'_, T, R> {
    /// Generate random sharing of given value.
    fn share(&mut self, value: T) -> Vec<SpdzShare<T>> {
        let mut shares: Vec<_> = (1..self.num_parties)
            .map(|_| SpdzShare {
                value: T::random(&mut *self.rng),
                mac: T::random(&mut *self.rng),
            })
            .collect();
        let sum = shares
            .iter()
            .fold(SpdzShare::zero(), |acc: SpdzShare<T>, &x| acc + x);
        shares.push(SpdzShare {
            value: value - sum.value,
            mac: value * self.auth_key - sum.mac,
        });
        shares
    }

    /// Generate random sharing of random value.
    fn share_random(&mut self) -> (Vec<SpdzShare<T>>, T) {
        let value = T::random(&mut *self.rng);
        (self.share(value), value)
    }
}

/// Dealer that serves correlated randomness from a precomputed table.
pub struct PrecomputedSpdzDealer<T> {
    data: PrecomputedSpdzData<T>,
}

impl<T: MpcField> PrecomputedSpdzDealer<T> {
    /// Create new dealer given precomputed data.
    pub fn new(data: PrecomputedSpdzData<T>) -> Self {
        Self { data }
    }

    /// Create new dealer from file with precomputed data.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(PrecomputedSpdzData::load_file(path)?))
    }
}

impl<T: MpcField> MpcContext for PrecomputedSpdzDealer<T> {
    fn num_parties(&self) -> usize {
        self.data.num_parties
    }

    fn party_id(&self) -> usize {
        self.data.party_id
    }
}

impl<T: MpcField> SpdzDealer<T> for PrecomputedSpdzDealer<T> {
    fn auth_key_share(&self) -> T {
        self.data.auth_key
    }

    fn next_triple(&mut self) -> Option<(SpdzShare<T>, SpdzShare<T>, SpdzShare<T>)> {
        self.data.beaver_triples.pop()
    }

    fn next_input_mask_own(&mut self) -> Option<(SpdzShare<T>, T)> {
        let id = self.data.party_id;
        let share = self.data.input_masks[id].pop()?;
        let plain = self
            .data
            .input_masks_plain
            .pop()
            .expect("Own input masks and their plain values stay aligned");
        Some((share, plain))
    }

    fn next_input_mask_for(&mut self, party: usize) -> Option<SpdzShare<T>> {
        if party == self.data.party_id {
            panic!("Tried to get own mask as third-party mask");
        }
        self.data.input_masks[party].pop()
    }

    fn next_random_share(&mut self) -> Option<SpdzShare<T>> {
        self.data.random_elements.pop()
    }

    fn next_bit(&mut self) -> Option<SpdzShare<T>> {
        self.data.random_bits.pop()
    }

    fn next_truncation_pair(&mut self, d: usize) -> Option<(SpdzShare<T>, SpdzShare<T>)> {
        self.data.truncation_pairs.get_mut(&d)?.pop()
    }
}

#[cfg(test)]
mod tests {
    use ff::Field;
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::fields::Mersenne61;

    type Fp = Mersenne61;

    fn counts() -> PreprocessingCounts {
        PreprocessingCounts {
            beaver_triples: 4,
            random_elements: 2,
            random_bits: 2,
            input_masks: 3,
            truncation_pairs: vec![(8, 2)],
        }
    }

    fn generate(num_parties: usize) -> Vec<PrecomputedSpdzData<Fp>> {
        let mut rng = SmallRng::from_seed([17; 32]);
        generate_precomputed_data(num_parties, &counts(), &mut rng)
    }

    fn reconstruct<'a>(shares: impl IntoIterator<Item = &'a SpdzShare<Fp>>) -> (Fp, Fp) {
        shares.into_iter().fold((Fp::ZERO, Fp::ZERO), |(v, m), s| {
            (v + s.value, m + s.mac)
        })
    }

    #[test]
    fn test_generated_triples_verify() {
        let data = generate(3);
        let key: Fp = data.iter().map(|d| d.auth_key).sum();
        for i in 0..counts().beaver_triples {
            let (a, a_mac) = reconstruct(data.iter().map(|d| &d.beaver_triples[i].0));
            let (b, _) = reconstruct(data.iter().map(|d| &d.beaver_triples[i].1));
            let (c, c_mac) = reconstruct(data.iter().map(|d| &d.beaver_triples[i].2));
            assert_eq!(c, a * b);
            assert_eq!(a_mac, key * a);
            assert_eq!(c_mac, key * c);
        }
    }

    #[test]
    fn test_generated_masks_match_plain_values() {
        let data = generate(3);
        for inputter in 0..3 {
            for i in 0..counts().input_masks {
                let (value, _) = reconstruct(data.iter().map(|d| &d.input_masks[inputter][i]));
                assert_eq!(value, data[inputter].input_masks_plain[i]);
            }
        }
    }

    #[test]
    fn test_generated_truncation_pairs_verify() {
        let data = generate(2);
        for i in 0..2 {
            let (truncated, _) = reconstruct(data.iter().map(|d| &d.truncation_pairs[&8][i].0));
            let (full, _) = reconstruct(data.iter().map(|d| &d.truncation_pairs[&8][i].1));
            assert_eq!(truncated, shift_representative(&full, 8));
        }
    }

    #[test]
    fn test_serialization_roundtrip() {
        let data = generate(2);
        let bytes = bincode::serialize(&data[0]).unwrap();
        let restored: PrecomputedSpdzData<Fp> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.beaver_triples, data[0].beaver_triples);
        assert_eq!(restored.input_masks_plain, data[0].input_masks_plain);
    }

    #[test]
    fn test_dealer_pops_stay_aligned() {
        let data = generate(2);
        let key: Fp = data.iter().map(|d| d.auth_key).sum();
        let mut dealers: Vec<_> = data.into_iter().map(PrecomputedSpdzDealer::new).collect();

        let (own, plain) = dealers[0].next_input_mask_own().unwrap();
        let other = dealers[1].next_input_mask_for(0).unwrap();
        let (value, mac) = reconstruct([&own, &other]);
        assert_eq!(value, plain);
        assert_eq!(mac, key * value);
    }

    #[test]
    fn test_dealer_exhaustion() {
        let data = generate(2);
        let mut dealer = PrecomputedSpdzDealer::new(data.into_iter().next().unwrap());
        for _ in 0..counts().beaver_triples {
            assert!(dealer.next_triple().is_some());
        }
        assert!(dealer.next_triple().is_none());
        assert!(dealer.next_truncation_pair(3).is_none());
    }
}
