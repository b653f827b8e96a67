mod share;
pub use share::SpdzShare;

pub mod gates;
pub mod mac_check;

mod fake_dealer;
pub use fake_dealer::FakeSpdzDealer;

mod precomp_dealer;
pub use precomp_dealer::{
    generate_precomputed_data, PrecomputedSpdzData, PrecomputedSpdzDealer, PreprocessingCounts,
};

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::{graph::ProtocolError, MpcContext, MpcField};

/// Supplier of preprocessed correlated randomness for the SPDZ online phase.
///
/// Queues must be aligned across parties: the i-th value of each kind handed
/// out on every party belongs to the same joint sample. The engine consumes
/// the queues in the deterministic order induced by batch collection, which
/// keeps them aligned without further coordination. `None` means a queue has
/// run dry; the evaluator aborts the session at that batch.
pub trait SpdzDealer<T: MpcField>: MpcContext {
    /// Additive share of the global MAC key.
    fn auth_key_share(&self) -> T;

    /// Random sharing of a secret triple (a, b, ab).
    fn next_triple(&mut self) -> Option<(SpdzShare<T>, SpdzShare<T>, SpdzShare<T>)>;

    /// Random sharing of a random value with plaintext known to this party.
    fn next_input_mask_own(&mut self) -> Option<(SpdzShare<T>, T)>;

    /// Random sharing of a random value with plaintext known to the given party.
    fn next_input_mask_for(&mut self, party: usize) -> Option<SpdzShare<T>>;

    /// Random sharing of a uniform secret element.
    fn next_random_share(&mut self) -> Option<SpdzShare<T>>;

    /// Random sharing of a secret bit.
    fn next_bit(&mut self) -> Option<SpdzShare<T>>;

    /// Sharings of (floor(r / 2^d), r) for a secret random r.
    fn next_truncation_pair(&mut self, d: usize) -> Option<(SpdzShare<T>, SpdzShare<T>)>;
}

/// Buffer of partially opened values awaiting the next MAC-check.
///
/// Append-only between checks; a check drains it at its first round.
struct OpenedValueStore<T: MpcField> {
    shares: Vec<SpdzShare<T>>,
    values: Vec<T>,
    total_recorded: usize,
}

impl<T: MpcField> OpenedValueStore<T> {
    fn new() -> Self {
        OpenedValueStore {
            shares: Vec::new(),
            values: Vec::new(),
            total_recorded: 0,
        }
    }
}

/// Session-scoped resources of the SPDZ online phase: the dealer, the
/// opened-value store and a local randomness source for commitments.
pub struct SpdzResourcePool<T: MpcField> {
    dealer: Box<dyn SpdzDealer<T>>,
    opened: OpenedValueStore<T>,
    integrity_checks: usize,
    rng: StdRng,
}

impl<T: MpcField> MpcContext for SpdzResourcePool<T> {
    fn num_parties(&self) -> usize {
        self.dealer.num_parties()
    }

    fn party_id(&self) -> usize {
        self.dealer.party_id()
    }
}

impl<T: MpcField> SpdzResourcePool<T> {
    /// Create a resource pool around a dealer.
    pub fn new(dealer: Box<dyn SpdzDealer<T>>) -> Self {
        SpdzResourcePool {
            dealer,
            opened: OpenedValueStore::new(),
            integrity_checks: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// This party's share of the global MAC key.
    pub fn auth_key_share(&self) -> T {
        self.dealer.auth_key_share()
    }

    /// Canonical authenticated sharing of a public value.
    pub fn share_plain(&self, value: T) -> SpdzShare<T> {
        SpdzShare::from_plain(value, self.dealer.auth_key_share(), self.party_id())
    }

    /// Record a partially opened pair for the next MAC-check.
    pub fn record_opened(&mut self, share: SpdzShare<T>, value: T) {
        self.opened.shares.push(share);
        self.opened.values.push(value);
        self.opened.total_recorded += 1;
    }

    /// Drain all pairs opened since the last check.
    pub fn take_opened(&mut self) -> (Vec<SpdzShare<T>>, Vec<T>) {
        (
            std::mem::take(&mut self.opened.shares),
            std::mem::take(&mut self.opened.values),
        )
    }

    /// Total number of recorded openings over the whole session.
    pub fn num_openings(&self) -> usize {
        self.opened.total_recorded
    }

    /// Number of completed integrity checks.
    pub fn num_integrity_checks(&self) -> usize {
        self.integrity_checks
    }

    pub(crate) fn note_integrity_check(&mut self) {
        self.integrity_checks += 1;
    }

    /// Local (non-joint) randomness for commitment nonces and seed shares.
    pub fn random_bytes(&mut self, buffer: &mut [u8]) {
        self.rng.fill_bytes(buffer);
    }

    pub(crate) fn take_triple(
        &mut self,
    ) -> Result<(SpdzShare<T>, SpdzShare<T>, SpdzShare<T>), ProtocolError> {
        self.dealer
            .next_triple()
            .ok_or(ProtocolError::Exhausted("Beaver triples"))
    }

    pub(crate) fn take_input_mask_own(&mut self) -> Result<(SpdzShare<T>, T), ProtocolError> {
        self.dealer
            .next_input_mask_own()
            .ok_or(ProtocolError::Exhausted("input masks"))
    }

    pub(crate) fn take_input_mask_for(
        &mut self,
        party: usize,
    ) -> Result<SpdzShare<T>, ProtocolError> {
        self.dealer
            .next_input_mask_for(party)
            .ok_or(ProtocolError::Exhausted("input masks"))
    }

    pub(crate) fn take_random_share(&mut self) -> Result<SpdzShare<T>, ProtocolError> {
        self.dealer
            .next_random_share()
            .ok_or(ProtocolError::Exhausted("random shares"))
    }

    pub(crate) fn take_bit(&mut self) -> Result<SpdzShare<T>, ProtocolError> {
        self.dealer
            .next_bit()
            .ok_or(ProtocolError::Exhausted("random bits"))
    }

    pub(crate) fn take_truncation_pair(
        &mut self,
        d: usize,
    ) -> Result<(SpdzShare<T>, SpdzShare<T>), ProtocolError> {
        self.dealer
            .next_truncation_pair(d)
            .ok_or(ProtocolError::Exhausted("truncation pairs"))
    }
}
