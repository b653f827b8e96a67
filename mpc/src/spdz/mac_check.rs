use itertools::izip;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::{
    deferred::Deferred,
    executor::BatchNetwork,
    graph::{EvaluationStatus, NativeProtocol, ProtocolError},
    spdz::{SpdzResourcePool, SpdzShare},
    MpcField,
};

const SEED_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 32;
const DIGEST_LENGTH: usize = 32;

fn commit(payload: &[u8]) -> [u8; DIGEST_LENGTH] {
    *blake3::hash(payload).as_bytes()
}

/// Batched MAC-check over every value opened since the last check.
///
/// The parties agree on a joint DRBG seed by committing to and then opening
/// per-party contributions, draw one random coefficient per opened value,
/// and commit-open the residues `z_i = key_i * y - sum(r_j * mac_ij)`.
/// The residues of honest executions sum to zero; a non-zero sum or a bad
/// commitment aborts the session. A check with an empty store completes
/// without any communication.
pub struct MacCheckProtocol<T: MpcField> {
    shares: Vec<SpdzShare<T>>,
    values: Vec<T>,
    seed: [u8; SEED_LENGTH],
    seed_commitments: Vec<[u8; DIGEST_LENGTH]>,
    residue: T,
    residue_nonce: [u8; NONCE_LENGTH],
    residue_commitments: Vec<[u8; DIGEST_LENGTH]>,
    out: Deferred<()>,
}

impl<T: MpcField> MacCheckProtocol<T> {
    pub fn new(out: Deferred<()>) -> Self {
        MacCheckProtocol {
            shares: Vec::new(),
            values: Vec::new(),
            seed: [0; SEED_LENGTH],
            seed_commitments: Vec::new(),
            residue: T::ZERO,
            residue_nonce: [0; NONCE_LENGTH],
            residue_commitments: Vec::new(),
            out,
        }
    }

    fn compute_residue(&self, pool: &SpdzResourcePool<T>, joint_seed: [u8; SEED_LENGTH]) -> T {
        let mut drbg = ChaCha20Rng::from_seed(joint_seed);
        let coefficients: Vec<T> = self.values.iter().map(|_| T::sample(&mut drbg)).collect();

        let mut opened_combination = T::ZERO;
        let mut mac_combination = T::ZERO;
        for (coefficient, value, share) in izip!(&coefficients, &self.values, &self.shares) {
            opened_combination += *coefficient * value;
            mac_combination += *coefficient * share.mac;
        }
        pool.auth_key_share() * opened_combination - mac_combination
    }
}

impl<T: MpcField> NativeProtocol<T> for MacCheckProtocol<T> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut SpdzResourcePool<T>,
        network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        let num_parties = network.num_parties();
        match round {
            0 => {
                let (shares, values) = pool.take_opened();
                if shares.is_empty() {
                    pool.note_integrity_check();
                    self.out.fulfil(());
                    return Ok(EvaluationStatus::IsDone);
                }
                self.shares = shares;
                self.values = values;

                pool.random_bytes(&mut self.seed);
                self.seed_commitments = vec![[0; DIGEST_LENGTH]; num_parties];
                self.seed_commitments[network.party_id()] = commit(&self.seed);
                network.send_to_all(&self.seed_commitments[network.party_id()]);
                network.expect_from_all(DIGEST_LENGTH);
                Ok(EvaluationStatus::HasMoreRounds)
            }
            1 => {
                for peer in network.peers() {
                    let commitment = network.receive_from(peer, DIGEST_LENGTH);
                    self.seed_commitments[peer].copy_from_slice(&commitment);
                }
                network.send_to_all(&self.seed);
                network.expect_from_all(SEED_LENGTH);
                Ok(EvaluationStatus::HasMoreRounds)
            }
            2 => {
                let mut joint_seed = self.seed;
                for peer in network.peers() {
                    let contribution = network.receive_from(peer, SEED_LENGTH);
                    if commit(&contribution) != self.seed_commitments[peer] {
                        return Err(ProtocolError::Malicious("Seed commitment mismatch"));
                    }
                    for (joint, byte) in joint_seed.iter_mut().zip(&contribution) {
                        *joint ^= byte;
                    }
                }

                self.residue = self.compute_residue(pool, joint_seed);
                pool.random_bytes(&mut self.residue_nonce);

                let mut payload = self.residue.to_bytes();
                payload.extend_from_slice(&self.residue_nonce);
                self.residue_commitments = vec![[0; DIGEST_LENGTH]; num_parties];
                self.residue_commitments[network.party_id()] = commit(&payload);
                network.send_to_all(&self.residue_commitments[network.party_id()]);
                network.expect_from_all(DIGEST_LENGTH);
                Ok(EvaluationStatus::HasMoreRounds)
            }
            3 => {
                for peer in network.peers() {
                    let commitment = network.receive_from(peer, DIGEST_LENGTH);
                    self.residue_commitments[peer].copy_from_slice(&commitment);
                }
                let mut payload = self.residue.to_bytes();
                payload.extend_from_slice(&self.residue_nonce);
                network.send_to_all(&payload);
                network.expect_from_all(T::byte_length() + NONCE_LENGTH);
                Ok(EvaluationStatus::HasMoreRounds)
            }
            _ => {
                let len = T::byte_length();
                let mut residue_sum = self.residue;
                for peer in network.peers() {
                    let payload = network.receive_from(peer, len + NONCE_LENGTH);
                    if commit(&payload) != self.residue_commitments[peer] {
                        return Err(ProtocolError::Malicious("Residue commitment mismatch"));
                    }
                    residue_sum += T::from_bytes(&payload[..len])
                        .ok_or(ProtocolError::Malicious("Invalid field element received"))?;
                }
                if residue_sum != T::ZERO {
                    return Err(ProtocolError::Malicious("Mac check failed"));
                }
                pool.note_integrity_check();
                self.out.fulfil(());
                Ok(EvaluationStatus::IsDone)
            }
        }
    }
}
