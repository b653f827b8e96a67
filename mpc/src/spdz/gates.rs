use crate::{
    deferred::Deferred,
    executor::BatchNetwork,
    graph::{EvaluationStatus, NativeProtocol, ProtocolError},
    spdz::{SpdzResourcePool, SpdzShare},
    MpcContext, MpcField,
};

fn decode_element<T: MpcField>(bytes: &[u8]) -> Result<T, ProtocolError> {
    T::from_bytes(bytes).ok_or(ProtocolError::Malicious("Invalid field element received"))
}

/// Local linear combination of shares and a public constant. Zero rounds.
///
/// Covers known values, addition, subtraction, negation and multiplication
/// by public constants; all of them are free of communication.
pub struct LinearProtocol<T: MpcField> {
    terms: Vec<(T, Deferred<SpdzShare<T>>)>,
    constant: T,
    out: Deferred<SpdzShare<T>>,
}

impl<T: MpcField> LinearProtocol<T> {
    pub fn new(
        terms: Vec<(T, Deferred<SpdzShare<T>>)>,
        constant: T,
        out: Deferred<SpdzShare<T>>,
    ) -> Self {
        LinearProtocol {
            terms,
            constant,
            out,
        }
    }
}

impl<T: MpcField> NativeProtocol<T> for LinearProtocol<T> {
    fn is_ready(&self) -> bool {
        self.terms.iter().all(|(_, share)| share.is_ready())
    }

    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut SpdzResourcePool<T>,
        _network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        let mut acc = pool.share_plain(self.constant);
        for (coefficient, share) in &self.terms {
            acc = acc + share.value() * *coefficient;
        }
        self.out.fulfil(acc);
        Ok(EvaluationStatus::IsDone)
    }
}

/// Secret input by one party.
///
/// The inputter masks its value with a preprocessed input mask and
/// broadcasts the difference; everyone then shifts the mask sharing by the
/// public difference. With more than two parties the broadcast is validated
/// by an exchange of digests of the received bytes, which rules out
/// equivocation by the inputter.
pub struct InputProtocol<T: MpcField> {
    value: Option<T>,
    inputter: usize,
    mask_share: Option<SpdzShare<T>>,
    masked: Option<T>,
    share: Option<SpdzShare<T>>,
    digest: Option<[u8; 32]>,
    out: Deferred<SpdzShare<T>>,
}

impl<T: MpcField> InputProtocol<T> {
    pub fn new(value: Option<T>, inputter: usize, out: Deferred<SpdzShare<T>>) -> Self {
        InputProtocol {
            value,
            inputter,
            mask_share: None,
            masked: None,
            share: None,
            digest: None,
            out,
        }
    }
}

impl<T: MpcField> NativeProtocol<T> for InputProtocol<T> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut SpdzResourcePool<T>,
        network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        match round {
            0 => {
                if pool.party_id() == self.inputter {
                    let value = self
                        .value
                        .expect("Input value missing on the inputting party");
                    let (mask, plain) = pool.take_input_mask_own()?;
                    let masked = value - plain;
                    self.mask_share = Some(mask);
                    self.masked = Some(masked);
                    network.send_to_all(&masked.to_bytes());
                } else {
                    if self.value.is_some() {
                        panic!("Input value supplied by a party other than the inputter");
                    }
                    self.mask_share = Some(pool.take_input_mask_for(self.inputter)?);
                    network.expect_from(self.inputter, T::byte_length());
                }
                Ok(EvaluationStatus::HasMoreRounds)
            }
            1 => {
                let masked = match self.masked {
                    Some(masked) => masked,
                    None => {
                        let bytes = network.receive_from(self.inputter, T::byte_length());
                        let masked = decode_element(&bytes)?;
                        self.masked = Some(masked);
                        masked
                    }
                };
                let mask = self.mask_share.expect("Mask drawn in round 0");
                let share = mask + pool.share_plain(masked);

                if pool.num_parties() > 2 {
                    let digest = *blake3::hash(&masked.to_bytes()).as_bytes();
                    network.send_to_all(&digest);
                    network.expect_from_all(32);
                    self.digest = Some(digest);
                    self.share = Some(share);
                    Ok(EvaluationStatus::HasMoreRounds)
                } else {
                    self.out.fulfil(share);
                    Ok(EvaluationStatus::IsDone)
                }
            }
            _ => {
                let own = self.digest.expect("Digest computed in round 1");
                for peer in network.peers() {
                    let received = network.receive_from(peer, 32);
                    if received != own {
                        return Err(ProtocolError::Malicious("Broadcast digests did not match"));
                    }
                }
                self.out
                    .fulfil(self.share.take().expect("Share computed in round 1"));
                Ok(EvaluationStatus::IsDone)
            }
        }
    }
}

/// Partial opening of an authenticated share: every party broadcasts its
/// value part and sums what it receives. One round.
///
/// The reconstructed value is recorded in the opened-value store; it must
/// not be trusted until a subsequent MAC-check covers it.
pub struct OpenProtocol<T: MpcField> {
    input: Deferred<SpdzShare<T>>,
    share: Option<SpdzShare<T>>,
    out: Deferred<T>,
}

impl<T: MpcField> OpenProtocol<T> {
    pub fn new(input: Deferred<SpdzShare<T>>, out: Deferred<T>) -> Self {
        OpenProtocol {
            input,
            share: None,
            out,
        }
    }
}

impl<T: MpcField> NativeProtocol<T> for OpenProtocol<T> {
    fn is_ready(&self) -> bool {
        self.input.is_ready()
    }

    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut SpdzResourcePool<T>,
        network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        if round == 0 {
            let share = self.input.value();
            self.share = Some(share);
            network.send_to_all(&share.value.to_bytes());
            network.expect_from_all(T::byte_length());
            Ok(EvaluationStatus::HasMoreRounds)
        } else {
            let share = self.share.expect("Share captured in round 0");
            let mut total = share.value;
            for peer in network.peers() {
                let bytes = network.receive_from(peer, T::byte_length());
                total += decode_element::<T>(&bytes)?;
            }
            pool.record_opened(share, total);
            self.out.fulfil(total);
            Ok(EvaluationStatus::IsDone)
        }
    }
}

/// Beaver multiplication of two secrets. Consumes one triple and costs one
/// round carrying two batched openings.
pub struct MulProtocol<T: MpcField> {
    lhs: Deferred<SpdzShare<T>>,
    rhs: Deferred<SpdzShare<T>>,
    triple: Option<(SpdzShare<T>, SpdzShare<T>, SpdzShare<T>)>,
    epsilon_share: Option<SpdzShare<T>>,
    delta_share: Option<SpdzShare<T>>,
    out: Deferred<SpdzShare<T>>,
}

impl<T: MpcField> MulProtocol<T> {
    pub fn new(
        lhs: Deferred<SpdzShare<T>>,
        rhs: Deferred<SpdzShare<T>>,
        out: Deferred<SpdzShare<T>>,
    ) -> Self {
        MulProtocol {
            lhs,
            rhs,
            triple: None,
            epsilon_share: None,
            delta_share: None,
            out,
        }
    }
}

impl<T: MpcField> NativeProtocol<T> for MulProtocol<T> {
    fn is_ready(&self) -> bool {
        self.lhs.is_ready() && self.rhs.is_ready()
    }

    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut SpdzResourcePool<T>,
        network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        let len = T::byte_length();
        if round == 0 {
            let (a, b, c) = pool.take_triple()?;
            let epsilon_share = self.lhs.value() - a;
            let delta_share = self.rhs.value() - b;

            let mut message = epsilon_share.value.to_bytes();
            message.extend_from_slice(&delta_share.value.to_bytes());
            network.send_to_all(&message);
            network.expect_from_all(2 * len);

            self.triple = Some((a, b, c));
            self.epsilon_share = Some(epsilon_share);
            self.delta_share = Some(delta_share);
            Ok(EvaluationStatus::HasMoreRounds)
        } else {
            let epsilon_share = self.epsilon_share.expect("Masked shares sent in round 0");
            let delta_share = self.delta_share.expect("Masked shares sent in round 0");
            let (a, b, c) = self.triple.expect("Triple drawn in round 0");

            let mut epsilon = epsilon_share.value;
            let mut delta = delta_share.value;
            for peer in network.peers() {
                let bytes = network.receive_from(peer, 2 * len);
                epsilon += decode_element::<T>(&bytes[..len])?;
                delta += decode_element::<T>(&bytes[len..])?;
            }
            pool.record_opened(epsilon_share, epsilon);
            pool.record_opened(delta_share, delta);

            let product = c + b * epsilon + a * delta + pool.share_plain(epsilon * delta);
            self.out.fulfil(product);
            Ok(EvaluationStatus::IsDone)
        }
    }
}

/// Preprocessed random element. Zero rounds.
pub struct RandomShareProtocol<T: MpcField> {
    out: Deferred<SpdzShare<T>>,
}

impl<T: MpcField> RandomShareProtocol<T> {
    pub fn new(out: Deferred<SpdzShare<T>>) -> Self {
        RandomShareProtocol { out }
    }
}

impl<T: MpcField> NativeProtocol<T> for RandomShareProtocol<T> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut SpdzResourcePool<T>,
        _network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        self.out.fulfil(pool.take_random_share()?);
        Ok(EvaluationStatus::IsDone)
    }
}

/// Preprocessed random bit. Zero rounds.
pub struct RandomBitProtocol<T: MpcField> {
    out: Deferred<SpdzShare<T>>,
}

impl<T: MpcField> RandomBitProtocol<T> {
    pub fn new(out: Deferred<SpdzShare<T>>) -> Self {
        RandomBitProtocol { out }
    }
}

impl<T: MpcField> NativeProtocol<T> for RandomBitProtocol<T> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut SpdzResourcePool<T>,
        _network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        self.out.fulfil(pool.take_bit()?);
        Ok(EvaluationStatus::IsDone)
    }
}

/// Preprocessed truncation pair (floor(r / 2^d), r). Zero rounds.
pub struct TruncationPairProtocol<T: MpcField> {
    shift: usize,
    out: Deferred<(SpdzShare<T>, SpdzShare<T>)>,
}

impl<T: MpcField> TruncationPairProtocol<T> {
    pub fn new(shift: usize, out: Deferred<(SpdzShare<T>, SpdzShare<T>)>) -> Self {
        TruncationPairProtocol { shift, out }
    }
}

impl<T: MpcField> NativeProtocol<T> for TruncationPairProtocol<T> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut SpdzResourcePool<T>,
        _network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError> {
        self.out.fulfil(pool.take_truncation_pair(self.shift)?);
        Ok(EvaluationStatus::IsDone)
    }
}
