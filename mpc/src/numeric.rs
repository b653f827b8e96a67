use crate::{
    deferred::Deferred,
    graph::{attach_leaf, NativeProtocol, ScopeRef},
    spdz::{
        gates::{
            InputProtocol, LinearProtocol, MulProtocol, OpenProtocol, RandomBitProtocol,
            RandomShareProtocol, TruncationPairProtocol,
        },
        mac_check::MacCheckProtocol,
        SpdzShare,
    },
    MpcField,
};

/// Numeric operations over authenticated shares, attached to one scope of
/// the computation graph.
///
/// Linear operations are local and cost no communication round; `mul`
/// consumes one Beaver triple and one round; `input` and `open` cost one
/// round each (plus broadcast validation with more than two parties).
pub struct Numeric<T: MpcField> {
    scope: ScopeRef<T>,
}

impl<T: MpcField> Numeric<T> {
    pub(crate) fn new(scope: ScopeRef<T>) -> Self {
        Numeric { scope }
    }

    fn attach(&self, protocol: impl NativeProtocol<T> + 'static) {
        attach_leaf(&self.scope, Box::new(protocol));
    }

    /// Authenticated sharing of a public constant.
    pub fn known(&self, value: T) -> Deferred<SpdzShare<T>> {
        self.linear(Vec::new(), value)
    }

    /// Secret input contributed by `inputter`. Exactly the inputting party
    /// passes `Some`.
    pub fn input(&self, value: Option<T>, inputter: usize) -> Deferred<SpdzShare<T>> {
        let out = Deferred::new();
        self.attach(InputProtocol::new(value, inputter, out.clone()));
        out
    }

    /// Open a share towards all parties. The result is only trustworthy
    /// once a later integrity check covers it.
    pub fn open(&self, x: &Deferred<SpdzShare<T>>) -> Deferred<T> {
        let out = Deferred::new();
        self.attach(OpenProtocol::new(x.clone(), out.clone()));
        out
    }

    /// x + y.
    pub fn add(
        &self,
        x: &Deferred<SpdzShare<T>>,
        y: &Deferred<SpdzShare<T>>,
    ) -> Deferred<SpdzShare<T>> {
        self.linear(vec![(T::ONE, x.clone()), (T::ONE, y.clone())], T::ZERO)
    }

    /// x - y.
    pub fn sub(
        &self,
        x: &Deferred<SpdzShare<T>>,
        y: &Deferred<SpdzShare<T>>,
    ) -> Deferred<SpdzShare<T>> {
        self.linear(vec![(T::ONE, x.clone()), (-T::ONE, y.clone())], T::ZERO)
    }

    /// -x.
    pub fn neg(&self, x: &Deferred<SpdzShare<T>>) -> Deferred<SpdzShare<T>> {
        self.linear(vec![(-T::ONE, x.clone())], T::ZERO)
    }

    /// x + constant.
    pub fn add_plain(&self, constant: T, x: &Deferred<SpdzShare<T>>) -> Deferred<SpdzShare<T>> {
        self.linear(vec![(T::ONE, x.clone())], constant)
    }

    /// x - constant.
    pub fn sub_plain(&self, x: &Deferred<SpdzShare<T>>, constant: T) -> Deferred<SpdzShare<T>> {
        self.linear(vec![(T::ONE, x.clone())], -constant)
    }

    /// constant * x.
    pub fn mul_plain(&self, constant: T, x: &Deferred<SpdzShare<T>>) -> Deferred<SpdzShare<T>> {
        self.linear(vec![(constant, x.clone())], T::ZERO)
    }

    /// Arbitrary linear combination of shares plus a public constant.
    pub fn linear(
        &self,
        terms: Vec<(T, Deferred<SpdzShare<T>>)>,
        constant: T,
    ) -> Deferred<SpdzShare<T>> {
        let out = Deferred::new();
        self.attach(LinearProtocol::new(terms, constant, out.clone()));
        out
    }

    /// x * y via a Beaver triple.
    pub fn mul(
        &self,
        x: &Deferred<SpdzShare<T>>,
        y: &Deferred<SpdzShare<T>>,
    ) -> Deferred<SpdzShare<T>> {
        let out = Deferred::new();
        self.attach(MulProtocol::new(x.clone(), y.clone(), out.clone()));
        out
    }

    /// Preprocessed sharing of a uniform secret element.
    pub fn random(&self) -> Deferred<SpdzShare<T>> {
        let out = Deferred::new();
        self.attach(RandomShareProtocol::new(out.clone()));
        out
    }

    /// Preprocessed sharing of a secret bit.
    pub fn random_bit(&self) -> Deferred<SpdzShare<T>> {
        let out = Deferred::new();
        self.attach(RandomBitProtocol::new(out.clone()));
        out
    }

    /// Preprocessed sharings of (floor(r / 2^d), r).
    pub fn truncation_pair(&self, d: usize) -> Deferred<(SpdzShare<T>, SpdzShare<T>)> {
        let out = Deferred::new();
        self.attach(TruncationPairProtocol::new(d, out.clone()));
        out
    }

    /// Check the integrity of everything opened so far. The deferred result
    /// resolves once the check has passed.
    pub fn check_integrity(&self) -> Deferred<()> {
        let out = Deferred::new();
        self.attach(MacCheckProtocol::new(out.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use ff::Field;
    use futures::{stream::FuturesUnordered, StreamExt};

    use crate::{
        deferred::Deferred,
        executor::run_program,
        fields::Mersenne61,
        graph::ProtocolBuilder,
        spdz::{FakeSpdzDealer, SpdzResourcePool, SpdzShare},
        transport,
    };

    type Fp = Mersenne61;

    /// Run a program on a single party; local protocols need no peers.
    async fn run_alone<R, F>(program: F) -> R
    where
        R: Clone + 'static,
        F: FnOnce(&ProtocolBuilder<Fp>) -> Deferred<R> + 'static,
    {
        let transport = transport::mock_multiparty_channels(1, 1024)
            .pop()
            .unwrap();
        let dealer = FakeSpdzDealer::<Fp>::new(1, 0, 1);
        let pool = SpdzResourcePool::new(Box::new(dealer));
        run_program(pool, transport, program).await.unwrap().0
    }

    #[tokio::test]
    async fn test_linear_surface() {
        let output = run_alone(|builder| {
            builder
                .seq(|b| {
                    let numeric = b.numeric();
                    let x = numeric.known(Fp::from(10u64));
                    let y = numeric.known(Fp::from(4u64));
                    let combined = numeric.linear(
                        vec![
                            (Fp::from(3u64), numeric.add(&x, &y)),   // 3 * 14
                            (Fp::ONE, numeric.sub(&x, &y)),          // + 6
                            (Fp::from(2u64), numeric.neg(&x)),       // - 20
                        ],
                        Fp::from(5u64),
                    );
                    let shifted = numeric.add_plain(Fp::from(7u64), &combined);
                    let scaled = numeric.mul_plain(Fp::from(2u64), &shifted);
                    numeric.open(&numeric.sub_plain(&scaled, Fp::from(1u64)))
                })
                .result()
        })
        .await;
        // 2 * (3*14 + 6 - 20 + 5 + 7) - 1
        assert_eq!(output, Fp::from(79u64));
    }

    #[tokio::test]
    async fn test_random_bit_is_binary() {
        let output = run_alone(|builder| {
            builder
                .seq(|b| {
                    let numeric = b.numeric();
                    let bit = numeric.random_bit();
                    numeric.open(&bit)
                })
                .result()
        })
        .await;
        assert!(output == Fp::ZERO || output == Fp::ONE);
    }

    #[tokio::test]
    async fn test_truncation_pair_matches_shift() {
        let (truncated, full) = run_alone(|builder| {
            builder
                .seq(|b| b.numeric().truncation_pair(10))
                .seq(|(truncated, full): (SpdzShare<Fp>, SpdzShare<Fp>), b| {
                    let numeric = b.numeric();
                    let truncated = numeric.open(&Deferred::ready(truncated));
                    let full = numeric.open(&Deferred::ready(full));
                    Deferred::ready((truncated, full))
                })
                .seq(|(truncated, full): (Deferred<Fp>, Deferred<Fp>), _| {
                    Deferred::ready((truncated.value(), full.value()))
                })
                .result()
        })
        .await;
        assert_eq!(truncated, crate::fields::shift_representative(&full, 10));
    }

    #[tokio::test]
    async fn test_random_share_opens_consistently() {
        let num_parties = 3;
        let channels = transport::mock_multiparty_channels(num_parties, 1 << 16);
        let futures = FuturesUnordered::new();
        for (party_id, transport) in channels.into_iter().enumerate() {
            let dealer = FakeSpdzDealer::<Fp>::new(num_parties, party_id, 33);
            let pool = SpdzResourcePool::new(Box::new(dealer));
            futures.push(async move {
                run_program(pool, transport, |builder| {
                    builder
                        .seq(|b| {
                            let numeric = b.numeric();
                            let random = numeric.random();
                            numeric.open(&random)
                        })
                        .result()
                })
                .await
                .unwrap()
                .0
            });
        }
        let outputs: Vec<Fp> = futures.collect().await;
        assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
