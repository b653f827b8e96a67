use std::{cell::RefCell, rc::Rc};

use crate::{
    deferred::Deferred, executor::BatchNetwork, numeric::Numeric, spdz::SpdzResourcePool, MpcField,
};

/// Outcome of evaluating one round of a native protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvaluationStatus {
    HasMoreRounds,
    IsDone,
}

/// Failure raised by a native protocol round.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// A peer deviated from the protocol.
    Malicious(&'static str),
    /// A preprocessed-randomness queue ran dry.
    Exhausted(&'static str),
}

/// Round-numbered state machine behind a leaf of the computation graph.
///
/// In each round a protocol may write bytes for peers and register the byte
/// counts it expects back. Registered bytes are exchanged when the sweep
/// ends and become readable through [`BatchNetwork::receive_from`] on the
/// following round. The per-round byte contract is fixed, so the exchange
/// order is identical at every party.
pub trait NativeProtocol<T: MpcField> {
    /// Whether all operands are materialised. Protocols that are not ready
    /// are skipped during collection and retried on the next sweep.
    fn is_ready(&self) -> bool {
        true
    }

    /// Advance the state machine by one round.
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut SpdzResourcePool<T>,
        network: &mut BatchNetwork,
    ) -> Result<EvaluationStatus, ProtocolError>;
}

/// Composition mode of a scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    /// Children are yielded one after another; child k+1 starts only after
    /// child k is done.
    Sequential,
    /// Children are independent and share round batches.
    Parallel,
}

pub(crate) struct ProtocolSlot<T: MpcField> {
    pub(crate) protocol: Box<dyn NativeProtocol<T>>,
    pub(crate) round: usize,
    pub(crate) started: bool,
    pub(crate) done: bool,
}

pub(crate) type ProtocolCell<T> = Rc<RefCell<ProtocolSlot<T>>>;

pub(crate) fn protocol_cell<T: MpcField>(protocol: Box<dyn NativeProtocol<T>>) -> ProtocolCell<T> {
    Rc::new(RefCell::new(ProtocolSlot {
        protocol,
        round: 0,
        started: false,
        done: false,
    }))
}

enum Node<T: MpcField> {
    Leaf(ProtocolCell<T>),
    Scope(ScopeRef<T>),
    Pending(PendingScope<T>),
}

/// Sub-computation that has not been built yet. The closure runs exactly
/// once, when the evaluator first reaches this position in its scope.
struct PendingScope<T: MpcField> {
    kind: ScopeKind,
    build: Option<Box<dyn FnOnce(&ProtocolBuilder<T>)>>,
}

pub(crate) struct ScopeBody<T: MpcField> {
    kind: ScopeKind,
    children: Vec<Node<T>>,
    cursor: usize,
    finalizer: Option<Box<dyn FnOnce()>>,
    finished: bool,
}

pub(crate) type ScopeRef<T> = Rc<RefCell<ScopeBody<T>>>;

pub(crate) fn new_scope<T: MpcField>(kind: ScopeKind) -> ScopeRef<T> {
    Rc::new(RefCell::new(ScopeBody {
        kind,
        children: Vec::new(),
        cursor: 0,
        finalizer: None,
        finished: false,
    }))
}

fn append_node<T: MpcField>(scope: &ScopeRef<T>, node: Node<T>) {
    let mut body = scope.borrow_mut();
    if body.finished {
        panic!("Computation added to a completed scope");
    }
    body.children.push(node);
}

pub(crate) fn attach_leaf<T: MpcField>(scope: &ScopeRef<T>, protocol: Box<dyn NativeProtocol<T>>) {
    append_node(scope, Node::Leaf(protocol_cell(protocol)));
}

/// Append every startable protocol of the subtree to the batch, in the
/// deterministic order shared by all parties. Returns true once the scope
/// and all of its children are done.
///
/// `finished_any` is set whenever a scope completes during this pass. A
/// finishing scope fulfils its deferred output, which may make leaves that
/// were already visited in the same pass ready; the evaluator then collects
/// again before concluding that the graph is stuck.
pub(crate) fn collect_scope<T: MpcField>(
    scope: &ScopeRef<T>,
    batch: &mut Vec<ProtocolCell<T>>,
    finished_any: &mut bool,
) -> bool {
    if scope.borrow().finished {
        return true;
    }
    let kind = scope.borrow().kind;
    let done = match kind {
        ScopeKind::Sequential => collect_sequential(scope, batch, finished_any),
        ScopeKind::Parallel => collect_parallel(scope, batch, finished_any),
    };
    if done {
        finish_scope(scope);
        *finished_any = true;
    }
    done
}

fn collect_sequential<T: MpcField>(
    scope: &ScopeRef<T>,
    batch: &mut Vec<ProtocolCell<T>>,
    finished_any: &mut bool,
) -> bool {
    loop {
        let cursor = scope.borrow().cursor;
        if cursor >= scope.borrow().children.len() {
            return true;
        }
        expand_child(scope, cursor);
        if !collect_child(scope, cursor, batch, finished_any) {
            return false;
        }
        scope.borrow_mut().cursor += 1;
    }
}

fn collect_parallel<T: MpcField>(
    scope: &ScopeRef<T>,
    batch: &mut Vec<ProtocolCell<T>>,
    finished_any: &mut bool,
) -> bool {
    let mut done = true;
    let mut index = 0;
    while index < scope.borrow().children.len() {
        expand_child(scope, index);
        done &= collect_child(scope, index, batch, finished_any);
        index += 1;
    }
    done
}

fn collect_child<T: MpcField>(
    scope: &ScopeRef<T>,
    index: usize,
    batch: &mut Vec<ProtocolCell<T>>,
    finished_any: &mut bool,
) -> bool {
    enum Handle<T: MpcField> {
        Leaf(ProtocolCell<T>),
        Scope(ScopeRef<T>),
    }
    let handle = match &scope.borrow().children[index] {
        Node::Leaf(cell) => Handle::Leaf(cell.clone()),
        Node::Scope(sub) => Handle::Scope(sub.clone()),
        Node::Pending(_) => unreachable!("Child collected before expansion"),
    };
    match handle {
        Handle::Leaf(cell) => collect_leaf(&cell, batch),
        Handle::Scope(sub) => collect_scope(&sub, batch, finished_any),
    }
}

fn collect_leaf<T: MpcField>(cell: &ProtocolCell<T>, batch: &mut Vec<ProtocolCell<T>>) -> bool {
    let mut slot = cell.borrow_mut();
    if slot.done {
        return true;
    }
    if !slot.started && slot.protocol.is_ready() {
        slot.started = true;
        batch.push(cell.clone());
    }
    false
}

fn expand_child<T: MpcField>(scope: &ScopeRef<T>, index: usize) {
    let pending = match &mut scope.borrow_mut().children[index] {
        Node::Pending(pending) => Some((
            pending.kind,
            pending.build.take().expect("Scope expanded twice"),
        )),
        _ => None,
    };
    if let Some((kind, build)) = pending {
        let sub = new_scope(kind);
        build(&ProtocolBuilder { scope: sub.clone() });
        scope.borrow_mut().children[index] = Node::Scope(sub);
    }
}

fn finish_scope<T: MpcField>(scope: &ScopeRef<T>) {
    let finalizer = {
        let mut body = scope.borrow_mut();
        body.finished = true;
        body.finalizer.take()
    };
    if let Some(finalize) = finalizer {
        finalize();
    }
}

/// Builder for one scope of the computation graph.
///
/// Composition happens through [`seq`](Self::seq) and [`par`](Self::par),
/// which append a lazily built sub-computation and return a [`BuildStep`]
/// for continuation-style chaining; leaf protocols are attached through the
/// [`numeric`](Self::numeric) surface.
pub struct ProtocolBuilder<T: MpcField> {
    pub(crate) scope: ScopeRef<T>,
}

impl<T: MpcField> ProtocolBuilder<T> {
    pub(crate) fn new_root() -> (Self, ScopeRef<T>) {
        let scope = new_scope(ScopeKind::Sequential);
        (
            ProtocolBuilder {
                scope: scope.clone(),
            },
            scope,
        )
    }

    /// Numeric operations attached to this scope.
    pub fn numeric(&self) -> Numeric<T> {
        Numeric::new(self.scope.clone())
    }

    /// Append a sequential sub-computation. Its body runs lazily, once the
    /// evaluator reaches it, and its protocols run one after another.
    pub fn seq<R, F>(&self, body: F) -> BuildStep<T, R>
    where
        R: Clone + 'static,
        F: FnOnce(&ProtocolBuilder<T>) -> Deferred<R> + 'static,
    {
        self.chain(ScopeKind::Sequential, body)
    }

    /// Append a parallel sub-computation. Its children must be independent;
    /// the evaluator interleaves their rounds within shared batches.
    pub fn par<R, F>(&self, body: F) -> BuildStep<T, R>
    where
        R: Clone + 'static,
        F: FnOnce(&ProtocolBuilder<T>) -> Deferred<R> + 'static,
    {
        self.chain(ScopeKind::Parallel, body)
    }

    fn chain<R, F>(&self, kind: ScopeKind, body: F) -> BuildStep<T, R>
    where
        R: Clone + 'static,
        F: FnOnce(&ProtocolBuilder<T>) -> Deferred<R> + 'static,
    {
        let chain = new_scope(ScopeKind::Sequential);
        let out = Deferred::new();
        push_stage(&chain, kind, out.clone(), body);
        append_node(&self.scope, Node::Scope(chain.clone()));
        BuildStep { chain, out }
    }
}

/// One step of a sequential chain. Further steps consume the previous
/// step's materialised output: `builder.seq(a).seq(|ra, b| ...)`.
pub struct BuildStep<T: MpcField, R> {
    chain: ScopeRef<T>,
    out: Deferred<R>,
}

impl<T: MpcField, R: Clone + 'static> BuildStep<T, R> {
    /// Continue with a sequential stage once this step's output is ready.
    pub fn seq<S, G>(self, body: G) -> BuildStep<T, S>
    where
        S: Clone + 'static,
        G: FnOnce(R, &ProtocolBuilder<T>) -> Deferred<S> + 'static,
    {
        self.step(ScopeKind::Sequential, body)
    }

    /// Continue with a parallel stage once this step's output is ready.
    pub fn par<S, G>(self, body: G) -> BuildStep<T, S>
    where
        S: Clone + 'static,
        G: FnOnce(R, &ProtocolBuilder<T>) -> Deferred<S> + 'static,
    {
        self.step(ScopeKind::Parallel, body)
    }

    fn step<S, G>(self, kind: ScopeKind, body: G) -> BuildStep<T, S>
    where
        S: Clone + 'static,
        G: FnOnce(R, &ProtocolBuilder<T>) -> Deferred<S> + 'static,
    {
        let previous = self.out;
        let out = Deferred::new();
        push_stage(&self.chain, kind, out.clone(), move |builder| {
            body(previous.value(), builder)
        });
        BuildStep {
            chain: self.chain,
            out,
        }
    }

    /// Deferred output of this step.
    pub fn result(&self) -> Deferred<R> {
        self.out.clone()
    }
}

fn push_stage<T, R, F>(chain: &ScopeRef<T>, kind: ScopeKind, out: Deferred<R>, body: F)
where
    T: MpcField,
    R: Clone + 'static,
    F: FnOnce(&ProtocolBuilder<T>) -> Deferred<R> + 'static,
{
    let build = Box::new(move |builder: &ProtocolBuilder<T>| {
        let inner = body(builder);
        builder.scope.borrow_mut().finalizer = Some(Box::new(move || out.fulfil(inner.value())));
    });
    append_node(
        chain,
        Node::Pending(PendingScope {
            kind,
            build: Some(build),
        }),
    );
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use ff::Field;

    use super::*;
    use crate::{
        executor::run_program,
        fields::Mersenne61,
        spdz::{FakeSpdzDealer, SpdzDealer, SpdzResourcePool, SpdzShare},
        transport,
    };

    type Fp = Mersenne61;

    async fn run_alone<R, F>(program: F) -> R
    where
        R: Clone + 'static,
        F: FnOnce(&ProtocolBuilder<Fp>) -> Deferred<R> + 'static,
    {
        let transport = transport::mock_multiparty_channels(1, 1024).pop().unwrap();
        let dealer = FakeSpdzDealer::<Fp>::new(1, 0, 1);
        let pool = SpdzResourcePool::new(Box::new(dealer));
        run_program(pool, transport, program).await.unwrap().0
    }

    #[tokio::test]
    async fn test_stages_run_lazily_and_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let result = {
            let log = log.clone();
            run_alone(move |builder| {
                let first_log = log.clone();
                let second_log = log.clone();
                let step = builder
                    .seq(move |b| {
                        first_log.borrow_mut().push("first stage");
                        b.numeric().known(Fp::from(5u64))
                    })
                    .seq(move |share: SpdzShare<Fp>, b| {
                        second_log.borrow_mut().push("second stage");
                        b.numeric().open(&Deferred::ready(share))
                    });
                log.borrow_mut().push("graph built");
                step.result()
            })
            .await
        };
        assert_eq!(result, Fp::from(5u64));
        assert_eq!(
            *log.borrow(),
            vec!["graph built", "first stage", "second stage"]
        );
    }

    #[tokio::test]
    async fn test_unready_leaf_is_retried_until_its_operand_exists() {
        // The add and open leaves sit next to a chain that produces their
        // operand; they are skipped at collection until it resolves.
        let output = run_alone(|builder| {
            builder
                .par(|b| {
                    let x = b.seq(|inner| inner.numeric().known(Fp::from(3u64))).result();
                    let numeric = b.numeric();
                    let y = numeric.add_plain(Fp::from(4u64), &x);
                    numeric.open(&y)
                })
                .result()
        })
        .await;
        assert_eq!(output, Fp::from(7u64));
    }

    #[tokio::test]
    async fn test_nested_composition() {
        let output = run_alone(|builder| {
            builder
                .seq(|b| {
                    let inner = b
                        .par(|p| {
                            let numeric = p.numeric();
                            let lhs = numeric.known(Fp::from(6u64));
                            let rhs = numeric.known(Fp::from(36u64));
                            Deferred::ready((lhs, rhs))
                        })
                        .seq(|(lhs, rhs), p| {
                            let numeric = p.numeric();
                            numeric.open(&numeric.sub(&rhs, &lhs))
                        });
                    inner.result()
                })
                .result()
        })
        .await;
        assert_eq!(output, Fp::from(30u64));
    }

    #[tokio::test]
    async fn test_consumer_ordered_before_its_producer() {
        // The open leaf precedes the computation that fulfils its operand
        // inside the same parallel scope; collection must revisit it once
        // the producing scope completes.
        let key = FakeSpdzDealer::<Fp>::new(1, 0, 1).auth_key_share();
        let share = SpdzShare::from_plain(Fp::from(5u64), key, 0);
        let output = run_alone(move |builder| {
            builder
                .par(move |b| {
                    let hole = Deferred::new();
                    let opened = b.numeric().open(&hole);
                    b.seq(move |_| {
                        hole.fulfil(share);
                        Deferred::ready(())
                    });
                    opened
                })
                .result()
        })
        .await;
        assert_eq!(output, Fp::from(5u64));
    }

    #[tokio::test]
    #[should_panic(expected = "completed scope")]
    async fn test_extending_a_completed_chain_panics() {
        run_alone(|builder| {
            let first = builder.seq(|b| b.numeric().known(Fp::ONE));
            builder
                .seq(move |_| {
                    let _ = first.seq(|_share: SpdzShare<Fp>, b| b.numeric().known(Fp::ONE));
                    Deferred::ready(())
                })
                .result()
        })
        .await;
    }
}
