use std::{fmt, mem};

use futures::{Sink, Stream};

use crate::{
    deferred::Deferred,
    graph::{
        collect_scope, protocol_cell, EvaluationStatus, ProtocolBuilder, ProtocolCell,
        ProtocolError,
    },
    spdz::{mac_check::MacCheckProtocol, SpdzResourcePool},
    transport::{MultipartyTransport, TransportError},
    MpcContext, MpcField,
};

/// Error that aborts an MPC session.
///
/// Every failure carries the index of the batch in which it surfaced;
/// transport failures and attributable malicious behaviour also carry the
/// peer. Programmer errors (reading an unfulfilled deferred result, builder
/// misuse, a deadlocked graph) are panics, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// A peer deviated from the protocol.
    MaliciousBehaviour {
        batch: usize,
        peer: Option<usize>,
        reason: &'static str,
    },
    /// Network failure while exchanging a batch.
    Transport {
        batch: usize,
        error: TransportError,
    },
    /// A preprocessed-randomness queue ran dry.
    ResourceExhausted {
        batch: usize,
        resource: &'static str,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MaliciousBehaviour {
                batch,
                peer: Some(peer),
                reason,
            } => {
                write!(
                    f,
                    "Malicious behaviour of party {} in batch {}: {}",
                    peer, batch, reason
                )
            }
            Self::MaliciousBehaviour { batch, reason, .. } => {
                write!(f, "Malicious behaviour in batch {}: {}", batch, reason)
            }
            Self::Transport { batch, ref error } => {
                write!(f, "Transport failure in batch {}: {}", batch, error)
            }
            Self::ResourceExhausted { batch, resource } => {
                write!(f, "Ran out of preprocessed {} in batch {}", resource, batch)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Statistics collected during an MPC session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Evaluator sweeps over the computation graph.
    pub num_batches: usize,
    /// Network round-trips of the computation phase.
    pub num_rounds: usize,
    /// Values recorded for MAC-checking.
    pub num_openings: usize,
    /// Completed integrity checks, including the terminal one.
    pub num_integrity_checks: usize,
}

/// Per-sweep network view handed to native protocols.
///
/// Bytes written and expectations registered during round r are exchanged as
/// one message per peer when the sweep ends; the received bytes are readable
/// in round r+1. Protocols are stepped in the same order at every party, so
/// the slices line up without addressing metadata.
pub struct BatchNetwork {
    party_id: usize,
    outgoing: Vec<Vec<u8>>,
    expected: Vec<usize>,
    incoming: Vec<IncomingSlice>,
}

struct IncomingSlice {
    data: Vec<u8>,
    position: usize,
}

impl BatchNetwork {
    fn new(party_id: usize, num_parties: usize) -> Self {
        BatchNetwork {
            party_id,
            outgoing: vec![Vec::new(); num_parties],
            expected: vec![0; num_parties],
            incoming: (0..num_parties)
                .map(|_| IncomingSlice {
                    data: Vec::new(),
                    position: 0,
                })
                .collect(),
        }
    }

    /// ID of current party.
    pub fn party_id(&self) -> usize {
        self.party_id
    }

    /// Number of parties participating in the session.
    pub fn num_parties(&self) -> usize {
        self.outgoing.len()
    }

    /// IDs of all other parties, in order.
    pub fn peers(&self) -> Vec<usize> {
        (0..self.num_parties())
            .filter(|&peer| peer != self.party_id)
            .collect()
    }

    /// Queue bytes for one peer in this round's batch.
    pub fn send_to(&mut self, peer: usize, bytes: &[u8]) {
        if peer == self.party_id {
            panic!("Cannot send message on loopback");
        }
        self.outgoing[peer].extend_from_slice(bytes);
    }

    /// Queue the same bytes for every peer.
    pub fn send_to_all(&mut self, bytes: &[u8]) {
        for peer in self.peers() {
            self.outgoing[peer].extend_from_slice(bytes);
        }
    }

    /// Declare the number of bytes the next round will read from a peer.
    pub fn expect_from(&mut self, peer: usize, len: usize) {
        if peer == self.party_id {
            panic!("Cannot receive message on loopback");
        }
        self.expected[peer] += len;
    }

    /// Declare the number of bytes the next round will read from every peer.
    pub fn expect_from_all(&mut self, len: usize) {
        for peer in self.peers() {
            self.expected[peer] += len;
        }
    }

    /// Read bytes declared with `expect_from` in the previous round.
    pub fn receive_from(&mut self, peer: usize, len: usize) -> Vec<u8> {
        if peer == self.party_id {
            panic!("Cannot receive message on loopback");
        }
        let slice = &mut self.incoming[peer];
        if slice.position + len > slice.data.len() {
            panic!("Protocol read past its received batch slice");
        }
        let bytes = slice.data[slice.position..slice.position + len].to_vec();
        slice.position += len;
        bytes
    }

    fn take_contract(&mut self) -> (Vec<Option<Vec<u8>>>, Vec<usize>) {
        let num_parties = self.num_parties();
        let outgoing = mem::replace(&mut self.outgoing, vec![Vec::new(); num_parties])
            .into_iter()
            .map(|buffer| if buffer.is_empty() { None } else { Some(buffer) })
            .collect();
        let expected = mem::replace(&mut self.expected, vec![0; num_parties]);
        (outgoing, expected)
    }

    fn store_incoming(&mut self, messages: Vec<Option<Vec<u8>>>) {
        self.incoming = messages
            .into_iter()
            .map(|message| IncomingSlice {
                data: message.unwrap_or_default(),
                position: 0,
            })
            .collect();
    }
}

/// Step every active protocol one round, then perform the batched exchange
/// their contracts require. Returns whether the sweep touched the network.
async fn run_sweep<T, C, E>(
    active: &mut Vec<ProtocolCell<T>>,
    pool: &mut SpdzResourcePool<T>,
    network: &mut BatchNetwork,
    transport: &mut MultipartyTransport<Vec<u8>, C>,
    batch: usize,
) -> Result<bool, SessionError>
where
    T: MpcField,
    C: Stream<Item = Result<Vec<u8>, E>> + Sink<Vec<u8>> + Unpin,
{
    for cell in active.iter() {
        let mut slot = cell.borrow_mut();
        let round = slot.round;
        let status = slot
            .protocol
            .evaluate(round, pool, network)
            .map_err(|err| match err {
                ProtocolError::Malicious(reason) => SessionError::MaliciousBehaviour {
                    batch,
                    peer: None,
                    reason,
                },
                ProtocolError::Exhausted(resource) => {
                    SessionError::ResourceExhausted { batch, resource }
                }
            })?;
        slot.round += 1;
        if status == EvaluationStatus::IsDone {
            slot.done = true;
        }
    }
    active.retain(|cell| !cell.borrow().done);

    let (outgoing, expected) = network.take_contract();
    let communicated =
        outgoing.iter().any(Option::is_some) || expected.iter().any(|&bytes| bytes > 0);
    if communicated {
        let receive_flags = expected.iter().map(|&bytes| bytes > 0).collect();
        let messages = transport
            .exchange_batches(outgoing, receive_flags)
            .await
            .map_err(|error| SessionError::Transport { batch, error })?;

        for (peer, message) in messages.iter().enumerate() {
            let received = message.as_ref().map_or(0, Vec::len);
            if received != expected[peer] {
                return Err(SessionError::MaliciousBehaviour {
                    batch,
                    peer: Some(peer),
                    reason: "Batch length differs from the declared contract",
                });
            }
        }
        network.store_incoming(messages);
    }

    Ok(communicated)
}

/// Evaluate an MPC program.
///
/// The program builds the computation graph through the root builder; the
/// evaluator drives the graph in batched rounds until the root scope is
/// done, runs a terminal integrity check and only then hands out the
/// program's deferred output.
pub async fn run_program<T, C, E, F, R>(
    mut pool: SpdzResourcePool<T>,
    mut transport: MultipartyTransport<Vec<u8>, C>,
    program: F,
) -> Result<(R, SessionStats), SessionError>
where
    T: MpcField,
    C: Stream<Item = Result<Vec<u8>, E>> + Sink<Vec<u8>> + Unpin,
    F: FnOnce(&ProtocolBuilder<T>) -> Deferred<R>,
    R: Clone + 'static,
{
    assert_eq!(
        pool.num_parties(),
        transport.num_parties(),
        "Resource pool and transport disagree on the number of parties"
    );
    assert_eq!(
        pool.party_id(),
        transport.party_id(),
        "Resource pool and transport disagree on the party ID"
    );

    let (builder, root) = ProtocolBuilder::new_root();
    let result = program(&builder);
    drop(builder);

    let mut stats = SessionStats::default();
    let mut network = BatchNetwork::new(transport.party_id(), transport.num_parties());
    let mut active: Vec<ProtocolCell<T>> = Vec::new();
    let mut batch = 0;

    loop {
        let root_done = loop {
            let mut finished_any = false;
            let done = collect_scope(&root, &mut active, &mut finished_any);
            // A scope that finished during this pass may have unblocked a
            // leaf that was visited earlier in the same pass.
            if done || !active.is_empty() || !finished_any {
                break done;
            }
        };
        if active.is_empty() {
            if root_done {
                break;
            }
            panic!("Computation did not make progress: protocols are stuck on unfulfilled inputs");
        }

        let communicated =
            match run_sweep(&mut active, &mut pool, &mut network, &mut transport, batch).await {
                Ok(communicated) => communicated,
                Err(error) => {
                    result.fail("MPC session aborted");
                    return Err(error);
                }
            };
        stats.num_batches += 1;
        if communicated {
            stats.num_rounds += 1;
        }
        batch += 1;
    }

    // Nothing opened during the computation may be trusted before a final
    // check covers it.
    if let Err(error) =
        run_integrity_check(&mut pool, &mut network, &mut transport, &mut batch).await
    {
        result.fail("MPC session aborted");
        return Err(error);
    }

    stats.num_openings = pool.num_openings();
    stats.num_integrity_checks = pool.num_integrity_checks();
    Ok((result.value(), stats))
}

/// Drive a single MAC-check protocol to completion.
async fn run_integrity_check<T, C, E>(
    pool: &mut SpdzResourcePool<T>,
    network: &mut BatchNetwork,
    transport: &mut MultipartyTransport<Vec<u8>, C>,
    batch: &mut usize,
) -> Result<(), SessionError>
where
    T: MpcField,
    C: Stream<Item = Result<Vec<u8>, E>> + Sink<Vec<u8>> + Unpin,
{
    let done = Deferred::new();
    let mut active = vec![protocol_cell::<T>(Box::new(MacCheckProtocol::new(
        done.clone(),
    )))];
    while !active.is_empty() {
        run_sweep(&mut active, pool, network, transport, *batch).await?;
        *batch += 1;
    }
    done.value();
    Ok(())
}
