mod config;
mod networking;

pub use config::{NetworkConfig, NetworkPartyConfig};
pub use networking::{connect_multiparty, NetChannel};

use std::{fmt, time::Duration};

use futures::{
    stream::{SplitSink, SplitStream},
    FutureExt, Sink, SinkExt, Stream, StreamExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_serde::formats::Bincode;
use tokio_util::codec::LengthDelimitedCodec;

/// Error type for channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    Send(usize),
    Recv(usize),
    Timeout(usize),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Send(id) => write!(f, "Error while sending message to {}", id),
            Self::Recv(id) => write!(f, "Error while receiving message from {}", id),
            Self::Timeout(id) => write!(f, "Timed out while waiting for message from {}", id),
        }
    }
}

/// Wrapper for peer-to-peer connections in multi-party protocol.
pub struct MultipartyTransport<T, Channel> {
    channels: Vec<Option<(SplitSink<Channel, T>, SplitStream<Channel>)>>,
    party_id: usize,
    receive_timeout: Option<Duration>,
}

impl<T, Channel> MultipartyTransport<T, Channel>
where
    Channel: Stream + Sink<T>,
{
    /// Create wrapper for given list of connections. All channels but party_id should be present.
    pub fn new(channels: impl IntoIterator<Item = Option<Channel>>, party_id: usize) -> Self {
        // We split streams into unidirectional halves. This allows us to
        // asynchronously wait on both receives and sends without bothering borrow checker.
        let channels: Vec<_> = channels.into_iter().map(|x| x.map(|x| x.split())).collect();
        for (id, channel) in channels.iter().enumerate() {
            if id != party_id && channel.is_none() {
                panic!("Channel missing for party {}", id);
            }
        }
        Self {
            channels,
            party_id,
            receive_timeout: None,
        }
    }
}

impl<T, Channel> MultipartyTransport<T, Channel> {
    /// Number of parties participating in multi-party protocol.
    pub fn num_parties(&self) -> usize {
        self.channels.len()
    }

    /// ID of current party.
    pub fn party_id(&self) -> usize {
        self.party_id
    }

    /// Abort receives that take longer than the given duration. A stalled
    /// peer then surfaces as a transport error instead of hanging the
    /// session.
    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
        self.receive_timeout = timeout;
    }
}

async fn receive_raw<T, E, S>(
    stream: &mut S,
    other_id: usize,
    timeout: Option<Duration>,
) -> Result<T, TransportError>
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    let message = match timeout {
        Some(duration) => tokio::time::timeout(duration, stream.next())
            .await
            .map_err(|_| TransportError::Timeout(other_id))?,
        None => stream.next().await,
    };
    match message {
        Some(Ok(message)) => Ok(message),
        _ => Err(TransportError::Recv(other_id)),
    }
}

impl<T, E, Channel> MultipartyTransport<T, Channel>
where
    T: Clone,
    Channel: Stream<Item = Result<T, E>> + Sink<T> + Unpin,
{
    /// Send message to party with given ID.
    pub async fn send_to(&mut self, other_id: usize, msg: T) -> Result<(), TransportError> {
        if other_id == self.party_id {
            panic!("Cannot send message on loopback");
        }
        let (sink, _) = self.channels[other_id].as_mut().unwrap();
        sink.send(msg)
            .await
            .map_err(|_| TransportError::Send(other_id))
    }

    /// Receive message from party with given ID.
    pub async fn receive_from(&mut self, other_id: usize) -> Result<T, TransportError> {
        if other_id == self.party_id {
            panic!("Cannot receive message on loopback");
        }
        let timeout = self.receive_timeout;
        let (_, stream) = self.channels[other_id].as_mut().unwrap();
        receive_raw(stream, other_id, timeout).await
    }

    /// Send message to all parties.
    pub async fn send_to_all(&mut self, msg: T) -> Result<(), TransportError> {
        let party_id = self.party_id;
        futures::future::try_join_all(
            self.channels
                .iter_mut()
                .enumerate()
                .filter(|(id, _)| *id != party_id)
                .map(|(id, channel)| {
                    let (sink, _) = channel.as_mut().unwrap();
                    sink.send(msg.clone())
                        .then(move |x| async move { x.map_err(|_| TransportError::Send(id)) })
                }),
        )
        .await
        .map(|_| ())
    }

    /// Receive messages from all parties.
    pub async fn receive_from_all(&mut self) -> Result<Vec<(usize, T)>, TransportError> {
        let party_id = self.party_id;
        let timeout = self.receive_timeout;
        futures::future::try_join_all(
            self.channels
                .iter_mut()
                .enumerate()
                .filter(|(id, _)| *id != party_id)
                .map(|(id, channel)| {
                    let (_, stream) = channel.as_mut().unwrap();
                    receive_raw(stream, id, timeout).map(move |result| result.map(|msg| (id, msg)))
                }),
        )
        .await
    }

    /// Concurrently send and receive one batch message per peer.
    ///
    /// `outgoing[peer]` is sent when present; a reply is awaited from every
    /// peer whose `expect[peer]` flag is set. Returns the received messages
    /// indexed by peer.
    pub async fn exchange_batches(
        &mut self,
        outgoing: Vec<Option<T>>,
        expect: Vec<bool>,
    ) -> Result<Vec<Option<T>>, TransportError> {
        let party_id = self.party_id;
        let timeout = self.receive_timeout;
        let mut received = vec![None; self.channels.len()];

        let exchanged = futures::future::try_join_all(
            self.channels
                .iter_mut()
                .zip(outgoing)
                .zip(expect)
                .enumerate()
                .filter(|(id, _)| *id != party_id)
                .map(|(id, ((channel, message), expect_reply))| {
                    let (sink, stream) = channel.as_mut().unwrap();
                    let send_future = async move {
                        match message {
                            Some(message) => sink
                                .send(message)
                                .await
                                .map_err(|_| TransportError::Send(id)),
                            None => Ok(()),
                        }
                    };
                    let receive_future = async move {
                        if expect_reply {
                            receive_raw(stream, id, timeout).await.map(Some)
                        } else {
                            Ok(None)
                        }
                    };
                    futures::future::try_join(send_future, receive_future)
                        .map(move |result| result.map(|(_, reply)| (id, reply)))
                }),
        )
        .await?;

        for (id, reply) in exchanged {
            received[id] = reply;
        }
        Ok(received)
    }
}

/// Length-framed Bincode-encoded messages channel.
pub type BincodeStreamSink<T, C> =
    tokio_serde::Framed<tokio_util::codec::Framed<C, LengthDelimitedCodec>, T, T, Bincode<T, T>>;

/// Length-framed Bincode-encoded tokio's Duplex stream.
pub type BincodeDuplex<T> = BincodeStreamSink<T, DuplexStream>;

/// Create length-framed Bincode-encoded message channel from AsyncRead/Write.
pub fn wrap_channel_with_bincode<T, C>(channel: C) -> BincodeStreamSink<T, C>
where
    C: AsyncRead + AsyncWrite,
{
    let length_delimited = tokio_util::codec::Framed::new(channel, LengthDelimitedCodec::new());
    tokio_serde::Framed::new(length_delimited, Bincode::default())
}

/// Create bidirectional Bincode-encoded channel.
pub fn bincode_duplex<T>(max_buf_size: usize) -> (BincodeDuplex<T>, BincodeDuplex<T>) {
    let (a, b) = tokio::io::duplex(max_buf_size);
    (wrap_channel_with_bincode(a), wrap_channel_with_bincode(b))
}

/// Create in-process channels for testing multiparty protocols.
pub fn mock_multiparty_channels<T>(
    num_parties: usize,
    max_buf_size: usize,
) -> Vec<MultipartyTransport<T, BincodeDuplex<T>>>
where
    T: Clone + Serialize + DeserializeOwned + Unpin,
{
    let mut matrix: Vec<Vec<_>> = (0..num_parties)
        .map(|_| (0..num_parties).map(|_| None).collect())
        .collect();

    for i in 0..num_parties {
        for j in 0..i {
            let (a, b) = bincode_duplex::<T>(max_buf_size);
            matrix[i][j] = Some(a);
            matrix[j][i] = Some(b);
        }
    }

    matrix
        .into_iter()
        .enumerate()
        .map(|(id, row)| MultipartyTransport::new(row, id))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream::FuturesUnordered;
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_exchange_batches() {
        let mut transports = mock_multiparty_channels::<Vec<u8>>(3, 1024);
        let futures = FuturesUnordered::new();
        for (id, mut transport) in transports.drain(..).enumerate() {
            futures.push(async move {
                let outgoing = (0..3)
                    .map(|peer| (peer != id).then(|| vec![id as u8; 4]))
                    .collect();
                let expect = (0..3).map(|peer| peer != id).collect();
                let received = transport.exchange_batches(outgoing, expect).await.unwrap();
                for (peer, message) in received.into_iter().enumerate() {
                    if peer == id {
                        assert!(message.is_none());
                    } else {
                        assert_eq!(message.unwrap(), vec![peer as u8; 4]);
                    }
                }
            });
        }
        let _: Vec<()> = futures.collect().await;
    }

    #[tokio::test]
    async fn test_partial_exchange() {
        let mut transports = mock_multiparty_channels::<Vec<u8>>(2, 1024);
        let second = transports.pop().unwrap();
        let mut first = transports.pop().unwrap();

        // Only party 0 expects data; party 1 only sends.
        let sender = async move {
            let mut second = second;
            second
                .exchange_batches(vec![Some(vec![7; 3]), None], vec![false, false])
                .await
                .unwrap();
        };
        let receiver = async {
            let received = first
                .exchange_batches(vec![None, None], vec![false, true])
                .await
                .unwrap();
            assert_eq!(received[1].as_deref(), Some(&[7u8, 7, 7][..]));
        };
        futures::join!(sender, receiver);
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let mut transports = mock_multiparty_channels::<Vec<u8>>(2, 1024);
        let _silent = transports.pop().unwrap();
        let mut waiting = transports.pop().unwrap();
        waiting.set_receive_timeout(Some(Duration::from_millis(20)));

        let result = waiting.receive_from(1).await;
        assert_eq!(result, Err(TransportError::Timeout(1)));
    }
}
