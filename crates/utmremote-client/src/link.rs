//! The framed, multiplexed link.
//!
//! One link owns one byte stream and splits it into a reader task and a
//! writer task:
//!
//! - The writer drains a bounded queue. The queue is the write-permit gate:
//!   when the transport stalls, the queue fills and senders suspend, so the
//!   link never drops outbound traffic.
//! - The reader reassembles frames (`read_exact` on the length prefix, then
//!   the payload, so arbitrary packetization is handled), completes reply
//!   slots, and dispatches peer-initiated requests to the inbound handler.
//!
//! Per-link shared state is the token counter and the pending-slot map.
//! Tokens are issued by atomic increment and never reused on a link; the
//! map is mutated only under its mutex, so each reply drains exactly one
//! slot. A reply with no matching slot is dropped without side effects, and
//! an abandoned waiter leaves its slot registered so a late reply is
//! likewise discarded.
//!
//! Teardown is idempotent: the first `close` aborts both tasks and fails
//! every pending slot with `ConnectionClosed`; later calls are no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use utmremote_proto::{Frame, FrameFlags};

use crate::error::ClientError;

/// Depth of the outbound frame queue (the write-permit gate).
const WRITE_QUEUE_DEPTH: usize = 16;

/// Handles peer-initiated requests. A failure becomes an error-flagged
/// reply; the link stays open either way.
#[async_trait]
pub(crate) trait InboundHandler: Send + Sync {
    /// Produce the reply body for an inbound request.
    async fn handle(&self, id: u8, body: Bytes) -> Result<Bytes, DispatchError>;
}

/// Why an inbound request could not be served.
#[derive(Debug)]
pub(crate) enum DispatchError {
    /// Id outside the catalogue.
    Unsupported(u8),
    /// Decode failure or observer failure; the text goes back to the peer.
    Failed(String),
}

impl DispatchError {
    fn into_message(self) -> String {
        match self {
            Self::Unsupported(id) => ClientError::UnsupportedMessageId(id).to_string(),
            Self::Failed(message) => message,
        }
    }
}

type ReplySlot = oneshot::Sender<Result<Bytes, ClientError>>;

#[derive(Default)]
struct Pending {
    slots: HashMap<u64, ReplySlot>,
    closed: bool,
}

/// One live link over a byte stream.
pub(crate) struct Link {
    outbound: mpsc::Sender<Frame>,
    pending: Arc<Mutex<Pending>>,
    next_token: AtomicU64,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl Link {
    /// Split `stream` and start the reader and writer tasks. The stream
    /// must already be trusted: the first byte is read as protocol traffic.
    pub(crate) fn spawn<S>(stream: S, handler: Arc<dyn InboundHandler>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let pending = Arc::new(Mutex::new(Pending::default()));

        let reader = tokio::spawn(run_reader(
            read_half,
            Arc::clone(&pending),
            outbound.clone(),
            handler,
        ));
        let writer = tokio::spawn(run_writer(write_half, outbound_rx, Arc::clone(&pending)));

        Self {
            outbound,
            pending,
            next_token: AtomicU64::new(0),
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
        }
    }

    /// Send a request and wait for its reply body.
    pub(crate) async fn call(&self, id: u8, body: Bytes) -> Result<Bytes, ClientError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let (slot, waiter) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(ClientError::ConnectionClosed);
            }
            pending.slots.insert(token, slot);
        }
        tracing::trace!(id, token, "request");

        let frame = Frame::request(id, token, body);
        if self.outbound.send(frame).await.is_err() {
            lock(&self.pending).slots.remove(&token);
            return Err(ClientError::ConnectionClosed);
        }

        match waiter.await {
            Ok(result) => result,
            // The slot was dropped without a send: teardown raced us.
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    /// Tear the link down. Idempotent.
    pub(crate) fn close(&self) {
        if fail_all(&self.pending) {
            tracing::debug!("link closed");
        }
        self.reader.abort();
        self.writer.abort();
    }

    /// Whether the link has been torn down.
    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock(pending: &Mutex<Pending>) -> std::sync::MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mark the link closed and fail every pending slot. Returns whether this
/// call performed the transition.
fn fail_all(pending: &Mutex<Pending>) -> bool {
    let drained = {
        let mut pending = lock(pending);
        if pending.closed {
            return false;
        }
        pending.closed = true;
        std::mem::take(&mut pending.slots)
    };
    for (_, slot) in drained {
        let _ = slot.send(Err(ClientError::ConnectionClosed));
    }
    true
}

async fn run_writer<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Frame>,
    pending: Arc<Mutex<Pending>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let buf = frame.to_bytes();
        if let Err(error) = writer.write_all(&buf).await {
            tracing::debug!(%error, "link write failed");
            break;
        }
        if let Err(error) = writer.flush().await {
            tracing::debug!(%error, "link flush failed");
            break;
        }
    }
    fail_all(&pending);
    let _ = writer.shutdown().await;
}

async fn run_reader<R>(
    mut reader: R,
    pending: Arc<Mutex<Pending>>,
    outbound: mpsc::Sender<Frame>,
    handler: Arc<dyn InboundHandler>,
) where
    R: AsyncRead + Unpin,
{
    if let Err(error) = read_loop(&mut reader, &pending, &outbound, handler.as_ref()).await {
        tracing::debug!(%error, "link reader stopped");
    }
    fail_all(&pending);
}

async fn read_loop<R>(
    reader: &mut R,
    pending: &Mutex<Pending>,
    outbound: &mpsc::Sender<Frame>,
    handler: &dyn InboundHandler,
) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut prefix = [0u8; Frame::LENGTH_PREFIX];
        reader.read_exact(&mut prefix).await?;
        let len = u64::from_be_bytes(prefix);
        if len > Frame::MAX_PAYLOAD_LEN {
            return Err(ClientError::OversizedFrame { len, max: Frame::MAX_PAYLOAD_LEN });
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;

        let frame = Frame::parse_payload(&payload)?;
        tracing::trace!(id = frame.id, flags = ?frame.flags, token = frame.token, "frame");

        if frame.flags.contains(FrameFlags::RESPONSE) {
            let slot = lock(pending).slots.remove(&frame.token);
            match slot {
                Some(waiter) => {
                    let result = if frame.flags.contains(FrameFlags::ERROR) {
                        Err(ClientError::Peer(
                            String::from_utf8_lossy(&frame.body).into_owned(),
                        ))
                    } else {
                        Ok(frame.body)
                    };
                    // The caller may have abandoned its wait; that is not
                    // the link's problem.
                    let _ = waiter.send(result);
                }
                None => {
                    tracing::debug!(token = frame.token, "reply for unknown token dropped");
                }
            }
        } else {
            let reply = match handler.handle(frame.id, frame.body).await {
                Ok(body) => Frame::response(frame.id, frame.token, body),
                Err(error) => {
                    let message = error.into_message();
                    tracing::debug!(id = frame.id, %message, "inbound request failed");
                    Frame::error_response(frame.id, frame.token, &message)
                }
            };
            if outbound.send(reply).await.is_err() {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::DuplexStream;

    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle(&self, id: u8, body: Bytes) -> Result<Bytes, DispatchError> {
            match id {
                0xee => Err(DispatchError::Failed("echo refused".to_owned())),
                0xff => Err(DispatchError::Unsupported(id)),
                _ => Ok(body),
            }
        }
    }

    fn spawn_link() -> (Link, DuplexStream) {
        let (near, far) = tokio::io::duplex(1 << 16);
        (Link::spawn(near, Arc::new(EchoHandler)), far)
    }

    async fn read_frame(far: &mut DuplexStream) -> Frame {
        let mut prefix = [0u8; Frame::LENGTH_PREFIX];
        far.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; u64::from_be_bytes(prefix) as usize];
        far.read_exact(&mut payload).await.unwrap();
        Frame::parse_payload(&payload).unwrap()
    }

    async fn write_frame(far: &mut DuplexStream, frame: &Frame) {
        far.write_all(&frame.to_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn reply_completes_the_matching_waiter() {
        let (link, mut far) = spawn_link();
        let call = tokio::spawn(async move { link.call(7, Bytes::from_static(b"req")).await });

        let request = read_frame(&mut far).await;
        assert_eq!(request.id, 7);
        assert_eq!(request.token, 1);
        assert!(request.flags.is_empty());

        write_frame(&mut far, &Frame::response(7, request.token, Bytes::from_static(b"rep")))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), Bytes::from_static(b"rep"));
    }

    #[tokio::test]
    async fn replies_interleave_out_of_order() {
        let (link, mut far) = spawn_link();
        let link = Arc::new(link);

        let first = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.call(1, Bytes::from_static(b"a")).await })
        };
        let request_a = read_frame(&mut far).await;
        let second = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.call(2, Bytes::from_static(b"b")).await })
        };
        let request_b = read_frame(&mut far).await;
        assert_ne!(request_a.token, request_b.token);

        // Answer the second request first.
        write_frame(&mut far, &Frame::response(2, request_b.token, Bytes::from_static(b"B")))
            .await;
        write_frame(&mut far, &Frame::response(1, request_a.token, Bytes::from_static(b"A")))
            .await;

        assert_eq!(second.await.unwrap().unwrap(), Bytes::from_static(b"B"));
        assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(b"A"));
    }

    #[tokio::test]
    async fn error_reply_surfaces_peer_error() {
        let (link, mut far) = spawn_link();
        let call = tokio::spawn(async move { link.call(3, Bytes::new()).await });

        let request = read_frame(&mut far).await;
        write_frame(&mut far, &Frame::error_response(3, request.token, "machine is busy")).await;

        match call.await.unwrap() {
            Err(ClientError::Peer(message)) => assert_eq!(message, "machine is busy"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_token_reply_is_dropped() {
        let (link, mut far) = spawn_link();
        let link = Arc::new(link);

        // A reply nobody asked for.
        write_frame(&mut far, &Frame::response(9, 999, Bytes::from_static(b"stray"))).await;

        // The link is still healthy afterwards.
        let call = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.call(4, Bytes::new()).await })
        };
        let request = read_frame(&mut far).await;
        write_frame(&mut far, &Frame::response(4, request.token, Bytes::from_static(b"ok")))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn abandoned_waiter_leaves_late_reply_harmless() {
        let (link, mut far) = spawn_link();
        let link = Arc::new(link);

        let call = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.call(5, Bytes::new()).await })
        };
        let request = read_frame(&mut far).await;
        // Abandon the wait before the reply arrives.
        call.abort();
        let _ = call.await;

        write_frame(&mut far, &Frame::response(5, request.token, Bytes::from_static(b"late")))
            .await;

        // A subsequent call still works.
        let call = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.call(6, Bytes::new()).await })
        };
        let request = read_frame(&mut far).await;
        write_frame(&mut far, &Frame::response(6, request.token, Bytes::from_static(b"ok")))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn close_fails_pending_and_rejects_new_calls() {
        let (link, mut far) = spawn_link();
        let link = Arc::new(link);

        let call = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.call(1, Bytes::new()).await })
        };
        let _ = read_frame(&mut far).await;

        link.close();
        assert!(matches!(call.await.unwrap(), Err(ClientError::ConnectionClosed)));
        assert!(link.is_closed());

        // Close is idempotent and later calls fail fast.
        link.close();
        assert!(matches!(
            link.call(2, Bytes::new()).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn peer_disconnect_fails_pending() {
        let (link, mut far) = spawn_link();
        let call = tokio::spawn(async move { link.call(1, Bytes::new()).await });
        let _ = read_frame(&mut far).await;
        drop(far);
        assert!(matches!(call.await.unwrap(), Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn inbound_request_gets_reply_with_same_token() {
        let (link, mut far) = spawn_link();
        write_frame(&mut far, &Frame::request(2, 41, Bytes::from_static(b"ping"))).await;

        let reply = read_frame(&mut far).await;
        assert_eq!(reply.id, 2);
        assert_eq!(reply.token, 41);
        assert_eq!(reply.flags, FrameFlags::RESPONSE);
        assert_eq!(reply.body, Bytes::from_static(b"ping"));
        drop(link);
    }

    #[tokio::test]
    async fn failed_handler_sends_error_reply_and_link_stays_open() {
        let (link, mut far) = spawn_link();
        write_frame(&mut far, &Frame::request(0xee, 8, Bytes::new())).await;

        let reply = read_frame(&mut far).await;
        assert_eq!(reply.token, 8);
        assert!(reply.flags.contains(FrameFlags::RESPONSE | FrameFlags::ERROR));
        assert_eq!(reply.body, Bytes::from_static(b"echo refused"));

        // Unsupported id likewise answers with an error and keeps going.
        write_frame(&mut far, &Frame::request(0xff, 9, Bytes::new())).await;
        let reply = read_frame(&mut far).await;
        assert_eq!(reply.token, 9);
        assert!(reply.flags.contains(FrameFlags::ERROR));
        assert_eq!(reply.body, Bytes::from_static(b"unsupported message id 255"));
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn frames_reassemble_from_arbitrary_chunks() {
        for chunk_len in 1..=7usize {
            let (link, mut far) = spawn_link();
            let call = tokio::spawn(async move { link.call(1, Bytes::new()).await });
            let request = read_frame(&mut far).await;

            let wire =
                Frame::response(1, request.token, Bytes::from_static(b"chunked body")).to_bytes();
            for chunk in wire.chunks(chunk_len) {
                far.write_all(chunk).await.unwrap();
                far.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            assert_eq!(
                call.await.unwrap().unwrap(),
                Bytes::from_static(b"chunked body"),
                "chunk length {chunk_len}"
            );
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_fatal() {
        let (link, mut far) = spawn_link();
        let call = tokio::spawn(async move { link.call(1, Bytes::new()).await });
        let _ = read_frame(&mut far).await;

        let huge = (Frame::MAX_PAYLOAD_LEN + 1).to_be_bytes();
        far.write_all(&huge).await.unwrap();

        assert!(matches!(call.await.unwrap(), Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn shuffled_replies_complete_every_waiter_exactly_once() {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let (link, mut far) = spawn_link();
        let link = Arc::new(link);
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

        let mut calls = Vec::new();
        let mut requests = Vec::new();
        for n in 0..32u64 {
            let call = {
                let link = Arc::clone(&link);
                tokio::spawn(async move { link.call(1, Bytes::from(n.to_le_bytes().to_vec())).await })
            };
            requests.push(read_frame(&mut far).await);
            calls.push((n, call));
        }

        // Reply in a shuffled order; each reply echoes the request body.
        requests.shuffle(&mut rng);
        for request in requests {
            write_frame(&mut far, &Frame::response(request.id, request.token, request.body))
                .await;
        }

        // Every waiter completes exactly once with its own reply.
        for (n, call) in calls {
            let body = call.await.unwrap().unwrap();
            assert_eq!(body, Bytes::from(n.to_le_bytes().to_vec()));
        }
    }

    #[tokio::test]
    async fn tokens_are_monotonic_and_unique() {
        let (link, mut far) = spawn_link();
        let link = Arc::new(link);
        let mut seen = Vec::new();
        for id in 0..5u8 {
            let call = {
                let link = Arc::clone(&link);
                tokio::spawn(async move { link.call(id, Bytes::new()).await })
            };
            let request = read_frame(&mut far).await;
            seen.push(request.token);
            write_frame(&mut far, &Frame::response(id, request.token, Bytes::new())).await;
            call.await.unwrap().unwrap();
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
