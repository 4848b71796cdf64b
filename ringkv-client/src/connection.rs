//! Framed connection - one negotiated TCP session to one node.
//!
//! # Design
//!
//! Frames carry no request identifier, so a connection allows exactly one
//! request in flight. Callers enqueue requests on a channel; a single I/O
//! task writes each frame, reads until that frame's response is complete and
//! answers the caller before taking the next request. Responses are
//! therefore delivered in submission order.
//!
//! # Connection Lifecycle
//!
//! 1. Open the TCP stream (bounded by the connect timeout)
//! 2. Write `pb0` and wait for `ok`
//! 3. Serve requests until a transport failure, a timeout or `close()`
//! 4. Fail every request still queued: with `Timeout` if the connection died
//!    of a timed-out request, otherwise with `ConnectionClosed`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ringkv_core::{Error, Node, NodeId, Result};
use ringkv_wire::{
    decode_response, encode_request, read_frame, Request, Response, PROTOCOL_ACK, PROTOCOL_ID,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use crate::config::{millis, ConnectionConfig};

/// Initial read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum requests waiting behind the one in flight.
const MAX_PENDING_REQUESTS: usize = 1024;

/// A queued request and where to deliver its outcome.
struct Pending {
    request: Request,
    reply: oneshot::Sender<Result<Response>>,
}

/// State shared between the handle and the I/O task.
struct Shared {
    alive: AtomicBool,
    /// Set when a request timed out and took the connection down.
    timed_out: AtomicBool,
    timeout_ms: AtomicU64,
    shutdown: Notify,
}

impl Shared {
    /// Error for requests that can no longer be served.
    fn dead_error(&self) -> Error {
        if self.timed_out.load(Ordering::Acquire) {
            Error::Timeout {
                operation: "request",
                waited_ms: self.timeout_ms.load(Ordering::Relaxed),
            }
        } else {
            Error::ConnectionClosed
        }
    }
}

/// A live, negotiated connection to one node.
pub struct Connection {
    node_id: NodeId,
    addr: String,
    sender: mpsc::Sender<Pending>,
    shared: Arc<Shared>,
    request_count: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("node_id", &self.node_id)
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .field("request_count", &self.request_count())
            .finish()
    }
}

impl Connection {
    /// Connects to `node` and negotiates the protocol.
    ///
    /// # Errors
    /// Returns `Transport` if the stream cannot be opened, `Protocol` if the
    /// node answers the negotiation with anything but `ok`, and `Timeout` if
    /// either step exceeds the connect timeout.
    pub async fn connect(node: &Node, config: &ConnectionConfig) -> Result<Self> {
        let addr = node.addr();
        debug!(node_id = node.id.get(), addr = %addr, "Connecting");

        let mut stream = open_stream(&addr, config.connect_timeout).await?;
        negotiate(&mut stream, config.connect_timeout).await?;
        stream.set_nodelay(true)?;

        let shared = Arc::new(Shared {
            alive: AtomicBool::new(true),
            timed_out: AtomicBool::new(false),
            timeout_ms: AtomicU64::new(millis(config.request_timeout)),
            shutdown: Notify::new(),
        });
        let (sender, receiver) = mpsc::channel(MAX_PENDING_REQUESTS);

        tokio::spawn(io_loop(
            stream,
            receiver,
            Arc::clone(&shared),
            addr.clone(),
            config.max_frame_bytes,
        ));

        info!(node_id = node.id.get(), addr = %addr, "Connected");
        Ok(Self {
            node_id: node.id,
            addr,
            sender,
            shared,
            request_count: AtomicU64::new(0),
        })
    }

    /// Sends a request and waits for its response.
    ///
    /// Concurrent callers are served one at a time, in the order their
    /// requests were enqueued.
    ///
    /// # Errors
    /// Returns `Timeout` if the response does not arrive in time, or if an
    /// earlier request timed out and took the connection down before this
    /// one was written. Returns `Server` if the node reported an error and
    /// `ConnectionClosed` if the connection was closed or failed otherwise.
    pub async fn send(&self, request: Request) -> Result<Response> {
        if !self.is_alive() {
            return Err(self.shared.dead_error());
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let (reply, response) = oneshot::channel();
        self.sender
            .send(Pending { request, reply })
            .await
            .map_err(|_| self.shared.dead_error())?;
        response.await.map_err(|_| self.shared.dead_error())?
    }

    /// Returns false once the connection failed or was closed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Returns the number of requests sent on this connection.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Changes the request timeout for subsequent requests.
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.timeout_ms.store(millis(timeout), Ordering::Relaxed);
    }

    /// Returns the current request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.shared.timeout_ms.load(Ordering::Relaxed))
    }

    /// Returns the id of the connected node.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the connected address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Ends the connection. Requests still queued fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        if self.shared.alive.swap(false, Ordering::AcqRel) {
            debug!(node_id = self.node_id.get(), addr = %self.addr, "Closing connection");
        }
        self.shared.shutdown.notify_one();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn open_stream(addr: &str, wait: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(wait, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(Error::Transport {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(Error::Timeout {
            operation: "connect",
            waited_ms: millis(wait),
        }),
    }
}

async fn negotiate(stream: &mut TcpStream, wait: Duration) -> Result<()> {
    let exchange = async {
        stream.write_all(PROTOCOL_ID).await?;
        let mut reply = [0u8; PROTOCOL_ACK.len()];
        stream.read_exact(&mut reply).await?;
        Ok::<_, std::io::Error>(reply)
    };

    match tokio::time::timeout(wait, exchange).await {
        Err(_) => Err(Error::Timeout {
            operation: "protocol negotiation",
            waited_ms: millis(wait),
        }),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::protocol(
            "connection closed during protocol negotiation",
        )),
        Ok(Err(e)) => Err(Error::Io(e)),
        Ok(Ok(reply)) if reply[..] == *PROTOCOL_ACK => Ok(()),
        Ok(Ok(reply)) => Err(Error::protocol(format!(
            "server does not understand protocol {}, replied {:?}",
            String::from_utf8_lossy(PROTOCOL_ID),
            String::from_utf8_lossy(&reply)
        ))),
    }
}

/// Serves queued requests one at a time until the connection dies.
async fn io_loop(
    mut stream: TcpStream,
    mut receiver: mpsc::Receiver<Pending>,
    shared: Arc<Shared>,
    addr: String,
    max_frame_bytes: usize,
) {
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        let next = tokio::select! {
            biased;
            () = shared.shutdown.notified() => None,
            next = receiver.recv() => next,
        };
        let Some(pending) = next else {
            break;
        };

        let kind = pending.request.request_type();
        let frame = match encode_request(&pending.request) {
            Ok(frame) => frame,
            Err(e) => {
                // Nothing was written; the stream is still in sync.
                let _ = pending.reply.send(Err(e));
                continue;
            }
        };

        let wait = Duration::from_millis(shared.timeout_ms.load(Ordering::Relaxed));
        let outcome = tokio::select! {
            biased;
            () = shared.shutdown.notified() => None,
            outcome = tokio::time::timeout(
                wait,
                exchange(&mut stream, &mut buffer, &frame, max_frame_bytes),
            ) => Some(outcome),
        };

        match outcome {
            None => {
                let _ = pending.reply.send(Err(Error::ConnectionClosed));
                break;
            }
            Some(Ok(Ok(payload))) => {
                // The caller may have given up; nothing to do then.
                let _ = pending.reply.send(decode_response(kind, &payload));
            }
            Some(Ok(Err(e))) => {
                warn!(addr = %addr, error = %e, "Connection failed");
                let _ = pending.reply.send(Err(e));
                break;
            }
            Some(Err(_)) => {
                warn!(addr = %addr, waited_ms = millis(wait), "Request timed out");
                shared.timed_out.store(true, Ordering::Release);
                let _ = pending.reply.send(Err(Error::Timeout {
                    operation: "request",
                    waited_ms: millis(wait),
                }));
                break;
            }
        }
    }

    shared.alive.store(false, Ordering::Release);
    receiver.close();
    let mut failed = 0usize;
    while let Some(pending) = receiver.recv().await {
        let _ = pending.reply.send(Err(shared.dead_error()));
        failed += 1;
    }
    let _ = stream.shutdown().await;
    debug!(addr = %addr, failed_requests = failed, "Connection loop ended");
}

/// Writes one frame and reads exactly one response frame.
async fn exchange(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    frame: &[u8],
    max_frame_bytes: usize,
) -> Result<Bytes> {
    stream.write_all(frame).await?;
    loop {
        if let Some(payload) = read_frame(buffer, max_frame_bytes)? {
            return Ok(payload);
        }
        if stream.read_buf(buffer).await? == 0 {
            return Err(Error::ConnectionClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringkv_core::{PartitionId, ERROR_CODE_OBSOLETE_VERSION};
    use ringkv_wire::{decode_request, encode_error_response, encode_response, Operation};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    /// How the test server treats requests.
    #[derive(Clone, Copy)]
    enum Behavior {
        /// Answers GETs with the key as the value.
        Echo,
        /// Never answers requests.
        Silent,
        /// Answers every request with an obsolete-version error.
        Reject,
    }

    fn node(port: u16) -> Node {
        Node::new(NodeId::new(0), "127.0.0.1", port, [PartitionId::new(0)])
    }

    /// Reads one request frame from a raw stream.
    async fn read_request(stream: &mut TcpStream) -> Option<Request> {
        let mut length = [0u8; 4];
        stream.read_exact(&mut length).await.ok()?;
        let mut payload = vec![0u8; u32::from_be_bytes(length) as usize];
        stream.read_exact(&mut payload).await.ok()?;
        decode_request(&payload).ok()
    }

    /// Spawns a single-connection server; returns its port and the keys it
    /// received, in arrival order.
    async fn spawn_server(behavior: Behavior) -> (u16, Arc<Mutex<Vec<Bytes>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut hello = [0u8; 3];
            stream.read_exact(&mut hello).await.unwrap();
            stream.write_all(PROTOCOL_ACK).await.unwrap();

            while let Some(request) = read_request(&mut stream).await {
                let Operation::Get { ref key } = request.operation else {
                    continue;
                };
                log.lock().await.push(key.clone());
                let frame = match behavior {
                    Behavior::Silent => continue,
                    Behavior::Echo => encode_response(&Response::Get(vec![
                        ringkv_core::Versioned::new(key.clone(), ringkv_core::VectorClock::new()),
                    ]))
                    .unwrap(),
                    Behavior::Reject => encode_error_response(
                        request.request_type(),
                        ERROR_CODE_OBSOLETE_VERSION,
                        "obsolete",
                    )
                    .unwrap(),
                };
                stream.write_all(&frame).await.unwrap();
            }
        });

        (port, received)
    }

    /// Spawns a server that answers the negotiation with `reply` (or not at
    /// all when `reply` is empty).
    async fn spawn_negotiator(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut hello = [0u8; 3];
            stream.read_exact(&mut hello).await.unwrap();
            if !reply.is_empty() {
                stream.write_all(reply).await.unwrap();
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        port
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }), "got {err:?}");
        assert!(err.is_connect_failure());
    }

    #[tokio::test]
    async fn test_wrong_negotiation_reply_is_protocol_error() {
        let port = spawn_negotiator(b"no").await;
        let err = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_silent_negotiation_is_timeout() {
        let port = spawn_negotiator(b"").await;
        let err = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_concurrent_sends_answered_in_order() {
        let (port, received) = spawn_server(Behavior::Echo).await;
        let connection = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap();

        let keys: Vec<Bytes> = (0..32).map(|i| Bytes::from(format!("key-{i}"))).collect();
        let sends = keys
            .iter()
            .map(|key| connection.send(Request::get("test", key.clone())));
        let responses = futures::future::join_all(sends).await;

        for (key, response) in keys.iter().zip(responses) {
            match response.unwrap() {
                Response::Get(versions) => assert_eq!(&versions[0].value, key),
                other => panic!("unexpected response {other:?}"),
            }
        }
        assert_eq!(*received.lock().await, keys);
        assert_eq!(connection.request_count(), 32);
        assert!(connection.is_alive());
    }

    #[tokio::test]
    async fn test_timeout_fails_queued_requests_with_timeout() {
        let (port, _) = spawn_server(Behavior::Silent).await;
        let config = ConnectionConfig::fast_for_testing()
            .with_request_timeout(Duration::from_millis(100));
        let connection = Connection::connect(&node(port), &config).await.unwrap();

        let (first, second) = tokio::join!(
            connection.send(Request::get("test", Bytes::from_static(b"a"))),
            connection.send(Request::get("test", Bytes::from_static(b"b"))),
        );

        assert!(matches!(first, Err(Error::Timeout { .. })), "got {first:?}");
        // Queued behind the timed-out request, never written.
        assert!(matches!(second, Err(Error::Timeout { .. })), "got {second:?}");
        assert!(second.unwrap_err().is_retryable());
        assert!(!connection.is_alive());

        let after = connection
            .send(Request::get("test", Bytes::from_static(b"c")))
            .await;
        assert!(matches!(after, Err(Error::Timeout { .. })), "got {after:?}");
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection_alive() {
        let (port, _) = spawn_server(Behavior::Reject).await;
        let connection = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap();

        for _ in 0..2 {
            let err = connection
                .send(Request::get("test", Bytes::from_static(b"a")))
                .await
                .unwrap_err();
            assert!(err.is_obsolete_version());
        }
        assert!(connection.is_alive());
    }

    #[tokio::test]
    async fn test_close_rejects_further_requests() {
        let (port, _) = spawn_server(Behavior::Echo).await;
        let connection = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap();

        connection.close();
        assert!(!connection.is_alive());
        let result = connection
            .send(Request::get("test", Bytes::from_static(b"a")))
            .await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_set_timeout() {
        let (port, _) = spawn_server(Behavior::Echo).await;
        let connection = Connection::connect(&node(port), &ConnectionConfig::fast_for_testing())
            .await
            .unwrap();
        connection.set_timeout(Duration::from_millis(750));
        assert_eq!(connection.timeout(), Duration::from_millis(750));
    }
}
