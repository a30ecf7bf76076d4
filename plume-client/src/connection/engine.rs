//! The connection engine
//!
//! One background task per connection: dial, then an inbound loop (sole
//! reader, handshake state machine) and an outbound loop (sole writer,
//! FIFO job drain) over the two halves of the socket, both bound to one
//! cancellation token. Errors in a loop end that loop and surface through
//! [`Connection::completion`]; nothing is retried.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use plume_protocol::{CodecError, ConnectInfo, LineCodec, ServerInfo, CONNECT_VERB, CRLF, INFO_PREFIX};
use plume_utils::{PlumeError, Result};

use super::state::ConnectionState;
use crate::queue::{self, Job, JobQueue};

/// Client configuration
#[derive(Debug, Clone)]
pub struct Options {
    /// `host:port` of the server to dial
    pub server_addr: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            server_addr: "localhost:4222".into(),
        }
    }
}

impl Options {
    /// Loopback server on the given port
    pub fn port(port: u16) -> Self {
        Self {
            server_addr: format!("localhost:{}", port),
        }
    }
}

/// One-shot signal resolved once a publish callback has been applied to
/// the outbound buffer ("applied to buffer" is the contract; bytes
/// reaching the wire is not). Resolves with `StreamClosed` if the
/// connection shut down before the job was drained, so callers are never
/// left waiting forever.
#[derive(Debug)]
pub struct PublishReceipt {
    rx: oneshot::Receiver<()>,
}

impl Future for PublishReceipt {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.map_err(|_| {
                PlumeError::stream_closed("connection closed before publish was applied")
            })
        })
    }
}

/// Client connection to a pub/sub server.
///
/// [`Connection::open`] starts connection establishment immediately and
/// returns without blocking; handshake progress is observed through
/// [`Connection::connected`] and the engine's exit through
/// [`Connection::completion`].
pub struct Connection {
    /// Producer handle into the publish queue
    jobs: mpsc::UnboundedSender<Job>,
    /// Shared cancellation signal for both loops
    cancel: CancellationToken,
    /// Live view of the lifecycle state
    state: watch::Receiver<ConnectionState>,
    /// Handshake outcome, consumed by the first `connected()` call
    handshake: Option<oneshot::Receiver<Result<()>>>,
    handshake_ok: bool,
    /// Engine task, consumed by the first `completion()` call
    task: Option<JoinHandle<Result<()>>>,
}

impl Connection {
    /// Begins asynchronous connection establishment immediately. Must be
    /// called within a tokio runtime.
    pub fn open(options: Options) -> Connection {
        let cancel = CancellationToken::new();
        let (jobs_tx, job_queue) = queue::channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::NotConnected);

        let engine = Engine {
            options,
            jobs: jobs_tx.clone(),
            handshake: Some(handshake_tx),
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(engine.run(job_queue));

        Connection {
            jobs: jobs_tx,
            cancel,
            state: state_rx,
            handshake: Some(handshake_rx),
            handshake_ok: false,
            task: Some(task),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves `Ok` the moment the handshake reaches `Connected`, or with
    /// `ConnectionFailed` if the dial fails or the connection is torn down
    /// before handshake completion. The outcome is delivered exactly once;
    /// later calls return the remembered outcome class.
    pub async fn connected(&mut self) -> Result<()> {
        match self.handshake.take() {
            Some(rx) => {
                let outcome = match rx.await {
                    Ok(outcome) => outcome,
                    // Engine exited before reporting; dial failures report
                    // explicitly, so this is teardown during the handshake.
                    Err(_) => Err(PlumeError::connection_failed(
                        "connection closed before handshake completed",
                    )),
                };
                self.handshake_ok = outcome.is_ok();
                outcome
            }
            None if self.handshake_ok => Ok(()),
            None => Err(PlumeError::stream_closed(
                "handshake failure already observed",
            )),
        }
    }

    /// Enqueues a publish job. The callback must write fully framed bytes
    /// (terminator included) into the outbound buffer; the engine does not
    /// frame on its behalf. Jobs drain in enqueue order across all callers.
    pub fn publish<F>(&self, write: F) -> PublishReceipt
    where
        F: FnOnce(&mut BytesMut) + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        let job = Job {
            write: Box::new(write),
            done,
        };
        // After shutdown there is no consumer left; the dropped job
        // resolves the receipt with StreamClosed instead of hanging.
        if self.jobs.send(job).is_err() {
            tracing::debug!("publish after shutdown, job dropped");
        }
        PublishReceipt { rx }
    }

    /// Publishes pre-framed bytes verbatim. Rejects an empty payload with
    /// `InvalidArgument` before anything is enqueued.
    pub fn publish_bytes(&self, bytes: impl Into<Bytes>) -> Result<PublishReceipt> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(PlumeError::invalid_argument("publish payload is empty"));
        }
        Ok(self.publish(move |buf| buf.extend_from_slice(&bytes)))
    }

    /// Resolves when the engine task exits, for any reason: `Ok` on clean
    /// (cancelled) shutdown, the triggering error otherwise. The outcome is
    /// observed at most once; later calls return `Ok`.
    pub async fn completion(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(PlumeError::internal(format!("engine task failed: {}", e))),
            },
            None => Ok(()),
        }
    }

    /// Requests cooperative shutdown. In-flight reads and writes are not
    /// aborted; both loops observe the signal at their next suspension
    /// point. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// `close()` followed by `completion()`
    pub async fn shutdown(&mut self) -> Result<()> {
        self.close();
        self.completion().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // a dropped handle must not leak a running engine task
        self.cancel.cancel();
    }
}

/// State owned by the engine task
struct Engine {
    options: Options,
    jobs: mpsc::UnboundedSender<Job>,
    handshake: Option<oneshot::Sender<Result<()>>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Engine {
    async fn run(mut self, jobs: JobQueue) -> Result<()> {
        let _ = self.state.send(ConnectionState::Connecting);
        tracing::debug!(addr = %self.options.server_addr, "dialing server");

        let stream = match TcpStream::connect(&self.options.server_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                let msg = format!("dial {}: {}", self.options.server_addr, e);
                tracing::error!("{}", msg);
                if let Some(tx) = self.handshake.take() {
                    let _ = tx.send(Err(PlumeError::ConnectionFailed(msg.clone())));
                }
                let _ = self.state.send(ConnectionState::Disposed);
                return Err(PlumeError::ConnectionFailed(msg));
            }
        };

        // Sole reader / sole writer: the two socket halves never share a
        // buffer, the job queue is the only producer/consumer meeting point.
        let (read_half, write_half) = stream.into_split();
        let writer = tokio::spawn(outbound_loop(write_half, jobs, self.cancel.clone()));

        let inbound = self.inbound_loop(read_half).await;

        // However the reader went, wind the writer down too before
        // reporting, so completion covers the whole engine.
        self.cancel.cancel();
        let outbound = match writer.await {
            Ok(result) => result,
            Err(e) => Err(PlumeError::internal(format!("outbound task failed: {}", e))),
        };

        let _ = self.state.send(ConnectionState::Disposed);
        let result = inbound.and(outbound);
        match &result {
            Ok(()) => tracing::debug!("connection engine exited cleanly"),
            Err(e) => tracing::error!("connection engine exited: {}", e),
        }
        result
    }

    /// Sole reader of the socket. Frames inbound bytes into lines and
    /// routes each through the handshake state machine until the peer
    /// closes, a read fails, or cancellation fires.
    async fn inbound_loop(&mut self, read_half: OwnedReadHalf) -> Result<()> {
        let mut lines = FramedRead::new(read_half, LineCodec::new());
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("inbound loop cancelled");
                    return Ok(());
                }
                frame = lines.next() => frame,
            };

            match frame {
                Some(Ok(line)) => self.on_line(&line)?,
                Some(Err(CodecError::Io(e))) => {
                    return Err(PlumeError::stream_closed(format!("read failed: {}", e)));
                }
                Some(Err(e)) => return Err(PlumeError::protocol(e.to_string())),
                None => {
                    tracing::info!("server closed the connection");
                    return Err(PlumeError::stream_closed("stream ended"));
                }
            }
        }
    }

    /// Routes one protocol line through the state machine: current state
    /// picks the handler, the handler returns the next state.
    fn on_line(&mut self, line: &str) -> Result<()> {
        let state = *self.state.borrow();
        let next = match state {
            ConnectionState::Connecting => self.handle_connecting(line)?,
            ConnectionState::Connected => self.handle_connected(line),
            // not observable while the loop runs
            other => other,
        };
        if next != state {
            let _ = self.state.send(next);
        }
        Ok(())
    }

    /// `Connecting`: a narrow scanner waiting for the INFO line. Any other
    /// line is ignored without a state change.
    fn handle_connecting(&mut self, line: &str) -> Result<ConnectionState> {
        let Some(json) = line.strip_prefix(INFO_PREFIX) else {
            tracing::trace!(line, "ignoring line before INFO");
            return Ok(ConnectionState::Connecting);
        };

        let info = ServerInfo::from_json(json)
            .map_err(|e| PlumeError::protocol(format!("malformed INFO payload: {}", e)))?;
        tracing::info!(
            server_id = info.server_id.as_deref().unwrap_or(""),
            version = info.version.as_deref().unwrap_or(""),
            max_payload = info.max_payload,
            "received server INFO"
        );

        // Answer with a sparse CONNECT through the same queue as caller
        // publishes: strict arrival order, no priority lane.
        let payload = ConnectInfo::default()
            .to_json()
            .map_err(|e| PlumeError::protocol(format!("CONNECT encoding failed: {}", e)))?;
        let reply = format!("{} {}{}", CONNECT_VERB, payload, CRLF);
        let (done, _ack) = oneshot::channel();
        let job = Job {
            write: Box::new(move |buf: &mut BytesMut| buf.extend_from_slice(reply.as_bytes())),
            done,
        };
        if self.jobs.send(job).is_err() {
            return Err(PlumeError::stream_closed("outbound loop gone during handshake"));
        }

        if let Some(tx) = self.handshake.take() {
            let _ = tx.send(Ok(()));
        }
        Ok(ConnectionState::Connected)
    }

    /// `Connected`: lines are drained but not interpreted. This client
    /// speaks only the handshake subset; draining keeps the read buffer
    /// bounded and lets peer close be observed.
    fn handle_connected(&self, line: &str) -> ConnectionState {
        tracing::trace!(line, "unhandled protocol line");
        ConnectionState::Connected
    }
}

/// Sole writer to the socket. Drains queued jobs into the outbound buffer
/// in enqueue order, resolves each completion, then flushes; suspends only
/// while waiting for work.
async fn outbound_loop(
    write_half: OwnedWriteHalf,
    mut jobs: JobQueue,
    cancel: CancellationToken,
) -> Result<()> {
    let mut writer = FramedWrite::new(write_half, LineCodec::new());
    let mut buf = BytesMut::with_capacity(4 * 1024);
    let mut pending = Vec::new();

    loop {
        jobs.drain_available(&mut pending);
        for job in pending.drain(..) {
            job.apply(&mut buf);
        }

        if !buf.is_empty() {
            let chunk = buf.split().freeze();
            if let Err(e) = writer.send(chunk).await {
                return Err(PlumeError::stream_closed(format!("write failed: {}", e)));
            }
        }

        match jobs.wait_for_work(&cancel).await {
            // applied before the next drain pass, so FIFO order holds
            Some(job) => job.apply(&mut buf),
            None => {
                tracing::debug!("outbound loop stopping");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const INFO_LINE: &[u8] =
        b"INFO {\"server_id\":\"mock\",\"host\":\"127.0.0.1\",\"port\":4222,\
          \"max_payload\":1048576,\"proto\":1}\r\n";

    async fn bind_mock() -> (TcpListener, Options) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let options = Options {
            server_addr: format!("127.0.0.1:{}", port),
        };
        (listener, options)
    }

    async fn read_line(stream: &mut tokio::net::TcpStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            line.push(byte[0]);
            if line.ends_with(b"\r\n") {
                line.truncate(line.len() - 2);
                return String::from_utf8(line).unwrap();
            }
        }
    }

    #[test]
    fn test_options_addresses() {
        assert_eq!(Options::default().server_addr, "localhost:4222");
        assert_eq!(Options::port(14222).server_addr, "localhost:14222");
    }

    #[tokio::test]
    async fn test_handshake_against_mock_server() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            stream.flush().await.unwrap();
            let connect = read_line(&mut stream).await;
            (stream, connect)
        });

        let mut conn = Connection::open(options);
        timeout(Duration::from_secs(5), conn.connected())
            .await
            .expect("handshake within bounded time")
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        // observed-once contract: a second call still reports success
        conn.connected().await.unwrap();

        let (_stream, connect) = server.await.unwrap();
        let payload = connect.strip_prefix("CONNECT ").expect("CONNECT verb");
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value, serde_json::json!({}));

        conn.shutdown().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disposed);
    }

    #[tokio::test]
    async fn test_lines_before_info_are_ignored() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"-ERR 'noise'\r\n\r\n").await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            let connect = read_line(&mut stream).await;
            (stream, connect)
        });

        let mut conn = Connection::open(options);
        timeout(Duration::from_secs(5), conn.connected())
            .await
            .unwrap()
            .unwrap();

        let (_stream, connect) = server.await.unwrap();
        assert!(connect.starts_with("CONNECT "));
        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_order_is_enqueue_order() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // both pre-handshake publishes must land before INFO goes out,
            // so the CONNECT job is provably enqueued after them
            let first = read_line(&mut stream).await;
            let second = read_line(&mut stream).await;
            stream.write_all(INFO_LINE).await.unwrap();
            let third = read_line(&mut stream).await;
            (stream, vec![first, second, third])
        });

        let mut conn = Connection::open(options);
        let first = conn.publish_bytes("one\r\n").unwrap();
        let second = conn.publish_bytes("two\r\n").unwrap();
        first.await.unwrap();
        second.await.unwrap();

        conn.connected().await.unwrap();

        let (_stream, lines) = server.await.unwrap();
        assert_eq!(lines[0], "one");
        assert_eq!(lines[1], "two");
        assert!(lines[2].starts_with("CONNECT "));

        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_connect_resolves_and_reaches_server() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            let _connect = read_line(&mut stream).await;
            let ping = read_line(&mut stream).await;
            let again = read_line(&mut stream).await;
            (stream, ping, again)
        });

        let mut conn = Connection::open(options);
        conn.connected().await.unwrap();

        conn.publish_bytes("PING\r\n").unwrap().await.unwrap();
        // the callback form writes the same way
        conn.publish(|buf| buf.extend_from_slice(b"PING\r\n"))
            .await
            .unwrap();

        let (_stream, ping, again) = server.await.unwrap();
        assert_eq!(ping, "PING");
        assert_eq!(again, "PING");

        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_publish_is_rejected_without_enqueue() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            let _connect = read_line(&mut stream).await;
            let next = read_line(&mut stream).await;
            (stream, next)
        });

        let mut conn = Connection::open(options);
        conn.connected().await.unwrap();

        let err = conn.publish_bytes(Bytes::new()).unwrap_err();
        assert!(matches!(err, PlumeError::InvalidArgument(_)));

        // nothing was enqueued: the next accepted publish is the next line
        conn.publish_bytes("PING\r\n").unwrap().await.unwrap();
        let (_stream, next) = server.await.unwrap();
        assert_eq!(next, "PING");

        conn.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused_fails_connected_and_completion() {
        // bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conn = Connection::open(Options {
            server_addr: format!("127.0.0.1:{}", port),
        });

        let err = timeout(Duration::from_secs(5), conn.connected())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PlumeError::ConnectionFailed(_)));

        let err = conn.completion().await.unwrap_err();
        assert!(matches!(err, PlumeError::ConnectionFailed(_)));

        // disposing after the failure is quiet
        conn.shutdown().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disposed);
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_stream_closed() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            let _connect = read_line(&mut stream).await;
            // hang up
        });

        let mut conn = Connection::open(options);
        conn.connected().await.unwrap();
        server.await.unwrap();

        let err = timeout(Duration::from_secs(5), conn.completion())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PlumeError::StreamClosed(_)));
        assert_eq!(conn.state(), ConnectionState::Disposed);
    }

    #[tokio::test]
    async fn test_close_twice_and_shutdown_twice() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            let _connect = read_line(&mut stream).await;
            stream
        });

        let mut conn = Connection::open(options);
        conn.connected().await.unwrap();
        let _stream = server.await.unwrap();

        conn.close();
        conn.close();
        conn.completion().await.unwrap();
        // completion already observed; a second shutdown is a no-op
        conn.shutdown().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disposed);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails_its_receipt() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(INFO_LINE).await.unwrap();
            let _connect = read_line(&mut stream).await;
            stream
        });

        let mut conn = Connection::open(options);
        conn.connected().await.unwrap();
        let _stream = server.await.unwrap();
        conn.shutdown().await.unwrap();

        let receipt = conn.publish_bytes("PING\r\n").unwrap();
        let err = receipt.await.unwrap_err();
        assert!(matches!(err, PlumeError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn test_malformed_info_is_a_protocol_error() {
        let (listener, options) = bind_mock().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"INFO not-json\r\n").await.unwrap();
            stream
        });

        let mut conn = Connection::open(options);
        let _stream = server.await.unwrap();

        let err = timeout(Duration::from_secs(5), conn.completion())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PlumeError::Protocol(_)));

        // the handshake never completed
        let err = conn.connected().await.unwrap_err();
        assert!(matches!(err, PlumeError::ConnectionFailed(_)));
    }
}
