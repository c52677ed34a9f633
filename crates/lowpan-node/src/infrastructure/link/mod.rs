//! LinkRelay: the single-connection TCP value link.
//!
//! # What does the relay do? (for beginners)
//!
//! Once the device is attached to the mesh, it talks to exactly one peer over
//! one TCP connection.  Every byte on that connection is one value (see
//! `lowpan_core::protocol::value`).  The relay can get that connection two
//! ways:
//!
//! - **listen** – accept connections on a port.  Each accepted connection
//!   *replaces* the current one; the previous peer is disconnected.
//! - **connect** – dial a host and port.  Connecting while connected also
//!   replaces the current connection.
//!
//! Values read from the live connection are published as
//! [`LinkEvent::ValueReceived`]; values passed to [`LinkRelay::send`] are
//! written to it.
//!
//! # Task layout
//!
//! ```text
//!  accept loop (one, while listening)
//!       │ accepted stream
//!       ▼
//!  install() ── swap lock held ──► close old: cancel + await its reader
//!       │                            then spawn the new reader
//!       ▼
//!  read loop (at most one alive) ── byte ──► LinkEvent::ValueReceived
//! ```
//!
//! The live connection sits in one `tokio::sync::Mutex<Option<..>>` slot.  A
//! reader that ends on its own (EOF, error) clears the slot only if the slot
//! still holds *its* connection, so a reader that lost a race with a
//! replacement never tears down its successor.
//!
//! The slot lock is never held across socket I/O.  [`LinkRelay::send`] clones
//! the connection's writer out of the slot and races the write against the
//! connection's halt signal, so closing a connection whose peer stopped
//! reading abandons the pending write instead of waiting for it.
//!
//! # Transport
//!
//! The relay only works while the mesh transport is up.  The node calls
//! [`LinkRelay::transport_available`] on attach and
//! [`LinkRelay::transport_lost`] on detach; without transport, `listen` and
//! `connect` fail with [`LinkError::NoTransport`].  Nothing reconnects by
//! itself.

use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lowpan_core::{LinkState, ValueSample};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors returned by relay operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The mesh transport is down.
    #[error("link transport is not available")]
    NoTransport,

    /// The relay is already listening.
    #[error("already listening on {0}")]
    AlreadyListening(SocketAddr),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The host name did not resolve to any address.
    #[error("cannot resolve host {host}: {reason}")]
    HostUnreachable { host: String, reason: String },

    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Writing to the live connection failed; the connection was closed.
    #[error("write to {peer} failed: {source}")]
    WriteFailed {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Relay settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Address the listener binds to.
    pub bind_address: IpAddr,
    /// Upper bound on one outbound connect attempt.
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Notifications published by the relay, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    ValueReceived(ValueSample),
    /// A new live connection was installed.
    PeerConnected(SocketAddr),
    /// Something failed; the text is meant for the user.
    Error(String),
}

struct LiveConnection {
    id: u64,
    peer: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Flips to `true` when the connection is closed; pending sends give up.
    halt: watch::Sender<bool>,
    cancel: oneshot::Sender<()>,
    reader: JoinHandle<()>,
}

impl LiveConnection {
    /// Stops the reader and any pending send, waits for the reader, and
    /// closes the socket.
    async fn close(self) {
        self.halt.send_replace(true);
        let _ = self.cancel.send(());
        if let Err(e) = self.reader.await {
            warn!("link reader for {} ended abnormally: {e}", self.peer);
        }
        // Dropping the last write half handle (the read half went with the
        // reader) closes the socket.
        drop(self.writer);
        debug!("closed link connection {} to {}", self.id, self.peer);
    }
}

struct ListenerTask {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    config: LinkConfig,
    events: mpsc::UnboundedSender<LinkEvent>,
    state: watch::Sender<LinkState>,
    live: Mutex<Option<LiveConnection>>,
    /// Serialises connection replacement so at most one reader is ever alive.
    swap: Mutex<()>,
    listener: Mutex<Option<ListenerTask>>,
    next_id: AtomicU64,
    active_readers: AtomicUsize,
}

impl Inner {
    fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("link {previous} -> {state}");
            self.emit(LinkEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    fn report(&self, message: String) {
        warn!("{message}");
        self.emit(LinkEvent::Error(message));
    }
}

/// Single-active-connection value relay.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LinkRelay {
    inner: Arc<Inner>,
}

impl LinkRelay {
    /// Creates a relay in state `NoTransport`.
    ///
    /// Returns the relay and the receiver for its [`LinkEvent`]s.
    pub fn new(config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::NoTransport);
        let relay = Self {
            inner: Arc::new(Inner {
                config,
                events,
                state,
                live: Mutex::new(None),
                swap: Mutex::new(()),
                listener: Mutex::new(None),
                next_id: AtomicU64::new(1),
                active_readers: AtomicUsize::new(0),
            }),
        };
        (relay, event_rx)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    /// A receiver that always holds the current link state.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Address the accept loop is bound to, if listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listener.lock().await.as_ref().map(|l| l.local_addr)
    }

    /// Peer of the live connection, if any.
    pub async fn peer(&self) -> Option<SocketAddr> {
        self.inner.live.lock().await.as_ref().map(|c| c.peer)
    }

    /// Number of read loops currently running.  Never more than one.
    pub fn active_readers(&self) -> usize {
        self.inner.active_readers.load(Ordering::SeqCst)
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    /// Marks the mesh transport as up: `NoTransport` → `Idle`.
    pub fn transport_available(&self) {
        if self.state() == LinkState::NoTransport {
            info!("link transport available");
            self.inner.set_state(LinkState::Idle);
        }
    }

    /// Marks the mesh transport as gone: stops listening, closes the live
    /// connection, and moves to `NoTransport`.
    pub async fn transport_lost(&self) {
        info!("link transport lost");
        self.stop_listening().await;
        let _swap = self.inner.swap.lock().await;
        let old = {
            let mut slot = self.inner.live.lock().await;
            self.inner.set_state(LinkState::NoTransport);
            slot.take()
        };
        if let Some(old) = old {
            old.close().await;
        }
    }

    // ── Listen ────────────────────────────────────────────────────────────────

    /// Binds `port` on the configured address and starts accepting.
    ///
    /// Port `0` picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// - [`LinkError::NoTransport`] if the transport is down.
    /// - [`LinkError::AlreadyListening`] if an accept loop is running.
    /// - [`LinkError::BindFailed`] if the socket cannot be bound.  Also
    ///   published as [`LinkEvent::Error`].  Not retried.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr, LinkError> {
        if self.state() == LinkState::NoTransport {
            return Err(LinkError::NoTransport);
        }
        let mut slot = self.inner.listener.lock().await;
        if let Some(existing) = slot.as_ref() {
            return Err(LinkError::AlreadyListening(existing.local_addr));
        }

        let addr = SocketAddr::new(self.inner.config.bind_address, port);
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(source) => {
                self.inner.report(format!("cannot listen on {addr}: {source}"));
                return Err(LinkError::BindFailed { addr, source });
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| LinkError::BindFailed { addr, source })?;
        info!("link listening on {local_addr}");

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(self.clone(), listener, stop_rx));
        *slot = Some(ListenerTask {
            local_addr,
            stop,
            task,
        });
        Ok(local_addr)
    }

    /// Stops the accept loop, if running.  The live connection is untouched.
    pub async fn stop_listening(&self) {
        let listener = self.inner.listener.lock().await.take();
        if let Some(listener) = listener {
            let _ = listener.stop.send(());
            if let Err(e) = listener.task.await {
                warn!("accept loop ended abnormally: {e}");
            }
            info!("link stopped listening on {}", listener.local_addr);
        }
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    /// Resolves `host` and connects to it, replacing any live connection.
    ///
    /// # Errors
    ///
    /// - [`LinkError::NoTransport`] if the transport is down, or went down
    ///   while dialing.
    /// - [`LinkError::HostUnreachable`] if `host` does not resolve.
    /// - [`LinkError::ConnectFailed`] if the connection fails or times out.
    ///
    /// On resolve or connect failure the state is `Lost`, an error event is
    /// published, and no connection is live.  Nothing is retried.
    pub async fn connect(&self, host: &str, port: u16) -> Result<SocketAddr, LinkError> {
        if self.state() == LinkState::NoTransport {
            return Err(LinkError::NoTransport);
        }
        self.close_live().await;
        self.settle(LinkState::Connecting).await;

        let addr = match resolve(host, port).await {
            Ok(addr) => addr,
            Err(reason) => {
                self.settle(LinkState::Lost).await;
                self.inner.report(format!("cannot resolve {host}: {reason}"));
                return Err(LinkError::HostUnreachable {
                    host: host.to_string(),
                    reason,
                });
            }
        };

        info!("connecting to {addr}");
        let timeout = self.inner.config.connect_timeout;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(self.connect_failed(addr, source).await),
            Err(_) => {
                let source = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {timeout:?}"),
                );
                return Err(self.connect_failed(addr, source).await);
            }
        };
        if !self.install(stream, addr).await {
            return Err(LinkError::NoTransport);
        }
        Ok(addr)
    }

    async fn connect_failed(&self, addr: SocketAddr, source: io::Error) -> LinkError {
        self.settle(LinkState::Lost).await;
        self.inner.report(format!("cannot connect to {addr}: {source}"));
        LinkError::ConnectFailed { addr, source }
    }

    // ── Send / disconnect ─────────────────────────────────────────────────────

    /// Writes one value to the live connection.
    ///
    /// Returns `Ok(false)` and drops the value when no connection is live, or
    /// when the connection is closed while the write is still pending.
    ///
    /// # Errors
    ///
    /// [`LinkError::WriteFailed`] if the write fails.  The connection is then
    /// torn down exactly as if the peer had closed it: state `Lost`, error
    /// event published.
    pub async fn send(&self, value: ValueSample) -> Result<bool, LinkError> {
        let (id, peer, writer, mut halt) = {
            let slot = self.inner.live.lock().await;
            let Some(conn) = slot.as_ref() else {
                debug!("no live link connection; dropping value {value}");
                return Ok(false);
            };
            (conn.id, conn.peer, Arc::clone(&conn.writer), conn.halt.subscribe())
        };

        let written = tokio::select! {
            _ = halt.wait_for(|halted| *halted) => {
                debug!("connection to {peer} closed while sending; dropping value {value}");
                return Ok(false);
            }
            written = write_value(&writer, value) => written,
        };
        let source = match written {
            Ok(()) => {
                debug!("sent {value} to {peer}");
                return Ok(true);
            }
            Err(source) => source,
        };

        let broken = {
            let mut slot = self.inner.live.lock().await;
            if slot.as_ref().is_some_and(|c| c.id == id) {
                self.inner.set_state(LinkState::Lost);
                slot.take()
            } else {
                None
            }
        };
        let Some(broken) = broken else {
            debug!("write to replaced connection {peer} failed: {source}; dropping value {value}");
            return Ok(false);
        };
        broken.close().await;
        self.inner.report(format!("write to {peer} failed: {source}"));
        Err(LinkError::WriteFailed { peer, source })
    }

    /// Closes the live connection, if any, and moves to `Idle`.
    pub async fn disconnect(&self) {
        let _swap = self.inner.swap.lock().await;
        let old = {
            let mut slot = self.inner.live.lock().await;
            let old = slot.take();
            if old.is_some() {
                self.inner.set_state(LinkState::Idle);
            }
            old
        };
        if let Some(old) = old {
            info!("disconnecting from {}", old.peer);
            old.close().await;
        }
    }

    /// Closes the live connection and stops the accept loop.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.stop_listening().await;
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Replaces the live connection with `stream`.
    ///
    /// Returns `false`, and closes `stream`, if the transport went away before
    /// the connection could be installed.
    async fn install(&self, stream: TcpStream, peer: SocketAddr) -> bool {
        let _swap = self.inner.swap.lock().await;

        let old = self.inner.live.lock().await.take();
        if let Some(old) = old {
            info!("replacing link connection to {} with {peer}", old.peer);
            old.close().await;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay on {peer} failed: {e}");
        }
        let (read_half, writer) = stream.into_split();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancel_rx) = oneshot::channel();
        let (halt, _) = watch::channel(false);

        // The slot lock is held until the connection is stored, so a reader
        // that ends immediately still finds its own id when it looks.
        let mut slot = self.inner.live.lock().await;
        if self.inner.state() == LinkState::NoTransport {
            info!("transport lost while connecting to {peer}; dropping connection");
            return false;
        }
        self.inner.active_readers.fetch_add(1, Ordering::SeqCst);
        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.inner),
            id,
            peer,
            read_half,
            cancel_rx,
        ));
        *slot = Some(LiveConnection {
            id,
            peer,
            writer: Arc::new(Mutex::new(writer)),
            halt,
            cancel,
            reader,
        });
        info!("link connected to {peer}");
        self.inner.emit(LinkEvent::PeerConnected(peer));
        self.inner.set_state(LinkState::Connected);
        true
    }

    /// Closes the live connection without an `Idle` transition.
    async fn close_live(&self) {
        let _swap = self.inner.swap.lock().await;
        let old = self.inner.live.lock().await.take();
        if let Some(old) = old {
            info!("closing link connection to {} before reconnecting", old.peer);
            old.close().await;
        }
    }

    /// Sets `state` unless the transport went away meanwhile.
    async fn settle(&self, state: LinkState) {
        let _slot = self.inner.live.lock().await;
        if self.inner.state() != LinkState::NoTransport {
            self.inner.set_state(state);
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, String> {
    let mut addrs = lookup_host((host, port)).await.map_err(|e| e.to_string())?;
    addrs
        .next()
        .ok_or_else(|| "no addresses found".to_string())
}

async fn write_value(writer: &Mutex<OwnedWriteHalf>, value: ValueSample) -> io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(&value.encode()).await?;
    writer.flush().await
}

async fn accept_loop(relay: LinkRelay, listener: TcpListener, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!("accept loop stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("accepted link connection from {peer}");
                    // A `false` here is already logged by `install`.
                    relay.install(stream, peer).await;
                }
                Err(e) => {
                    // Per-connection accept failures do not stop the listener.
                    error!("accept failed: {e}");
                }
            },
        }
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    id: u64,
    peer: SocketAddr,
    read_half: OwnedReadHalf,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut reader = BufReader::new(read_half);
    let mut failure = None;
    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!("reader {id} for {peer} cancelled");
                inner.active_readers.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            read = reader.read_u8() => match read {
                Ok(byte) => {
                    let value = ValueSample(byte);
                    debug!("received {value} from {peer}");
                    inner.emit(LinkEvent::ValueReceived(value));
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("peer {peer} closed the link");
                    break;
                }
                Err(e) => {
                    failure = Some(format!("read from {peer} failed: {e}"));
                    break;
                }
            },
        }
    }

    inner.active_readers.fetch_sub(1, Ordering::SeqCst);
    let mut slot = inner.live.lock().await;
    if slot.as_ref().is_some_and(|c| c.id == id) {
        // Dropping the connection drops our own JoinHandle, which only detaches.
        slot.take();
        inner.set_state(LinkState::Lost);
        if let Some(message) = failure {
            inner.report(message);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
