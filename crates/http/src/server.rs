//! The application-facing server surface.
//!
//! A [`Server`] pairs a [`Runtime`] (event-loop threads + lifetime
//! accounting) with an [`HttpCodec`] and a set of listener registries:
//!
//! - `request` — fired once per transaction with the message pair
//! - `continue` — fired instead of the automatic `100 Continue` when a client
//!   asks permission to send its body and a listener wants to decide
//! - `expectation` — fired for `Expect` values other than `100-continue`;
//!   without a listener such transactions fail with `417 Expectation Failed`
//! - `listening` — fired once the listener socket is bound
//!
//! These registries are the only state shared across loop threads (a
//! connection's events may run on a different thread than the registration
//! call), so they live behind locks; everything per-connection stays
//! single-threaded.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, error, info, warn};

use evio_core::runtime::WorkGuard;
use evio_core::{Listener, Runtime, SharedErrorChannel, SharedListeners, StreamError};

use crate::connection::HttpConnection;
use crate::message::{IncomingMessage, OutgoingMessage};
use crate::protocol::HttpCodec;

type MessagePair = (IncomingMessage, OutgoingMessage);

const KIND: &str = "http-server";

/// The server's listener registries and error channel.
///
/// Shared (behind `Arc`) between the server handle, its accept loop, and
/// every live connection.
#[derive(Debug)]
pub struct ServerEvents {
    request: SharedListeners<MessagePair>,
    continue_: SharedListeners<MessagePair>,
    expectation: SharedListeners<MessagePair>,
    listening: SharedListeners<SocketAddr>,
    errors: SharedErrorChannel,
}

impl Default for ServerEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerEvents {
    pub fn new() -> Self {
        Self {
            request: SharedListeners::new(),
            continue_: SharedListeners::new(),
            expectation: SharedListeners::new(),
            listening: SharedListeners::new(),
            errors: SharedErrorChannel::new(KIND),
        }
    }

    pub fn on_request<F>(&self, callback: F) -> Listener
    where
        F: Fn(IncomingMessage, OutgoingMessage) + Send + Sync + 'static,
    {
        self.request.add(move |(request, response)| callback(request, response))
    }

    pub fn on_continue<F>(&self, callback: F) -> Listener
    where
        F: Fn(IncomingMessage, OutgoingMessage) + Send + Sync + 'static,
    {
        self.continue_.add(move |(request, response)| callback(request, response))
    }

    pub fn on_expectation<F>(&self, callback: F) -> Listener
    where
        F: Fn(IncomingMessage, OutgoingMessage) + Send + Sync + 'static,
    {
        self.expectation.add(move |(request, response)| callback(request, response))
    }

    pub fn once_listening<F>(&self, callback: F) -> Listener
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.listening.once(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        self.errors.on_error(callback)
    }

    pub fn remove_request(&self, listener: Listener) {
        self.request.remove(listener);
    }

    pub fn remove_continue(&self, listener: Listener) {
        self.continue_.remove(listener);
    }

    pub fn remove_expectation(&self, listener: Listener) {
        self.expectation.remove(listener);
    }

    pub(crate) fn has_request_listeners(&self) -> bool {
        !self.request.is_empty()
    }

    pub(crate) fn has_continue_listeners(&self) -> bool {
        !self.continue_.is_empty()
    }

    pub(crate) fn has_expectation_listeners(&self) -> bool {
        !self.expectation.is_empty()
    }

    pub(crate) fn emit_request(&self, request: IncomingMessage, response: OutgoingMessage) {
        self.request.emit((request, response));
    }

    pub(crate) fn emit_continue(&self, request: IncomingMessage, response: OutgoingMessage) {
        self.continue_.emit((request, response));
    }

    pub(crate) fn emit_expectation(&self, request: IncomingMessage, response: OutgoingMessage) {
        self.expectation.emit((request, response));
    }

    pub(crate) fn emit_listening(&self, address: SocketAddr) {
        self.listening.emit(address);
    }

    pub(crate) fn emit_error(&self, err: StreamError) {
        self.errors.emit(err);
    }
}

/// An evented HTTP server: registries plus an accept loop.
pub struct Server<C> {
    runtime: Arc<Runtime>,
    codec: Arc<C>,
    events: Arc<ServerEvents>,
}

impl<C> std::fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("events", &self.events).finish_non_exhaustive()
    }
}

impl<C> Server<C>
where
    C: HttpCodec,
{
    pub fn new(runtime: Arc<Runtime>, codec: C) -> Self {
        Self { runtime, codec: Arc::new(codec), events: Arc::new(ServerEvents::new()) }
    }

    /// The server's registries, for sharing with code that outlives this
    /// handle.
    pub fn events(&self) -> Arc<ServerEvents> {
        Arc::clone(&self.events)
    }

    pub fn on_request<F>(&self, callback: F) -> Listener
    where
        F: Fn(IncomingMessage, OutgoingMessage) + Send + Sync + 'static,
    {
        self.events.on_request(callback)
    }

    pub fn on_continue<F>(&self, callback: F) -> Listener
    where
        F: Fn(IncomingMessage, OutgoingMessage) + Send + Sync + 'static,
    {
        self.events.on_continue(callback)
    }

    pub fn on_expectation<F>(&self, callback: F) -> Listener
    where
        F: Fn(IncomingMessage, OutgoingMessage) + Send + Sync + 'static,
    {
        self.events.on_expectation(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> Listener
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        self.events.on_error(callback)
    }

    /// Starts listening on `host:port` with the given accept backlog.
    ///
    /// Returns immediately after address resolution; binding happens on an
    /// event-loop thread, and bind failures surface on the server's error
    /// channel. The `listening` event fires with the bound address (useful
    /// with port 0).
    pub fn listen(&self, port: u16, host: &str, backlog: u32) -> io::Result<()> {
        self.do_listen(port, host, backlog)
    }

    /// Like [`listen`](Self::listen), firing `on_listening` once the socket is
    /// bound.
    pub fn listen_with<F>(&self, port: u16, host: &str, backlog: u32, on_listening: F) -> io::Result<()>
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.events.once_listening(on_listening);
        self.do_listen(port, host, backlog)
    }

    fn do_listen(&self, port: u16, host: &str, backlog: u32) -> io::Result<()> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses"))?;

        let runtime = Arc::clone(&self.runtime);
        let events = Arc::clone(&self.events);
        let codec = Arc::clone(&self.codec);
        // the listening socket counts as outstanding work for as long as it
        // accepts, keeping the process alive
        let guard = self.runtime.acquire_work();

        self.runtime.spawn_on_loop(move || {
            tokio::task::spawn_local(accept_loop(runtime, events, codec, addr, backlog, guard));
        });
        Ok(())
    }
}

async fn accept_loop<C>(
    runtime: Arc<Runtime>,
    events: Arc<ServerEvents>,
    codec: Arc<C>,
    addr: SocketAddr,
    backlog: u32,
    guard: WorkGuard,
) where
    C: HttpCodec,
{
    let _guard = guard;

    let listener = match bind(addr, backlog) {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, address = %addr, "bind server error");
            events.emit_error(StreamError::other(e));
            return;
        }
    };
    let local_addr = listener.local_addr().unwrap_or(addr);
    info!(address = %local_addr, "server listening");
    events.emit_listening(local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                debug!(remote = %remote_addr, "accepted connection");
                dispatch_connection(&runtime, &events, &codec, stream);
            }
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        }
    }
}

fn bind(addr: SocketAddr, backlog: u32) -> io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Hands an accepted connection to the event-loop thread that will own it.
///
/// The socket is detached from the accepting loop's reactor and re-registered
/// on the target loop, so every subsequent event for the connection runs
/// there.
fn dispatch_connection<C>(runtime: &Arc<Runtime>, events: &Arc<ServerEvents>, codec: &Arc<C>, stream: TcpStream)
where
    C: HttpCodec,
{
    let std_stream = match stream.into_std() {
        Ok(std_stream) => std_stream,
        Err(e) => {
            warn!(cause = %e, "failed to detach accepted connection");
            return;
        }
    };

    let guard = runtime.acquire_work();
    let events = Arc::clone(events);
    let codec = Arc::clone(codec);
    let high_water_mark = runtime.high_water_mark();

    runtime.spawn_on_loop(move || {
        let stream = match TcpStream::from_std(std_stream) {
            Ok(stream) => stream,
            Err(e) => {
                error!(cause = %e, "failed to register accepted connection");
                return;
            }
        };
        let (decoded, frames) = codec.channel(stream);
        let connection = HttpConnection::new(events, high_water_mark);
        tokio::task::spawn_local(async move {
            let _guard = guard;
            match connection.process(decoded, frames).await {
                Ok(()) => info!("finished process, connection shutdown"),
                Err(e) => error!(cause = %e, "service has error, connection shutdown"),
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NullCodec;
    use evio_core::RuntimeConfig;
    use std::time::Duration;

    fn test_runtime() -> Arc<Runtime> {
        Arc::new(Runtime::new(RuntimeConfig {
            loop_threads: 2,
            idle_grace: Duration::from_millis(20),
            ..RuntimeConfig::default()
        }))
    }

    #[test]
    fn listening_event_reports_bound_address() {
        let server = Server::new(test_runtime(), NullCodec);
        server.on_request(|_req, _res| {});

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        server.listen_with(0, "127.0.0.1", 128, move |addr| {
            tx.send(addr).unwrap();
        }).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let addr = loop {
            if let Ok(addr) = rx.try_recv() {
                break addr;
            }
            assert!(std::time::Instant::now() < deadline, "listening event never fired");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_ne!(addr.port(), 0);

        // a real TCP client can reach the socket; the null codec closes the
        // connection straight away
        let stream = std::net::TcpStream::connect(addr).unwrap();
        drop(stream);
    }

    #[test]
    fn unresolvable_host_fails_synchronously() {
        let server = Server::new(test_runtime(), NullCodec);
        assert!(server.listen(80, "definitely not a hostname", 1).is_err());
    }

    #[test]
    fn registries_report_membership_and_removal() {
        let events = ServerEvents::new();
        assert!(!events.has_request_listeners());

        let token = events.on_request(|_req, _res| {});
        assert!(events.has_request_listeners());
        events.remove_request(token);
        assert!(!events.has_request_listeners());

        assert!(!events.has_continue_listeners());
        events.on_continue(|_req, _res| {});
        assert!(events.has_continue_listeners());

        assert!(!events.has_expectation_listeners());
        events.on_expectation(|_req, _res| {});
        assert!(events.has_expectation_listeners());
    }
}
