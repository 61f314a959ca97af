//! Transport session: request/response over one socket.
//!
//! A [`TransportSession`] owns exactly one socket. In the client role it
//! encodes requests, writes them, and matches replies to the callers waiting
//! on them. In the server role it reads requests, dispatches each one to a
//! [`RequestHandler`] on its own local task, and writes the replies back to
//! the request origin.
//!
//! # State Transitions
//!
//! ```text
//! Open ──destroy() or socket failure──► Closing ──► Closed
//! ```
//!
//! `destroy()` fires the cancellation signal every reader loop watches, fails
//! all pending waiters with [`TransportError::SessionClosed`], and releases
//! the socket. Calling it again does nothing. When the socket itself closes
//! or fails, the session destroys itself the same way.
//!
//! # Single-Threaded Design
//!
//! Uses `Cell` and `RefCell` for interior mutability and spawns local tasks;
//! sessions must be created and used inside a [`tokio::task::LocalSet`].

mod pending;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use self::pending::PendingRequests;
use crate::address::RemoteAddress;
use crate::codings::{Codings, CodingsContext, Packet, Role};
use crate::config::TransportOptions;
use crate::error::TransportError;
use crate::message::{Message, MessageId};
use crate::packet::{RequestPacket, ResponsePacket, StatusCode};
use crate::reader::{MessageReader, MessageStream, Received};
use crate::router::RequestHandler;
use crate::socket::DatagramSocket;
use crate::writer::MessageWriter;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting operations.
    Open,
    /// `destroy()` is running.
    Closing,
    /// Destroyed; every operation fails with `SessionClosed`.
    Closed,
}

/// Request/response session over one socket.
pub struct TransportSession {
    role: Role,
    options: Rc<TransportOptions>,
    codings: Codings,
    socket: RefCell<Option<Rc<dyn DatagramSocket>>>,
    local_addr: Option<SocketAddr>,
    state: Cell<SessionState>,
    closed: watch::Sender<bool>,
    pending: RefCell<PendingRequests>,
    next_correlation_id: Cell<u64>,
    pump: RefCell<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Create a session.
    ///
    /// Client sessions start their response pump immediately, so this must
    /// run inside a [`tokio::task::LocalSet`].
    pub fn new(
        role: Role,
        socket: Rc<dyn DatagramSocket>,
        options: Rc<TransportOptions>,
        codings: Codings,
    ) -> Rc<Self> {
        let (closed, _) = watch::channel(false);
        let local_addr = socket.local_addr().ok();
        let session = Rc::new(Self {
            role,
            options,
            codings,
            socket: RefCell::new(Some(socket)),
            local_addr,
            state: Cell::new(SessionState::Open),
            closed,
            pending: RefCell::new(PendingRequests::default()),
            next_correlation_id: Cell::new(1),
            pump: RefCell::new(None),
        });

        if role == Role::Client {
            if let Ok(reader) = session.reader() {
                let task = tokio::task::spawn_local(response_pump(
                    Rc::downgrade(&session),
                    reader.subscribe(),
                ));
                *session.pump.borrow_mut() = Some(task);
            }
        }

        tracing::debug!(role = ?role, local_addr = ?local_addr, "session opened");
        session
    }

    /// Session role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Options the session was created with.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Whether the session accepts operations.
    pub fn is_open(&self) -> bool {
        self.state.get() == SessionState::Open
    }

    /// Address of the owned socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    fn socket(&self) -> Result<Rc<dyn DatagramSocket>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::SessionClosed);
        }
        self.socket
            .borrow()
            .clone()
            .ok_or(TransportError::SessionClosed)
    }

    fn reader(&self) -> Result<MessageReader, TransportError> {
        Ok(MessageReader::new(
            self.socket()?,
            self.options.max_size,
            self.closed.subscribe(),
        ))
    }

    fn writer(&self) -> Result<MessageWriter, TransportError> {
        Ok(MessageWriter::new(self.socket()?, self.options.max_size))
    }

    /// Next counter id not already used by a request in flight.
    fn next_correlation_id(&self) -> MessageId {
        loop {
            let next = self.next_correlation_id.get();
            self.next_correlation_id.set(next.wrapping_add(1));
            let id = MessageId::Num(next);
            if !self.pending.borrow().contains(&id) {
                return id;
            }
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// The request gets a fresh correlation id unless it carries one. The
    /// wait is bounded by the request timeout, or the options timeout.
    /// Dropping the returned future withdraws the request.
    ///
    /// # Errors
    ///
    /// - encoding, writing, or decoding of the reply failed
    /// - `DuplicateId`: a request with the caller's id is still in flight
    /// - `Status` when the peer answered 413 because the exchange did not fit
    ///   in one datagram
    /// - `Timeout`, or `SessionClosed` when the session closes first
    ///
    /// Other error statuses are returned as packets; see
    /// [`ResponsePacket::into_result`].
    pub async fn send(&self, mut request: RequestPacket) -> Result<ResponsePacket, TransportError> {
        if self.role != Role::Client {
            return Err(TransportError::WrongRole {
                expected: Role::Client,
            });
        }
        if !self.is_open() {
            return Err(TransportError::SessionClosed);
        }

        let id = match request.id.clone() {
            Some(id) => id,
            None => self.next_correlation_id(),
        };
        request.id = Some(id.clone());
        let timeout = request.timeout.or(self.options.timeout);

        let mut ctx = CodingsContext::new(Role::Client, self.options.clone());
        let message = self.codings.encode(Packet::Request(request), &mut ctx).await?;
        let message = resolve_destination(message).await?;
        let topic = message
            .address()
            .map(RemoteAddress::topic)
            .or_else(|| ctx.channel().map(str::to_string))
            .unwrap_or_default();

        let writer = self.writer()?;
        let (tx, rx) = oneshot::channel();
        let ticket = self
            .pending
            .borrow_mut()
            .insert(id.clone(), topic.clone(), tx)?;
        let _registration = Registration {
            pending: &self.pending,
            id: id.clone(),
            ticket,
        };
        tracing::debug!(id = %id, topic = %topic, url = %message.url(), "sending request");

        let outcome = match writer.write(message).await {
            Ok(_) => wait_for_reply(rx, timeout).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::debug!(id = %id, topic = %topic, error = %e, "request failed");
        }
        outcome
    }

    async fn dispatch_reply(&self, item: Received) {
        match item {
            Received::Message(message) => {
                let id = message.id().cloned();
                let topic = message.topic().map(str::to_string);
                let mut ctx = CodingsContext::new(Role::Client, self.options.clone());
                let result = match self.codings.decode(message, &mut ctx).await {
                    Ok(Packet::Response(response)) => reject_oversize(response),
                    Ok(Packet::Request(request)) => {
                        tracing::warn!(
                            pattern = %request.pattern,
                            "client session received a request, dropping"
                        );
                        return;
                    }
                    Err(e) => Err(e),
                };
                let waiter = self
                    .pending
                    .borrow_mut()
                    .take_match(id.as_ref(), topic.as_deref());
                match waiter {
                    Some(waiter) => waiter.complete(result),
                    None => tracing::debug!(
                        id = ?id,
                        topic = ?topic,
                        "reply without pending request, dropping"
                    ),
                }
            }
            Received::Malformed { origin, error } => {
                let waiter = self.pending.borrow_mut().take_oldest_for(&origin.topic());
                if let Some(waiter) = waiter {
                    waiter.complete(Err(error.into()));
                }
            }
        }
    }

    /// Serve requests until `stop` resolves or the session closes.
    ///
    /// Each request runs on its own local task. Failures (handler errors,
    /// decode errors, malformed datagrams, replies that cannot be encoded)
    /// are answered with error responses and never end the loop.
    ///
    /// # Errors
    ///
    /// `WrongRole` on a client session. `Io` when the socket closes or fails
    /// underneath the loop; the session is destroyed first.
    pub async fn listen<S>(
        self: Rc<Self>,
        handler: Rc<dyn RequestHandler>,
        stop: S,
    ) -> Result<(), TransportError>
    where
        S: Future<Output = ()>,
    {
        if self.role != Role::Server {
            return Err(TransportError::WrongRole {
                expected: Role::Server,
            });
        }
        let mut stream: MessageStream = self.reader()?.subscribe();
        let mut closed = self.closed.subscribe();
        tokio::pin!(stop);

        tracing::debug!(local_addr = ?self.local_addr, "listening");
        let reader_ended = loop {
            let item = tokio::select! {
                _ = &mut stop => break false,
                _ = closed.changed() => break false,
                item = stream.next() => match item {
                    Some(item) => item,
                    None => break true,
                },
            };
            let session = Rc::clone(&self);
            let handler = Rc::clone(&handler);
            tokio::task::spawn_local(async move {
                session.serve(handler.as_ref(), item).await;
            });
        };

        if reader_ended && self.is_open() {
            let error = match stream.finish().await {
                Err(e) => e,
                Ok(()) => {
                    io::Error::new(io::ErrorKind::ConnectionAborted, "socket reader stopped")
                }
            };
            tracing::error!(
                local_addr = ?self.local_addr,
                error = %error,
                "socket failed, closing session"
            );
            self.destroy();
            return Err(TransportError::Io(error));
        }
        tracing::debug!(local_addr = ?self.local_addr, "stopped listening");
        Ok(())
    }

    async fn serve(&self, handler: &dyn RequestHandler, item: Received) {
        let (response, origin) = match item {
            Received::Malformed { origin, error } => {
                (ResponsePacket::from_error(&error.into()), origin)
            }
            Received::Message(message) => {
                let Some(origin) = message.address().cloned() else {
                    tracing::warn!(url = %message.url(), "inbound message without origin");
                    return;
                };
                let response = self.answer(handler, message, &origin).await;
                (response, origin)
            }
        };
        self.respond(response, origin).await;
    }

    async fn answer(
        &self,
        handler: &dyn RequestHandler,
        message: Message,
        origin: &RemoteAddress,
    ) -> ResponsePacket {
        let id = message.id().cloned();
        let url = message.url().to_string();
        let mut ctx = CodingsContext::new(Role::Server, self.options.clone())
            .with_request(id.clone(), Some(origin.clone()));

        let request = match self.codings.decode(message, &mut ctx).await {
            Ok(Packet::Request(request)) => request,
            Ok(Packet::Response(_)) => {
                return ResponsePacket::from_error(&TransportError::Decode {
                    message: "expected a request".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    origin = %origin,
                    url = %url,
                    error = %e,
                    "failed to decode request"
                );
                return ResponsePacket {
                    id,
                    ..ResponsePacket::from_error(&e)
                };
            }
        };

        let mut reply = ResponsePacket::for_request(&request);
        let pattern = request.pattern.clone();
        match handler.handle(request).await {
            Ok(mut response) => {
                if response.pattern.is_empty() {
                    response.pattern = reply.pattern;
                }
                response.id = reply.id;
                response.remote = Some(origin.clone());
                reply = response;
            }
            Err(e) => {
                tracing::warn!(origin = %origin, pattern = %pattern, error = %e, "handler failed");
                reply.status = e.status();
                reply.status_message = Some(e.to_string());
            }
        }
        reply
    }

    async fn respond(&self, response: ResponsePacket, origin: RemoteAddress) {
        let id = response.id.clone();
        let pattern = response.pattern.clone();
        let error = match self.write_response(response, &origin).await {
            Ok(()) => return,
            Err(TransportError::SessionClosed) => return,
            Err(TransportError::Io(e)) => {
                tracing::warn!(origin = %origin, error = %e, "failed to send response");
                return;
            }
            Err(e) => e,
        };

        tracing::warn!(
            origin = %origin,
            error = %error,
            "response rejected, answering with error"
        );
        let fallback = ResponsePacket {
            id,
            pattern,
            ..ResponsePacket::from_error(&error)
        };
        if let Err(e) = self.write_response(fallback, &origin).await {
            tracing::error!(origin = %origin, error = %e, "failed to send error response");
        }
    }

    async fn write_response(
        &self,
        response: ResponsePacket,
        origin: &RemoteAddress,
    ) -> Result<(), TransportError> {
        let mut ctx = CodingsContext::new(Role::Server, self.options.clone())
            .with_request(response.id.clone(), Some(origin.clone()));
        let message = self.codings.encode(Packet::Response(response), &mut ctx).await?;
        self.writer()?.write(message).await?;
        Ok(())
    }

    /// Tear the session down. Idempotent.
    pub fn destroy(&self) {
        if self.state.get() != SessionState::Open {
            return;
        }
        self.state.set(SessionState::Closing);
        self.closed.send_replace(true);

        let pending = self.pending.borrow_mut().drain();
        let failed = pending.len();
        for waiter in pending {
            waiter.complete(Err(TransportError::SessionClosed));
        }
        if let Some(pump) = self.pump.borrow_mut().take() {
            pump.abort();
        }
        self.socket.borrow_mut().take();

        self.state.set(SessionState::Closed);
        tracing::debug!(
            role = ?self.role,
            local_addr = ?self.local_addr,
            failed_waiters = failed,
            "session closed"
        );
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Pending registration of one `send`; removed when the call returns or its
/// future is dropped.
struct Registration<'a> {
    pending: &'a RefCell<PendingRequests>,
    id: MessageId,
    ticket: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.borrow_mut().release(&self.id, self.ticket);
    }
}

/// Replace a hostname destination with the address it resolves to.
async fn resolve_destination(message: Message) -> Result<Message, TransportError> {
    let Some(address) = message.address() else {
        return Ok(message);
    };
    if address.socket_addr().is_some() {
        return Ok(message);
    }
    let resolved = address.resolve().await?;
    let mut parts = message.into_parts();
    parts.address = Some(RemoteAddress::from(resolved));
    Ok(Message::from_parts(parts))
}

/// A 413 reply means the exchange could not be carried at all.
fn reject_oversize(response: ResponsePacket) -> Result<ResponsePacket, TransportError> {
    if response.status == StatusCode::PAYLOAD_TOO_LARGE {
        response.into_result()
    } else {
        Ok(response)
    }
}

async fn wait_for_reply(
    rx: oneshot::Receiver<Result<ResponsePacket, TransportError>>,
    timeout: Option<Duration>,
) -> Result<ResponsePacket, TransportError> {
    let reply = async {
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::SessionClosed),
        }
    };
    match timeout {
        Some(after) => tokio::time::timeout(after, reply)
            .await
            .unwrap_or(Err(TransportError::Timeout { after })),
        None => reply.await,
    }
}

async fn response_pump(session: Weak<TransportSession>, mut stream: MessageStream) {
    while let Some(item) = stream.next().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        session.dispatch_reply(item).await;
    }

    let outcome = stream.finish().await;
    let Some(session) = session.upgrade() else {
        return;
    };
    if session.is_open() {
        match outcome {
            Err(e) => tracing::warn!(error = %e, "socket failed, closing session"),
            Ok(()) => tracing::warn!("socket reader stopped, closing session"),
        }
        session.destroy();
    }
}

/// Creates sessions for clients and servers.
pub trait SessionFactory {
    /// Create a session owning `socket`.
    fn create(
        &self,
        role: Role,
        socket: Rc<dyn DatagramSocket>,
        options: Rc<TransportOptions>,
    ) -> Rc<TransportSession>;
}

/// Factory wiring sessions with a fixed set of codings.
#[derive(Clone, Default)]
pub struct DefaultSessionFactory {
    codings: Codings,
}

impl DefaultSessionFactory {
    /// Factory using `codings` for every session.
    pub fn new(codings: Codings) -> Self {
        Self { codings }
    }
}

impl SessionFactory for DefaultSessionFactory {
    fn create(
        &self,
        role: Role,
        socket: Rc<dyn DatagramSocket>,
        options: Rc<TransportOptions>,
    ) -> Rc<TransportSession> {
        TransportSession::new(role, socket, options, self.codings.clone())
    }
}
