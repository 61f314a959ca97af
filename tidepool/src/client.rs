//! Client lifecycle around a transport session.

use std::cell::RefCell;
use std::rc::Rc;

use crate::codings::Role;
use crate::config::TransportOptions;
use crate::error::TransportError;
use crate::packet::{RequestPacket, ResponsePacket};
use crate::session::{DefaultSessionFactory, SessionFactory, TransportSession};
use crate::socket::{DatagramProvider, TokioDatagramProvider};

/// Sends requests through one lazily created client session.
///
/// The socket is bound on first use (`connect` or `send`) to an ephemeral
/// port of the address family the static channel needs. Must be used inside
/// a [`tokio::task::LocalSet`].
pub struct Client<P: DatagramProvider = TokioDatagramProvider> {
    provider: P,
    options: Rc<TransportOptions>,
    factory: Rc<dyn SessionFactory>,
    session: RefCell<Option<Rc<TransportSession>>>,
}

impl<P: DatagramProvider> Client<P> {
    /// Client binding its socket through `provider`.
    pub fn new(provider: P, options: TransportOptions) -> Self {
        Self {
            provider,
            options: Rc::new(options),
            factory: Rc::new(DefaultSessionFactory::default()),
            session: RefCell::new(None),
        }
    }

    /// Use `factory` to create the session.
    pub fn with_factory(mut self, factory: Rc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Options.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Whether an open session exists.
    pub fn is_connected(&self) -> bool {
        self.session
            .borrow()
            .as_ref()
            .is_some_and(|session| session.is_open())
    }

    /// Current session, if connected.
    pub fn session(&self) -> Option<Rc<TransportSession>> {
        self.session.borrow().clone()
    }

    /// Bind the socket and open the session. Idempotent.
    ///
    /// # Errors
    ///
    /// `Io` when the socket cannot be bound.
    pub async fn connect(&self) -> Result<Rc<TransportSession>, TransportError> {
        if let Some(session) = self.open_session() {
            return Ok(session);
        }

        let bind_addr = self.options.client_bind_address();
        let socket = self.provider.bind(bind_addr).await?;

        // Another caller may have connected while we were binding.
        if let Some(session) = self.open_session() {
            return Ok(session);
        }

        let session = self
            .factory
            .create(Role::Client, Rc::new(socket), self.options.clone());
        tracing::debug!(local_addr = ?session.local_addr(), "client connected");
        *self.session.borrow_mut() = Some(session.clone());
        Ok(session)
    }

    fn open_session(&self) -> Option<Rc<TransportSession>> {
        self.session
            .borrow()
            .as_ref()
            .filter(|session| session.is_open())
            .cloned()
    }

    /// Send a request, connecting first if needed.
    pub async fn send(&self, request: RequestPacket) -> Result<ResponsePacket, TransportError> {
        let session = self.connect().await?;
        session.send(request).await
    }

    /// Destroy the session; pending requests fail with `SessionClosed`.
    ///
    /// A later `send` connects again.
    pub fn shutdown(&self) {
        if let Some(session) = self.session.borrow_mut().take() {
            session.destroy();
        }
    }
}
