//! Server lifecycle around a transport session.

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codings::Role;
use crate::config::TransportOptions;
use crate::error::TransportError;
use crate::router::RequestHandler;
use crate::session::{DefaultSessionFactory, SessionFactory, TransportSession};
use crate::socket::{DatagramProvider, DatagramSocket, TokioDatagramProvider};

struct RunningServer {
    session: Rc<TransportSession>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), TransportError>>,
    local_addr: SocketAddr,
}

/// Binds a socket and serves requests with one handler.
///
/// Must be used inside a [`tokio::task::LocalSet`].
pub struct Server<P: DatagramProvider = TokioDatagramProvider> {
    provider: P,
    options: Rc<TransportOptions>,
    factory: Rc<dyn SessionFactory>,
    running: RefCell<Option<RunningServer>>,
}

impl<P: DatagramProvider> Server<P> {
    /// Server binding its socket through `provider`.
    pub fn new(provider: P, options: TransportOptions) -> Self {
        Self {
            provider,
            options: Rc::new(options),
            factory: Rc::new(DefaultSessionFactory::default()),
            running: RefCell::new(None),
        }
    }

    /// Use `factory` to create the session.
    pub fn with_factory(mut self, factory: Rc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.borrow().as_ref().map(|running| running.local_addr)
    }

    /// Whether the server is serving.
    pub fn is_running(&self) -> bool {
        self.running.borrow().is_some()
    }

    /// Bind `host:port` from the options and start serving with `handler`.
    ///
    /// Returns the bound address. Starting a running server returns the
    /// current address and keeps the original handler.
    ///
    /// # Errors
    ///
    /// `Io` when the socket cannot be bound.
    pub async fn start(
        &self,
        handler: Rc<dyn RequestHandler>,
    ) -> Result<SocketAddr, TransportError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let bind_addr = self.options.bind_address();
        let socket = self.provider.bind(&bind_addr).await?;
        let local_addr = socket.local_addr()?;

        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let session = self
            .factory
            .create(Role::Server, Rc::new(socket), self.options.clone());
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::task::spawn_local(session.clone().listen(handler, async move {
            let _ = stop_rx.await;
        }));

        *self.running.borrow_mut() = Some(RunningServer {
            session,
            stop,
            task,
            local_addr,
        });
        tracing::info!(local_addr = %local_addr, "server started");
        Ok(local_addr)
    }

    /// Stop serving and release the socket.
    ///
    /// Requests already being handled finish, but their replies are dropped.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        let Some(running) = self.running.borrow_mut().take() else {
            return Ok(());
        };
        let _ = running.stop.send(());
        running.session.destroy();
        running
            .task
            .await
            .map_err(|e| TransportError::Io(io::Error::other(e)))??;
        tracing::info!(local_addr = %running.local_addr, "server stopped");
        Ok(())
    }
}
