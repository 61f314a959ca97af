//! # Tidepool
//!
//! Transport sessions and message framing for datagram micro-services.
//!
//! Tidepool turns typed application requests into wire messages, ships them
//! over a socket, and matches the replies back to the callers that are
//! waiting for them. The session layer is independent of the wire transport:
//! UDP is the primary target, and connected byte streams are supported through
//! delimiter framing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Client / Server            lifecycle (connect, listen)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │   TransportSession           correlation, cancellation      │
//! │     ├── Codings              encode / decode stage chains   │
//! │     ├── MessageReader        socket → Message stream        │
//! │     └── MessageWriter        Message → socket               │
//! ├─────────────────────────────────────────────────────────────┤
//! │   wire / framing             datagram + stream formats      │
//! │   DatagramSocket             tokio UDP, memory, stream      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on a single-threaded tokio runtime inside a
//! [`tokio::task::LocalSet`]: sessions use `Rc`/`RefCell` and spawn local
//! tasks for their receive loops.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use tidepool::{Client, Pattern, RequestPacket, ResponsePacket, Router, Server};
//! use tidepool::{TokioDatagramProvider, TransportOptions};
//!
//! let router = Router::new().route(Pattern::cmd("echo"), |req: RequestPacket| async move {
//!     Ok(ResponsePacket::ok(req.body))
//! });
//!
//! let server = Server::new(TokioDatagramProvider, TransportOptions::local_network());
//! let addr = server.start(Rc::new(router)).await?;
//!
//! let client = Client::new(TokioDatagramProvider, TransportOptions::default());
//! let reply = client
//!     .send(RequestPacket::new(Pattern::cmd("echo")).with_url(format!("udp://{addr}")))
//!     .await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Remote endpoint addressing.
pub mod address;

/// Client lifecycle around a transport session.
pub mod client;

/// Encode/decode stage pipelines.
pub mod codings;

/// Transport configuration.
pub mod config;

/// Error types for transport operations.
pub mod error;

/// Delimiter framing for stream transports.
pub mod framing;

/// Wire message model.
pub mod message;

/// Typed request/response packets.
pub mod packet;

/// Socket to message stream adapter.
pub mod reader;

/// Request dispatch.
pub mod router;

/// Server lifecycle around a transport session.
pub mod server;

/// Transport session: correlation and request/response over one socket.
pub mod session;

/// Socket abstractions and implementations.
pub mod socket;

/// Datagram wire format with CRC32C checksums.
pub mod wire;

/// Message to socket adapter.
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use address::{AddressFamily, AddressParseError, RemoteAddress};
pub use client::Client;
pub use codings::{
    ChannelStage, Codings, CodingsContext, Next, Packet, PacketDecoder, PacketEncoder, Pipeline,
    Role, Stage, StreamBufferStage,
};
pub use config::{DEFAULT_MAX_SIZE, TransportOptions};
pub use error::TransportError;
pub use framing::{DEFAULT_DELIMITER, FrameDecoder, encode_frame};
pub use message::{HeaderValue, Headers, Message, MessageBuilder, MessageId, MessageParts, Payload};
pub use packet::{
    Body, Params, Pattern, RequestPacket, RequestUpdate, ResponsePacket, ResponseUpdate,
    StatusCode,
};
pub use reader::{MessageReader, MessageStream, Received};
pub use router::{HandlerError, RequestHandler, Router};
pub use server::Server;
pub use session::{DefaultSessionFactory, SessionFactory, SessionState, TransportSession};
pub use socket::{
    DatagramProvider, DatagramSocket, MemoryNetwork, MemorySocket, StreamSocket,
    TokioDatagramProvider,
};
pub use wire::{
    HEADER_SIZE, MAX_DATAGRAM_SIZE, WireError, WireHead, deserialize_datagram, serialize_datagram,
};
pub use writer::MessageWriter;
