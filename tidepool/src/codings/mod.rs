//! Encode/decode stage pipelines.
//!
//! A [`Pipeline`] is an ordered chain of [`Stage`]s. Each stage receives the
//! input, the per-operation [`CodingsContext`], and a [`Next`] handle for the
//! rest of the chain. It either produces the output itself or delegates with
//! `next.run(...)`, possibly after transforming the input. A chain that runs
//! out of stages fails with [`TransportError::Unhandled`].
//!
//! ```text
//! encode:  Packet ──► ChannelStage ──► PacketEncoder ──► Message
//! decode:  Message ──► StreamBufferStage ──► PacketDecoder ──► Packet
//! ```

mod decode;
mod encode;

pub use decode::{PacketDecoder, StreamBufferStage};
pub use encode::{ChannelStage, PacketEncoder};

use std::rc::Rc;

use async_trait::async_trait;

use crate::address::RemoteAddress;
use crate::config::TransportOptions;
use crate::error::TransportError;
use crate::message::{Message, MessageId};
use crate::packet::{RequestPacket, ResponsePacket};

/// Which side of an exchange a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends requests, receives responses.
    Client,
    /// Receives requests, sends responses.
    Server,
}

/// A request or response packet, the application side of the pipelines.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Request.
    Request(RequestPacket),
    /// Response.
    Response(ResponsePacket),
}

/// Per-operation state shared by the stages of one pipeline run.
#[derive(Debug, Clone)]
pub struct CodingsContext {
    role: Role,
    channel: Option<String>,
    options: Rc<TransportOptions>,
    request_id: Option<MessageId>,
    origin: Option<RemoteAddress>,
}

impl CodingsContext {
    /// Context for one operation.
    pub fn new(role: Role, options: Rc<TransportOptions>) -> Self {
        Self {
            role,
            channel: None,
            options,
            request_id: None,
            origin: None,
        }
    }

    /// Fix the channel up front; resolution then keeps it.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.set_channel(channel);
        self
    }

    /// Set the channel explicitly.
    pub fn set_channel(&mut self, channel: impl Into<String>) {
        self.channel = Some(channel.into());
    }

    /// Remember the request this operation answers.
    pub fn with_request(mut self, id: Option<MessageId>, origin: Option<RemoteAddress>) -> Self {
        self.request_id = id;
        self.origin = origin;
        self
    }

    /// Session role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Options.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Resolved channel, if any.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Id of the request being answered.
    pub fn request_id(&self) -> Option<&MessageId> {
        self.request_id.as_ref()
    }

    /// Origin of the request being answered.
    pub fn origin(&self) -> Option<&RemoteAddress> {
        self.origin.as_ref()
    }

    /// Resolve the channel once: an explicit channel wins, then one derived
    /// from `url` (`scheme://host:port/...`), then the configured `host` and
    /// `port`. Later calls return the cached value.
    pub fn resolve_channel(&mut self, url: Option<&str>) -> Result<&str, TransportError> {
        if self.channel.is_none() {
            let from_url = match url {
                Some(u) if u.contains("://") => Some(RemoteAddress::parse(u)?),
                _ => None,
            };
            let address = from_url
                .or_else(|| self.options.static_channel())
                .ok_or_else(|| TransportError::NoChannel {
                    url: url.map(str::to_string),
                })?;
            tracing::trace!(channel = %address, "resolved channel");
            self.channel = Some(address.topic());
        }
        Ok(self.channel.as_deref().unwrap_or_default())
    }
}

/// One stage of a pipeline.
///
/// Single-core design - no Send bounds needed.
#[async_trait(?Send)]
pub trait Stage<I: 'static, O: 'static> {
    /// Produce the output, or delegate to `next`.
    async fn handle(
        &self,
        input: I,
        ctx: &mut CodingsContext,
        next: Next<'_, I, O>,
    ) -> Result<O, TransportError>;
}

/// The remainder of a pipeline after the current stage.
pub struct Next<'a, I: 'static, O: 'static> {
    stages: &'a [Rc<dyn Stage<I, O>>],
    what: &'static str,
}

impl<'a, I: 'static, O: 'static> Next<'a, I, O> {
    /// Run the remaining stages.
    pub async fn run(self, input: I, ctx: &mut CodingsContext) -> Result<O, TransportError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    what: self.what,
                };
                stage.handle(input, ctx, next).await
            }
            None => Err(TransportError::Unhandled { what: self.what }),
        }
    }

    /// Stages left after this point.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

/// Ordered chain of stages.
pub struct Pipeline<I: 'static, O: 'static> {
    stages: Vec<Rc<dyn Stage<I, O>>>,
    what: &'static str,
}

impl<I: 'static, O: 'static> Pipeline<I, O> {
    /// Empty pipeline; `what` names it in `Unhandled` errors.
    pub fn new(what: &'static str) -> Self {
        Self {
            stages: Vec::new(),
            what,
        }
    }

    /// Append a stage.
    pub fn stage(mut self, stage: impl Stage<I, O> + 'static) -> Self {
        self.stages.push(Rc::new(stage));
        self
    }

    /// Insert a stage at the front.
    pub fn prepend(mut self, stage: impl Stage<I, O> + 'static) -> Self {
        self.stages.insert(0, Rc::new(stage));
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the chain from the first stage.
    pub async fn run(&self, input: I, ctx: &mut CodingsContext) -> Result<O, TransportError> {
        Next {
            stages: &self.stages,
            what: self.what,
        }
        .run(input, ctx)
        .await
    }
}

/// Encode and decode pipelines used by a session.
#[derive(Clone)]
pub struct Codings {
    encodings: Rc<Pipeline<Packet, Message>>,
    decodings: Rc<Pipeline<Message, Packet>>,
}

impl Default for Codings {
    fn default() -> Self {
        Self::new(Self::default_encodings(), Self::default_decodings())
    }
}

impl Codings {
    /// Bundle two pipelines.
    pub fn new(encodings: Pipeline<Packet, Message>, decodings: Pipeline<Message, Packet>) -> Self {
        Self {
            encodings: Rc::new(encodings),
            decodings: Rc::new(decodings),
        }
    }

    /// Standard encode chain: channel resolution, then packet encoding.
    pub fn default_encodings() -> Pipeline<Packet, Message> {
        Pipeline::new("outbound packet")
            .stage(ChannelStage)
            .stage(PacketEncoder)
    }

    /// Standard decode chain: stream buffering, then packet decoding.
    pub fn default_decodings() -> Pipeline<Message, Packet> {
        Pipeline::new("inbound message")
            .stage(StreamBufferStage)
            .stage(PacketDecoder)
    }

    /// Replace the encode pipeline.
    pub fn with_encodings(mut self, encodings: Pipeline<Packet, Message>) -> Self {
        self.encodings = Rc::new(encodings);
        self
    }

    /// Replace the decode pipeline.
    pub fn with_decodings(mut self, decodings: Pipeline<Message, Packet>) -> Self {
        self.decodings = Rc::new(decodings);
        self
    }

    /// Encode a packet into a message.
    pub async fn encode(
        &self,
        packet: Packet,
        ctx: &mut CodingsContext,
    ) -> Result<Message, TransportError> {
        self.encodings.run(packet, ctx).await
    }

    /// Decode a message into a packet.
    pub async fn decode(
        &self,
        message: Message,
        ctx: &mut CodingsContext,
    ) -> Result<Packet, TransportError> {
        self.decodings.run(message, ctx).await
    }
}
