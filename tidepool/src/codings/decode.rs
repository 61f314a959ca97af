//! Inbound stages: message to packet.

use async_trait::async_trait;

use super::{CodingsContext, Next, Packet, Role, Stage};
use crate::error::TransportError;
use crate::message::{CONTENT_TYPE, METHOD, Message, Payload, STATUS, STATUS_MESSAGE};
use crate::packet::{Body, RequestPacket, ResponsePacket, StatusCode, decode_url};

/// Reads streaming payloads into memory, bounded by `max_size`.
///
/// Materialized payloads pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamBufferStage;

#[async_trait(?Send)]
impl Stage<Message, Packet> for StreamBufferStage {
    async fn handle(
        &self,
        message: Message,
        ctx: &mut CodingsContext,
        next: Next<'_, Message, Packet>,
    ) -> Result<Packet, TransportError> {
        if !message.payload().is_stream() {
            return next.run(message, ctx).await;
        }
        let mut parts = message.into_parts();
        let payload = std::mem::take(&mut parts.payload);
        let bytes = payload.materialize(ctx.options().max_size).await?;
        parts.payload = Payload::Bytes(bytes);
        next.run(Message::from_parts(parts), ctx).await
    }
}

/// Terminal decoder: requests on the server role, responses on the client role.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketDecoder;

#[async_trait(?Send)]
impl Stage<Message, Packet> for PacketDecoder {
    async fn handle(
        &self,
        message: Message,
        ctx: &mut CodingsContext,
        _next: Next<'_, Message, Packet>,
    ) -> Result<Packet, TransportError> {
        let parts = message.into_parts();
        let bytes = match parts.payload {
            Payload::Bytes(bytes) => bytes,
            Payload::Stream(_) => {
                return Err(TransportError::Decode {
                    message: "payload was not buffered before decoding".to_string(),
                });
            }
        };

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .unwrap_or(ctx.options().encoding.as_str())
            .to_string();
        let body = Body::decode(&content_type, bytes)?;
        let (pattern, params) = decode_url(&parts.url);
        let remote = match parts.address {
            Some(address) => Some(address),
            None => ctx.origin().cloned(),
        };

        match ctx.role() {
            Role::Server => Ok(Packet::Request(RequestPacket {
                id: parts.id,
                url: None,
                pattern,
                method: parts.headers.get(METHOD).map(str::to_string),
                headers: parts.headers,
                params,
                body,
                timeout: None,
                remote,
            })),
            Role::Client => {
                let status = match parts.headers.get(STATUS) {
                    Some(raw) => raw.parse().map_err(|_| TransportError::Decode {
                        message: format!("invalid status {raw:?}"),
                    })?,
                    None => StatusCode::OK,
                };
                Ok(Packet::Response(ResponsePacket {
                    id: parts.id,
                    pattern,
                    status,
                    status_message: parts.headers.get(STATUS_MESSAGE).map(str::to_string),
                    headers: parts.headers,
                    body,
                    remote,
                }))
            }
        }
    }
}
