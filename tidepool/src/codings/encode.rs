//! Outbound stages: packet to message.

use async_trait::async_trait;

use super::{CodingsContext, Next, Packet, Stage};
use crate::address::RemoteAddress;
use crate::error::TransportError;
use crate::message::{CONTENT_TYPE, Headers, METHOD, Message, STATUS, STATUS_MESSAGE};
use crate::packet::{Body, RequestPacket, ResponsePacket, encode_url};

/// Resolves the destination channel before encoding.
///
/// Requests use their explicit remote, then their URL, then the configured
/// host and port. Responses go back to the request origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStage;

#[async_trait(?Send)]
impl Stage<Packet, Message> for ChannelStage {
    async fn handle(
        &self,
        packet: Packet,
        ctx: &mut CodingsContext,
        next: Next<'_, Packet, Message>,
    ) -> Result<Message, TransportError> {
        if ctx.channel().is_none() {
            let explicit = match &packet {
                Packet::Request(request) => request.remote.clone(),
                Packet::Response(response) => {
                    response.remote.clone().or_else(|| ctx.origin().cloned())
                }
            };
            if let Some(remote) = explicit {
                ctx.set_channel(remote.topic());
            }
        }

        let url = match &packet {
            Packet::Request(request) => request.url.clone(),
            Packet::Response(_) => None,
        };
        ctx.resolve_channel(url.as_deref())?;
        next.run(packet, ctx).await
    }
}

/// Terminal encoder producing the wire message.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketEncoder;

#[async_trait(?Send)]
impl Stage<Packet, Message> for PacketEncoder {
    async fn handle(
        &self,
        packet: Packet,
        ctx: &mut CodingsContext,
        _next: Next<'_, Packet, Message>,
    ) -> Result<Message, TransportError> {
        let address = ctx.channel().map(RemoteAddress::parse).transpose()?;
        match packet {
            Packet::Request(request) => encode_request(request, ctx, address),
            Packet::Response(response) => encode_response(response, ctx, address),
        }
    }
}

fn encode_request(
    request: RequestPacket,
    ctx: &CodingsContext,
    address: Option<RemoteAddress>,
) -> Result<Message, TransportError> {
    let options = ctx.options();
    let mut headers = request.headers;
    let method = request
        .method
        .unwrap_or_else(|| options.default_method.clone());
    headers.set(METHOD, method);
    set_content_type(&mut headers, &request.body);

    let payload = request.body.encode(&options.serialize_ignores)?;
    let mut builder = Message::builder(encode_url(&request.pattern, &request.params))
        .headers(headers)
        .payload(payload);
    if let Some(id) = request.id {
        builder = builder.id(id);
    }
    if let Some(address) = address {
        builder = builder.address(address);
    }
    Ok(builder.build())
}

fn encode_response(
    response: ResponsePacket,
    ctx: &CodingsContext,
    address: Option<RemoteAddress>,
) -> Result<Message, TransportError> {
    let mut headers = response.headers;
    headers.set(STATUS, response.status.as_u16().to_string());
    if let Some(message) = &response.status_message {
        headers.set(STATUS_MESSAGE, message.as_str());
    }
    set_content_type(&mut headers, &response.body);

    let payload = response.body.encode(&ctx.options().serialize_ignores)?;
    let mut builder = Message::builder(response.pattern.key())
        .headers(headers)
        .payload(payload);
    if let Some(id) = response.id.or_else(|| ctx.request_id().cloned()) {
        builder = builder.id(id);
    }
    if let Some(address) = address.or(response.remote) {
        builder = builder.address(address);
    }
    Ok(builder.build())
}

fn set_content_type(headers: &mut Headers, body: &Body) {
    if let Some(content_type) = body.content_type() {
        if !headers.contains(CONTENT_TYPE) {
            headers.set(CONTENT_TYPE, content_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::codings::{Codings, Role};
    use crate::config::TransportOptions;
    use crate::message::MessageId;
    use crate::packet::{Pattern, StatusCode};

    fn client_ctx(options: TransportOptions) -> CodingsContext {
        CodingsContext::new(Role::Client, Rc::new(options))
    }

    #[tokio::test]
    async fn test_explicit_remote_beats_url() {
        let request = RequestPacket::new("x")
            .with_url("udp://10.0.0.1:1/x")
            .with_remote(RemoteAddress::new("10.0.0.2", 2));
        let mut ctx = client_ctx(TransportOptions::default());
        let message = Codings::default()
            .encode(Packet::Request(request), &mut ctx)
            .await
            .expect("encode");
        assert_eq!(message.address(), Some(&RemoteAddress::new("10.0.0.2", 2)));
        assert_eq!(ctx.channel(), Some("10.0.0.2:2"));
    }

    #[tokio::test]
    async fn test_missing_channel_fails() {
        let mut ctx = client_ctx(TransportOptions::default());
        let err = Codings::default()
            .encode(Packet::Request(RequestPacket::new("x")), &mut ctx)
            .await
            .expect_err("no channel");
        assert!(matches!(err, TransportError::NoChannel { .. }));
    }

    #[tokio::test]
    async fn test_request_headers_and_ignores() {
        let options = TransportOptions::default()
            .with_address("127.0.0.1", 4000)
            .with_default_method("PUBLISH")
            .with_serialize_ignores(["token"]);
        let request = RequestPacket::new("sensor/message")
            .with_body(json!({ "message": "ble", "token": "secret" }));

        let mut ctx = client_ctx(options);
        let message = Codings::default()
            .encode(Packet::Request(request), &mut ctx)
            .await
            .expect("encode");

        assert_eq!(message.url(), "sensor/message");
        assert_eq!(message.headers().get(METHOD), Some("PUBLISH"));
        assert_eq!(message.headers().get(CONTENT_TYPE), Some("application/json"));
        let payload = message.payload().as_bytes().expect("bytes");
        assert_eq!(payload.as_ref(), br#"{"message":"ble"}"#);
    }

    #[tokio::test]
    async fn test_explicit_method_and_content_type_are_kept() {
        let request = RequestPacket::new("x")
            .with_url("udp://127.0.0.1:1")
            .with_method("GET")
            .with_header("Content-Type", "application/vnd.custom+json")
            .with_body(json!([1, 2]));
        let message = Codings::default()
            .encode(Packet::Request(request), &mut client_ctx(TransportOptions::default()))
            .await
            .expect("encode");
        assert_eq!(message.headers().get(METHOD), Some("GET"));
        assert_eq!(
            message.headers().get(CONTENT_TYPE),
            Some("application/vnd.custom+json")
        );
    }

    #[tokio::test]
    async fn test_response_addressed_to_origin() {
        let origin = RemoteAddress::new("127.0.0.1", 6000);
        let mut ctx = CodingsContext::new(Role::Server, Rc::new(TransportOptions::default()))
            .with_request(Some(MessageId::from("abc")), Some(origin.clone()));
        let response = ResponsePacket::ok("ble").with_status(StatusCode::OK, "fine");
        let message = Codings::default()
            .encode(
                Packet::Response(ResponsePacket {
                    pattern: Pattern::cmd("xxx"),
                    ..response
                }),
                &mut ctx,
            )
            .await
            .expect("encode");

        assert_eq!(message.address(), Some(&origin));
        assert_eq!(message.id(), Some(&MessageId::from("abc")));
        assert_eq!(message.url(), r#"{"cmd":"xxx"}"#);
        assert_eq!(message.headers().get(STATUS), Some("200"));
        assert_eq!(message.headers().get(STATUS_MESSAGE), Some("fine"));
        assert_eq!(message.headers().get(CONTENT_TYPE), Some("text/plain"));
    }
}
