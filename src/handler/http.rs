//! HTTP glue: one `POST /` carries one IPP request body, `GET /`
//! answers with a human-readable identity string for curious browsers
//! (spec.md §4 "Transport binding").

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode as HttpStatusCode};
use http_body::Body as HttpBody;
use http_body_util::{BodyExt, Full};

use super::IppHandler;
use crate::wire;

type Body = Full<Bytes>;

/// Best-effort recovery of the request-id from a packet `wire::decode`
/// rejected, so the `client-error-bad-request` reply can still carry
/// it. Falls back to `None` when the header itself is too short to
/// contain one.
fn recover_request_id(body: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = body.get(4..8)?.try_into().ok()?;
    let id = u32::from_be_bytes(bytes);
    (id != 0).then_some(id)
}

fn text(status: HttpStatusCode, body: impl Into<Bytes>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(body.into()))
        .expect("static response is always well-formed")
}

/// Handle one HTTP request against the IPP endpoint. `peer` is logged
/// alongside the request but never trusted for anything else.
pub async fn handle_ipp_via_http<ReqBody, ReqData, ReqError>(
    req: Request<ReqBody>,
    handler: Arc<IppHandler>,
    peer: SocketAddr,
    printer_name: String,
) -> Result<Response<Body>, anyhow::Error>
where
    ReqData: bytes::Buf + Send + Sync + Unpin + 'static,
    ReqError: std::error::Error + Send + Sync + 'static,
    ReqBody: HttpBody<Data = ReqData, Error = ReqError> + Send + Sync + Unpin + 'static,
{
    if req.method() == Method::GET {
        return Ok(text(HttpStatusCode::OK, printer_name));
    }
    if req.method() != Method::POST {
        return Ok(Response::builder()
            .status(HttpStatusCode::METHOD_NOT_ALLOWED)
            .header("Allow", "POST, GET")
            .body(Full::new(Bytes::from_static(b"405 Method Not Allowed")))
            .expect("static response is always well-formed"));
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            log::error!("failed to read request body from {}: {}", peer, err);
            return Ok(text(HttpStatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error"));
        }
    };

    let packet = match wire::decode(&body) {
        Ok(packet) => packet,
        Err(err) => {
            log::warn!("malformed IPP request from {}: {}", peer, err);
            let request_id = recover_request_id(&body).unwrap_or(1);
            let response_packet =
                wire::IppPacket::new_response(wire::StatusCode::ClientErrorBadRequest, request_id);
            let encoded = wire::encode(&response_packet);
            return Ok(Response::builder()
                .status(HttpStatusCode::OK)
                .header("Content-Type", "application/ipp")
                .body(Full::new(Bytes::from(encoded)))
                .expect("static response is always well-formed"));
        }
    };

    let response_packet = handler.handle(packet, &body, peer).await;
    let encoded = wire::encode(&response_packet);
    Ok(Response::builder()
        .status(HttpStatusCode::OK)
        .header("Content-Type", "application/ipp")
        .body(Full::new(Bytes::from(encoded)))
        .expect("static response is always well-formed"))
}
