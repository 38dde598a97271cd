use super::AppState;
use crate::core::config::REAL_IP_HEADER;
use crate::core::crypto::{self, HASH_HEADER};
use crate::server::RequestId;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use std::net::IpAddr;
use std::time::Instant;

/// Largest accepted request body.
const MAX_BODY: usize = 32 * 1024 * 1024;

fn request_id(request: &Request) -> RequestId {
    request
        .extensions()
        .get::<RequestId>()
        .copied()
        .unwrap_or_default()
}

async fn buffer(body: Body) -> Result<Bytes, StatusCode> {
    axum::body::to_bytes(body, MAX_BODY)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)
}

/// Assign a correlation id and log the request and its outcome.
pub async fn log_request(mut request: Request, next: Next) -> Response {
    let id = RequestId::new();
    request.extensions_mut().insert(id);
    tracing::info!(
        "[{}] received query with method {}: {}",
        id,
        request.method(),
        request.uri()
    );

    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        "[{}] query response status: {}; duration: {:?}",
        id,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

/// Reject callers whose declared address is outside the trusted subnet.
pub async fn check_subnet(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(subnet) = state.security.trusted_subnet else {
        return Ok(next.run(request).await);
    };

    let declared = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    match declared {
        Some(ip) if subnet.contains(&ip) => Ok(next.run(request).await),
        _ => {
            tracing::debug!("[{}] access is denied by IP: {:?}", request_id(&request), declared);
            Err(StatusCode::FORBIDDEN)
        },
    }
}

/// Inflate gzip request bodies.
pub async fn decompress(request: Request, next: Next) -> Result<Response, StatusCode> {
    let gzipped = request
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));
    if !gzipped {
        return Ok(next.run(request).await);
    }

    let id = request_id(&request);
    let (mut parts, body) = request.into_parts();
    let compressed = buffer(body).await?;

    let mut raw = Vec::new();
    GzDecoder::new(compressed.as_ref())
        .take(MAX_BODY as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(|e| {
            tracing::debug!("[{}] invalid gzip body: {}", id, e);
            StatusCode::BAD_REQUEST
        })?;
    if raw.len() > MAX_BODY {
        tracing::debug!("[{}] inflated body exceeds {} bytes", id, MAX_BODY);
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(raw))).await)
}

/// Verify the request HMAC and sign the response body.
///
/// A non-empty body must carry a matching `HashSHA256` header.
pub async fn verify_hash(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(key) = state.security.key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let id = request_id(&request);
    let (parts, body) = request.into_parts();
    let body = buffer(body).await?;

    if !body.is_empty() {
        let tag = parts
            .headers
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("[{}] missing {} header", id, HASH_HEADER);
                StatusCode::BAD_REQUEST
            })?;

        crypto::verify(key, &body, tag).map_err(|e| {
            tracing::debug!("[{}] invalid {} header value '{}': {}", id, HASH_HEADER, tag, e);
            StatusCode::BAD_REQUEST
        })?;
    }

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;
    sign_response(id, key, response).await
}

async fn sign_response(id: RequestId, key: &[u8], response: Response) -> Result<Response, StatusCode> {
    let (mut parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
        tracing::error!("[{}] failed to read response body: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !body.is_empty() {
        let tag = crypto::sign(key, &body).map_err(|e| {
            tracing::error!("[{}] failed to sign response: {}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        let name = HeaderName::from_bytes(HASH_HEADER.as_bytes())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let value = HeaderValue::from_str(&tag).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        parts.headers.insert(name, value);
    }

    Ok(Response::from_parts(parts, Body::from(body)))
}

/// Decrypt request bodies with the collector's private key.
pub async fn decrypt(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(private_key) = state.security.private_key.as_ref() else {
        return Ok(next.run(request).await);
    };

    let id = request_id(&request);
    let (mut parts, body) = request.into_parts();
    let body = buffer(body).await?;
    if body.is_empty() {
        return Ok(next.run(Request::from_parts(parts, Body::empty())).await);
    }

    let plaintext = crypto::decrypt(private_key, &body).map_err(|e| {
        tracing::debug!("[{}] failed to decrypt body: {}", id, e);
        StatusCode::BAD_REQUEST
    })?;

    parts.headers.remove(CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(plaintext))).await)
}
