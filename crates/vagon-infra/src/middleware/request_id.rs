use axum::http::{HeaderName, HeaderValue};
use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID extension type
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Caller-supplied ids are kept only when short and printable.
fn accept_incoming(value: &HeaderValue) -> Option<String> {
    let s = value.to_str().ok()?;
    if s.is_empty() || s.len() > MAX_REQUEST_ID_LEN {
        return None;
    }
    s.chars()
        .all(|c| c.is_ascii_graphic())
        .then(|| s.to_string())
}

/// Propagates `X-Request-ID` from the caller or creates one. The id is put
/// in request extensions, attached to a tracing span around the handler and
/// echoed on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(accept_incoming)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), header_value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_ids_are_validated() {
        assert_eq!(
            accept_incoming(&HeaderValue::from_static("abc-123")),
            Some("abc-123".to_string())
        );
        assert_eq!(accept_incoming(&HeaderValue::from_static("")), None);
        assert_eq!(accept_incoming(&HeaderValue::from_static("has space")), None);

        let long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        assert_eq!(accept_incoming(&HeaderValue::from_str(&long).unwrap()), None);
    }
}
