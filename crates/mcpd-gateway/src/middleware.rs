//! Plugin-pipeline middleware for the proxied HTTP surface.
//!
//! The request body is buffered so plugins can observe it and the
//! downstream handler can still read it. Pipeline failures map to `500`
//! responses carrying a typed `X-Error-Type` header; short-circuit
//! responses from plugins are written verbatim, without that header.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use mcpd_plugins::{HttpRequest, HttpResponse, PluginPipeline};

/// Header naming the pipeline failure class on `500` responses.
pub const ERROR_TYPE_HEADER: &str = "X-Error-Type";
/// `X-Error-Type` value for request-flow failures.
pub const REQUEST_FAILURE: &str = "pipeline.request_failure";
/// `X-Error-Type` value for response-flow failures.
pub const RESPONSE_FAILURE: &str = "pipeline.response_failure";

const REQUEST_FAILURE_BODY: &str = "Request processing failed";
const RESPONSE_FAILURE_BODY: &str = "Response processing failed";

/// Run a request and its response through the plugin pipeline around the
/// downstream handler.
pub async fn pipeline_middleware(
    State(pipeline): State<Arc<PluginPipeline>>,
    req: Request,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer request body");
            return error_response(REQUEST_FAILURE, REQUEST_FAILURE_BODY);
        }
    };

    let plugin_req = HttpRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        headers: first_header_values(&parts.headers),
        body: body_bytes.to_vec(),
    };

    match pipeline.execute_request_flow(plugin_req).await {
        Err(e) => {
            warn!(error = %e, "request flow failed");
            return error_response(REQUEST_FAILURE, REQUEST_FAILURE_BODY);
        }
        Ok(verdict) if !verdict.continue_ => return build_response(&verdict),
        Ok(_) => {}
    }

    // The downstream handler gets the original request with its buffered
    // body restored; in-pipeline mutations are visible to later categories
    // only.
    let downstream_req = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(downstream_req).await;

    let (resp_parts, resp_body) = response.into_parts();
    let resp_bytes = match axum::body::to_bytes(resp_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer response body");
            return error_response(RESPONSE_FAILURE, RESPONSE_FAILURE_BODY);
        }
    };

    let plugin_resp = HttpResponse {
        continue_: true,
        status_code: i32::from(resp_parts.status.as_u16()),
        headers: first_header_values(&resp_parts.headers),
        body: resp_bytes.to_vec(),
        modified_request: None,
    };

    match pipeline.execute_response_flow(plugin_resp).await {
        Err(e) => {
            warn!(error = %e, "response flow failed");
            error_response(RESPONSE_FAILURE, RESPONSE_FAILURE_BODY)
        }
        Ok(final_resp) => build_response(&final_resp),
    }
}

/// First value per header name, as plugins see headers.
fn first_header_values(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for name in headers.keys() {
        if let Some(value) = headers.get(name)
            && let Ok(value) = value.to_str()
        {
            map.insert(name.as_str().to_string(), value.to_string());
        }
    }
    map
}

/// Materialize a pipeline response. The status is written only when it is
/// positive; otherwise the implicit 200 stands. The body is written as-is,
/// empty included.
fn build_response(resp: &HttpResponse) -> Response {
    let status = if resp.status_code > 0 {
        u16::try_from(resp.status_code)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &resp.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Body::from(resp.body.clone())) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "plugin response could not be materialized");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(kind: &'static str, body: &'static str) -> Response {
    match Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(ERROR_TYPE_HEADER, kind)
        .body(Body::from(body))
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_header_values_takes_first() {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", "one".parse().unwrap());
        headers.append("x-multi", "two".parse().unwrap());
        headers.append("x-single", "only".parse().unwrap());

        let map = first_header_values(&headers);
        assert_eq!(map.get("x-multi").map(String::as_str), Some("one"));
        assert_eq!(map.get("x-single").map(String::as_str), Some("only"));
    }

    #[test]
    fn test_build_response_defaults_to_200_without_status() {
        let resp = HttpResponse {
            continue_: false,
            status_code: 0,
            body: b"halted".to_vec(),
            ..HttpResponse::default()
        };
        let response = build_response(&resp);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_build_response_uses_given_status_and_headers() {
        let resp = HttpResponse {
            continue_: false,
            status_code: 429,
            headers: [("retry-after".to_string(), "1".to_string())].into(),
            ..HttpResponse::default()
        };
        let response = build_response(&resp);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("retry-after").unwrap(),
            "1"
        );
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(REQUEST_FAILURE, REQUEST_FAILURE_BODY);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(ERROR_TYPE_HEADER).unwrap(),
            REQUEST_FAILURE
        );
    }
}
