//! In-process plugin fakes for tests.
//!
//! [`ScriptedPlugin`] implements [`PluginRpc`](crate::rpc::PluginRpc)
//! without a child process or socket, with scripted verdicts and call
//! recording. Used by this crate's pipeline tests and by the gateway's
//! middleware tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use mcpd_core::Flow;

use crate::error::RpcError;
use crate::proto::v1::{HttpRequest, HttpResponse, Metadata, PluginConfig};
use crate::rpc::PluginRpc;

/// Scripted verdict for `handle_request`.
#[derive(Debug, Clone)]
pub enum RequestBehavior {
    /// Continue with no payload beyond the flag.
    Continue,
    /// Continue, carrying the given response (e.g. a `modified_request`).
    ContinueWith(HttpResponse),
    /// Short-circuit with the given response.
    Reject(HttpResponse),
    /// Fail the RPC.
    Fail,
}

/// Scripted verdict for `handle_response`.
#[derive(Debug, Clone)]
pub enum ResponseBehavior {
    /// Echo the incoming response with `continue_` set.
    Echo,
    /// Continue, replacing the response wholesale.
    Replace(HttpResponse),
    /// Short-circuit with the given response.
    Reject(HttpResponse),
    /// Fail the RPC.
    Fail,
}

/// An in-process fake plugin with scripted behavior and call recording.
pub struct ScriptedPlugin {
    capabilities: HashSet<Flow>,
    failing_capability_calls: AtomicUsize,
    capability_calls: AtomicUsize,
    on_request: RequestBehavior,
    on_response: ResponseBehavior,
    requests_seen: Mutex<Vec<HttpRequest>>,
    responses_seen: Mutex<Vec<HttpResponse>>,
    stopped: AtomicBool,
    fail_stop: bool,
    commit_hash: String,
}

impl ScriptedPlugin {
    /// A plugin supporting both flows that always continues.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            capabilities: HashSet::from([Flow::Request, Flow::Response]),
            failing_capability_calls: AtomicUsize::new(0),
            capability_calls: AtomicUsize::new(0),
            on_request: RequestBehavior::Continue,
            on_response: ResponseBehavior::Echo,
            requests_seen: Mutex::new(Vec::new()),
            responses_seen: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            fail_stop: false,
            commit_hash: "deadbeef".to_string(),
        }
    }

    /// A plugin that rejects every request with `status` and `body`.
    #[must_use]
    pub fn rejecting(status: i32, body: &str) -> Self {
        Self::passthrough().with_request_behavior(RequestBehavior::Reject(HttpResponse {
            continue_: false,
            status_code: status,
            body: body.as_bytes().to_vec(),
            ..HttpResponse::default()
        }))
    }

    /// A plugin whose `handle_request` always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::passthrough().with_request_behavior(RequestBehavior::Fail)
    }

    /// A plugin that continues while proposing `modified` as the new
    /// request.
    #[must_use]
    pub fn mutating(modified: HttpRequest) -> Self {
        Self::passthrough().with_request_behavior(RequestBehavior::ContinueWith(HttpResponse {
            continue_: true,
            modified_request: Some(modified),
            ..HttpResponse::default()
        }))
    }

    /// Override the advertised capability set.
    #[must_use]
    pub fn with_capabilities(mut self, flows: impl IntoIterator<Item = Flow>) -> Self {
        self.capabilities = flows.into_iter().collect();
        self
    }

    /// Fail the first `n` capability fetches before succeeding.
    #[must_use]
    pub fn with_failing_capabilities(self, n: usize) -> Self {
        self.failing_capability_calls.store(n, Ordering::SeqCst);
        self
    }

    /// Override the request verdict.
    #[must_use]
    pub fn with_request_behavior(mut self, behavior: RequestBehavior) -> Self {
        self.on_request = behavior;
        self
    }

    /// Override the response verdict.
    #[must_use]
    pub fn with_response_behavior(mut self, behavior: ResponseBehavior) -> Self {
        self.on_response = behavior;
        self
    }

    /// Make `stop` fail.
    #[must_use]
    pub fn with_failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Override the reported commit hash.
    #[must_use]
    pub fn with_commit_hash(mut self, hash: impl Into<String>) -> Self {
        self.commit_hash = hash.into();
        self
    }

    /// Number of capability fetches performed.
    #[must_use]
    pub fn capability_calls(&self) -> usize {
        self.capability_calls.load(Ordering::SeqCst)
    }

    /// Requests this plugin has been handed, in order.
    #[must_use]
    pub fn requests_seen(&self) -> Vec<HttpRequest> {
        self.requests_seen.lock().expect("lock poisoned").clone()
    }

    /// Responses this plugin has been handed, in order.
    #[must_use]
    pub fn responses_seen(&self) -> Vec<HttpResponse> {
        self.responses_seen.lock().expect("lock poisoned").clone()
    }

    /// Whether `handle_request` was invoked at least once.
    #[must_use]
    pub fn saw_request(&self) -> bool {
        !self.requests_seen().is_empty()
    }

    /// Whether `stop` has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginRpc for ScriptedPlugin {
    async fn capabilities(&self) -> Result<HashSet<Flow>, RpcError> {
        self.capability_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_capability_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_capability_calls
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
            return Err(RpcError::Status(tonic::Status::unavailable(
                "capabilities unavailable",
            )));
        }
        Ok(self.capabilities.clone())
    }

    async fn metadata(&self) -> Result<Metadata, RpcError> {
        Ok(Metadata {
            name: "scripted".to_string(),
            version: "0.0.0".to_string(),
            description: "test fixture".to_string(),
            commit_hash: self.commit_hash.clone(),
        })
    }

    async fn configure(&self, _config: PluginConfig) -> Result<(), RpcError> {
        Ok(())
    }

    async fn check_health(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn check_ready(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn handle_request(&self, req: HttpRequest) -> Result<HttpResponse, RpcError> {
        self.requests_seen.lock().expect("lock poisoned").push(req);
        match &self.on_request {
            RequestBehavior::Continue => Ok(HttpResponse {
                continue_: true,
                ..HttpResponse::default()
            }),
            RequestBehavior::ContinueWith(resp) | RequestBehavior::Reject(resp) => {
                Ok(resp.clone())
            }
            RequestBehavior::Fail => Err(RpcError::Status(tonic::Status::internal(
                "scripted request failure",
            ))),
        }
    }

    async fn handle_response(&self, resp: HttpResponse) -> Result<HttpResponse, RpcError> {
        self.responses_seen
            .lock()
            .expect("lock poisoned")
            .push(resp.clone());
        match &self.on_response {
            ResponseBehavior::Echo => Ok(HttpResponse {
                continue_: true,
                ..resp
            }),
            ResponseBehavior::Replace(replacement) | ResponseBehavior::Reject(replacement) => {
                Ok(replacement.clone())
            }
            ResponseBehavior::Fail => Err(RpcError::Status(tonic::Status::internal(
                "scripted response failure",
            ))),
        }
    }

    async fn stop(&self) -> Result<(), RpcError> {
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop {
            return Err(RpcError::Status(tonic::Status::internal(
                "scripted stop failure",
            )));
        }
        Ok(())
    }
}
