//! The plugin control surface and its gRPC-backed implementation.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use mcpd_core::Flow;

use crate::error::RpcError;
use crate::proto::v1::plugin_service_client::PluginServiceClient;
use crate::proto::v1::{self, HttpRequest, HttpResponse, Metadata, PluginConfig};

/// Deadline applied by the supervisor to every plugin RPC.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// The operations a plugin exposes over its control channel.
///
/// Plugins are polymorphic over this surface; the pipeline and instance
/// layers never see the transport.
#[async_trait]
pub trait PluginRpc: Send + Sync {
    /// The flows the plugin declares it supports.
    async fn capabilities(&self) -> Result<HashSet<Flow>, RpcError>;

    /// The plugin's self-description, including its commit hash.
    async fn metadata(&self) -> Result<Metadata, RpcError>;

    /// Push configuration to the plugin.
    async fn configure(&self, config: PluginConfig) -> Result<(), RpcError>;

    /// Liveness probe.
    async fn check_health(&self) -> Result<(), RpcError>;

    /// Readiness probe.
    async fn check_ready(&self) -> Result<(), RpcError>;

    /// Hand the plugin an inbound request.
    async fn handle_request(&self, req: HttpRequest) -> Result<HttpResponse, RpcError>;

    /// Hand the plugin an outbound response.
    async fn handle_response(&self, resp: HttpResponse) -> Result<HttpResponse, RpcError>;

    /// Ask the plugin to shut down.
    async fn stop(&self) -> Result<(), RpcError>;
}

/// Open an insecure gRPC channel to a Unix domain socket.
///
/// The endpoint URI is a placeholder; the connector ignores it and dials
/// the socket path directly.
///
/// # Errors
///
/// Returns the transport error if the socket cannot be connected.
pub async fn connect_uds(path: &Path) -> Result<Channel, tonic::transport::Error> {
    let path = path.to_path_buf();
    Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        }))
        .await
}

/// gRPC-backed plugin handle with a per-call deadline.
#[derive(Debug, Clone)]
pub struct GrpcPlugin {
    client: PluginServiceClient<Channel>,
    call_timeout: Duration,
}

impl GrpcPlugin {
    /// Wrap a connected channel with the default call deadline.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self::with_timeout(channel, CALL_TIMEOUT)
    }

    /// Wrap a connected channel with an explicit call deadline.
    #[must_use]
    pub fn with_timeout(channel: Channel, call_timeout: Duration) -> Self {
        Self {
            client: PluginServiceClient::new(channel),
            call_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, RpcError>
    where
        F: std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>> + Send,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(RpcError::Status(status)),
            Err(_) => Err(RpcError::DeadlineExceeded(self.call_timeout)),
        }
    }
}

#[async_trait]
impl PluginRpc for GrpcPlugin {
    async fn capabilities(&self) -> Result<HashSet<Flow>, RpcError> {
        let mut client = self.client.clone();
        let caps = self.bounded(async move { client.get_capabilities(()).await }).await?;
        Ok(flows_from_wire(&caps.flows))
    }

    async fn metadata(&self) -> Result<Metadata, RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.get_metadata(()).await }).await
    }

    async fn configure(&self, config: PluginConfig) -> Result<(), RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.configure(config).await }).await
    }

    async fn check_health(&self) -> Result<(), RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.check_health(()).await }).await
    }

    async fn check_ready(&self) -> Result<(), RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.check_ready(()).await }).await
    }

    async fn handle_request(&self, req: HttpRequest) -> Result<HttpResponse, RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.handle_request(req).await }).await
    }

    async fn handle_response(&self, resp: HttpResponse) -> Result<HttpResponse, RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.handle_response(resp).await }).await
    }

    async fn stop(&self) -> Result<(), RpcError> {
        let mut client = self.client.clone();
        self.bounded(async move { client.stop(()).await }).await
    }
}

/// Decode wire flow values into the domain flow set, dropping unknown and
/// unspecified values.
fn flows_from_wire(raw: &[i32]) -> HashSet<Flow> {
    raw.iter()
        .filter_map(|value| match v1::Flow::try_from(*value) {
            Ok(v1::Flow::Request) => Some(Flow::Request),
            Ok(v1::Flow::Response) => Some(Flow::Response),
            _ => None,
        })
        .collect()
}

/// Encode a domain flow for the wire.
#[must_use]
pub fn flow_to_wire(flow: Flow) -> v1::Flow {
    match flow {
        Flow::Request => v1::Flow::Request,
        Flow::Response => v1::Flow::Response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flows_from_wire_filters_unknown() {
        let raw = vec![
            v1::Flow::Request as i32,
            v1::Flow::Unspecified as i32,
            v1::Flow::Response as i32,
            99,
        ];
        let flows = flows_from_wire(&raw);
        assert_eq!(flows, HashSet::from([Flow::Request, Flow::Response]));
    }

    #[test]
    fn test_flow_round_trip() {
        assert_eq!(flow_to_wire(Flow::Request), v1::Flow::Request);
        assert_eq!(flow_to_wire(Flow::Response), v1::Flow::Response);
    }
}
