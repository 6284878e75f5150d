//! A single live plugin registered with the pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use mcpd_core::Flow;

use crate::error::RpcError;
use crate::proto::v1::{HttpRequest, HttpResponse, Metadata, PluginConfig};
use crate::rpc::PluginRpc;

/// Mutable per-instance state, guarded by one lock.
#[derive(Debug, Default)]
struct InstanceState {
    required: bool,
    configured_flows: HashSet<Flow>,
    /// Flows the plugin itself advertises. Populated at most once.
    supported_flows: Option<HashSet<Flow>>,
}

/// One live plugin: its RPC handle plus the local state the pipeline
/// consults when dispatching.
///
/// The distinction between the two flow sets matters: `is_flow_allowed`
/// reflects what configuration permits, `is_flow_supported` reflects what
/// the plugin advertises. Both must hold for a plugin to run in a flow.
pub struct PluginInstance {
    name: String,
    rpc: Arc<dyn PluginRpc>,
    state: RwLock<InstanceState>,
}

impl PluginInstance {
    /// Wrap an RPC handle as a pipeline instance.
    #[must_use]
    pub fn new(name: impl Into<String>, rpc: Arc<dyn PluginRpc>) -> Self {
        Self {
            name: name.into(),
            rpc,
            state: RwLock::new(InstanceState::default()),
        }
    }

    /// The plugin's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a failure or rejection from this plugin terminates the
    /// pipeline.
    pub async fn required(&self) -> bool {
        self.state.read().await.required
    }

    /// Mark the plugin required or optional.
    pub async fn set_required(&self, required: bool) {
        self.state.write().await.required = required;
    }

    /// Replace the configured flow set.
    pub async fn set_flows(&self, flows: impl IntoIterator<Item = Flow> + Send) {
        self.state.write().await.configured_flows = flows.into_iter().collect();
    }

    /// Whether configuration permits this plugin to run in `flow`.
    pub async fn is_flow_allowed(&self, flow: Flow) -> bool {
        self.state.read().await.configured_flows.contains(&flow)
    }

    /// Whether the plugin advertises support for `flow`.
    ///
    /// The advertised set is fetched over RPC on first use and memoized.
    /// The RPC itself runs with no lock held; a concurrent first call may
    /// fetch twice, but only one result is cached. A fetch failure is
    /// returned to the caller and never cached.
    ///
    /// # Errors
    ///
    /// Returns the RPC error from the capabilities fetch.
    pub async fn is_flow_supported(&self, flow: Flow) -> Result<bool, RpcError> {
        {
            let state = self.state.read().await;
            if let Some(flows) = &state.supported_flows {
                return Ok(flows.contains(&flow));
            }
        }

        let fetched = self.rpc.capabilities().await?;

        let mut state = self.state.write().await;
        let flows = state.supported_flows.get_or_insert(fetched);
        Ok(flows.contains(&flow))
    }

    /// Push configuration to the plugin.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn configure(&self, config: PluginConfig) -> Result<(), RpcError> {
        self.rpc.configure(config).await
    }

    /// Fetch the plugin's metadata.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn metadata(&self) -> Result<Metadata, RpcError> {
        self.rpc.metadata().await
    }

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn check_health(&self) -> Result<(), RpcError> {
        self.rpc.check_health().await
    }

    /// Readiness probe.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn check_ready(&self) -> Result<(), RpcError> {
        self.rpc.check_ready().await
    }

    /// Hand the plugin an inbound request.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn handle_request(&self, req: HttpRequest) -> Result<HttpResponse, RpcError> {
        self.rpc.handle_request(req).await
    }

    /// Hand the plugin an outbound response.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn handle_response(&self, resp: HttpResponse) -> Result<HttpResponse, RpcError> {
        self.rpc.handle_response(resp).await
    }

    /// Ask the plugin to shut down.
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn stop(&self) -> Result<(), RpcError> {
        self.rpc.stop().await
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPlugin;

    #[tokio::test]
    async fn test_required_flag_round_trip() {
        let instance = PluginInstance::new("p", Arc::new(ScriptedPlugin::passthrough()));
        assert!(!instance.required().await);
        instance.set_required(true).await;
        assert!(instance.required().await);
    }

    #[tokio::test]
    async fn test_flow_allowed_reflects_configuration() {
        let instance = PluginInstance::new("p", Arc::new(ScriptedPlugin::passthrough()));
        assert!(!instance.is_flow_allowed(Flow::Request).await);

        instance.set_flows([Flow::Request]).await;
        assert!(instance.is_flow_allowed(Flow::Request).await);
        assert!(!instance.is_flow_allowed(Flow::Response).await);
    }

    #[tokio::test]
    async fn test_flow_supported_is_memoized() {
        let plugin = Arc::new(ScriptedPlugin::passthrough().with_capabilities([Flow::Request]));
        let instance = PluginInstance::new("p", Arc::clone(&plugin) as Arc<dyn PluginRpc>);

        assert!(instance.is_flow_supported(Flow::Request).await.unwrap());
        assert!(!instance.is_flow_supported(Flow::Response).await.unwrap());
        assert!(instance.is_flow_supported(Flow::Request).await.unwrap());

        assert_eq!(plugin.capability_calls(), 1);
    }

    #[tokio::test]
    async fn test_capability_failure_is_not_cached() {
        let plugin = Arc::new(
            ScriptedPlugin::passthrough()
                .with_capabilities([Flow::Request])
                .with_failing_capabilities(1),
        );
        let instance = PluginInstance::new("p", Arc::clone(&plugin) as Arc<dyn PluginRpc>);

        assert!(instance.is_flow_supported(Flow::Request).await.is_err());
        // The failure must not have been cached; the retry succeeds.
        assert!(instance.is_flow_supported(Flow::Request).await.unwrap());
        assert_eq!(plugin.capability_calls(), 2);
    }
}
