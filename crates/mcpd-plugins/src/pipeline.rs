//! Category-ordered plugin pipeline.
//!
//! Both flows walk the categories in their fixed total order. Within a
//! category, instances are filtered down to those that are both permitted
//! (configured flows) and able (advertised capabilities) to run, then
//! executed serially in registration order or fanned out in parallel,
//! depending on the category's properties. A plugin returning
//! `continue_ = false` short-circuits the remaining categories unless the
//! category ignores optional rejections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use mcpd_core::{Category, CategoryProperties, Flow};

use crate::error::{PipelineError, RpcError};
use crate::instance::PluginInstance;
use crate::proto::v1::{HttpRequest, HttpResponse};

/// Outcome of the decision procedure for one plugin result.
#[derive(Debug)]
enum Decision {
    /// Keep going; the payload (when present) may carry a mutation.
    Continue(Option<HttpResponse>),
    /// Short-circuit with this response.
    Stop(HttpResponse),
}

/// Decide what a single plugin's `(response, error)` outcome means for the
/// pipeline.
///
/// | case | required | lenient | outcome |
/// |---|---|---|---|
/// | error | yes | — | pipeline error |
/// | error | no | — | continue (warn) |
/// | rejection | yes | — | stop |
/// | rejection | no | no | stop |
/// | rejection | no | yes | continue (warn) |
/// | otherwise | — | — | continue |
fn decide(
    result: Result<HttpResponse, RpcError>,
    required: bool,
    name: &str,
    ignore_optional_rejection: bool,
) -> Result<Decision, PipelineError> {
    match result {
        Err(source) if required => Err(PipelineError::RequiredPluginFailed {
            name: name.to_string(),
            source,
        }),
        Err(e) => {
            warn!(plugin = name, error = %e, "optional plugin failed, continuing");
            Ok(Decision::Continue(None))
        }
        Ok(resp) if !resp.continue_ => {
            if !required && ignore_optional_rejection {
                warn!(plugin = name, "optional plugin rejected in lenient category, continuing");
                Ok(Decision::Continue(None))
            } else {
                Ok(Decision::Stop(resp))
            }
        }
        Ok(resp) => Ok(Decision::Continue(Some(resp))),
    }
}

/// The request/response interceptor pipeline.
///
/// Registration happens during supervisor startup; execution takes a
/// snapshot of the registered instances so no lock is held across plugin
/// RPCs.
#[derive(Debug, Default)]
pub struct PluginPipeline {
    plugins: RwLock<HashMap<Category, Vec<Arc<PluginInstance>>>>,
}

impl PluginPipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance under a category, after any instances already
    /// registered there.
    pub async fn register(&self, category: Category, instance: Arc<PluginInstance>) {
        debug!(plugin = instance.name(), category = %category, "registering plugin");
        self.plugins
            .write()
            .await
            .entry(category)
            .or_default()
            .push(instance);
    }

    /// Total number of registered instances.
    pub async fn registered_count(&self) -> usize {
        self.plugins.read().await.values().map(Vec::len).sum()
    }

    /// Run the request flow.
    ///
    /// Returns the short-circuiting response, or a `continue_ = true`
    /// response when every category passed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RequiredPluginFailed`] when a required
    /// plugin errors, and [`PipelineError::CapabilityCheckFailed`] when a
    /// capability fetch fails during filtering.
    pub async fn execute_request_flow(
        &self,
        req: HttpRequest,
    ) -> Result<HttpResponse, PipelineError> {
        let snapshot = self.snapshot().await;
        let mut current = req;

        for category in Category::ordered() {
            let Some(instances) = snapshot.get(&category) else {
                continue;
            };
            let eligible = filter_for_flow(instances, Flow::Request).await?;
            if eligible.is_empty() {
                continue;
            }

            let props = category.properties();
            let stop = if props.parallel {
                parallel_request(&eligible, &current, props).await?
            } else {
                serial_request(&eligible, &mut current, props).await?
            };

            if let Some(resp) = stop {
                debug!(category = %category, "request flow short-circuited");
                return Ok(resp);
            }
        }

        Ok(HttpResponse {
            continue_: true,
            ..HttpResponse::default()
        })
    }

    /// Run the response flow.
    ///
    /// In a mutating category the response a plugin returns *is* the new
    /// current response; there is no separate modification field.
    ///
    /// # Errors
    ///
    /// Same failure classes as
    /// [`execute_request_flow`](Self::execute_request_flow).
    pub async fn execute_response_flow(
        &self,
        resp: HttpResponse,
    ) -> Result<HttpResponse, PipelineError> {
        let snapshot = self.snapshot().await;
        let mut current = resp;

        for category in Category::ordered() {
            let Some(instances) = snapshot.get(&category) else {
                continue;
            };
            let eligible = filter_for_flow(instances, Flow::Response).await?;
            if eligible.is_empty() {
                continue;
            }

            let props = category.properties();
            let stop = if props.parallel {
                parallel_response(&eligible, &current, props).await?
            } else {
                serial_response(&eligible, &mut current, props).await?
            };

            if let Some(short_circuit) = stop {
                debug!(category = %category, "response flow short-circuited");
                return Ok(short_circuit);
            }
        }

        Ok(current)
    }

    /// Stop every registered instance and clear registration.
    ///
    /// # Errors
    ///
    /// Returns the joined per-plugin stop failures.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let drained: Vec<Arc<PluginInstance>> = {
            let mut map = self.plugins.write().await;
            map.drain().flat_map(|(_, instances)| instances).collect()
        };

        let mut errors = Vec::new();
        for instance in drained {
            if let Err(e) = instance.stop().await {
                errors.push((instance.name().to_string(), e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ShutdownFailed { errors })
        }
    }

    /// Drop all registrations without stopping the instances. Used by the
    /// supervisor, which owns process shutdown.
    pub async fn clear(&self) {
        self.plugins.write().await.clear();
    }

    async fn snapshot(&self) -> HashMap<Category, Vec<Arc<PluginInstance>>> {
        self.plugins.read().await.clone()
    }
}

/// Keep the instances that are both configured and able to run in `flow`.
async fn filter_for_flow(
    instances: &[Arc<PluginInstance>],
    flow: Flow,
) -> Result<Vec<Arc<PluginInstance>>, PipelineError> {
    let mut eligible = Vec::new();
    for instance in instances {
        if !instance.is_flow_allowed(flow).await {
            continue;
        }
        let supported = instance.is_flow_supported(flow).await.map_err(|source| {
            PipelineError::CapabilityCheckFailed {
                name: instance.name().to_string(),
                source,
            }
        })?;
        if supported {
            eligible.push(Arc::clone(instance));
        }
    }
    Ok(eligible)
}

async fn serial_request(
    plugins: &[Arc<PluginInstance>],
    current: &mut HttpRequest,
    props: CategoryProperties,
) -> Result<Option<HttpResponse>, PipelineError> {
    for instance in plugins {
        let result = instance.handle_request(current.clone()).await;
        let required = instance.required().await;
        match decide(result, required, instance.name(), props.ignore_optional_rejection)? {
            Decision::Stop(resp) => return Ok(Some(resp)),
            Decision::Continue(Some(resp)) => {
                if props.can_modify
                    && let Some(modified) = resp.modified_request
                {
                    *current = modified;
                }
            }
            Decision::Continue(None) => {}
        }
    }
    Ok(None)
}

async fn serial_response(
    plugins: &[Arc<PluginInstance>],
    current: &mut HttpResponse,
    props: CategoryProperties,
) -> Result<Option<HttpResponse>, PipelineError> {
    for instance in plugins {
        let result = instance.handle_response(current.clone()).await;
        let required = instance.required().await;
        match decide(result, required, instance.name(), props.ignore_optional_rejection)? {
            Decision::Stop(resp) => return Ok(Some(resp)),
            Decision::Continue(Some(resp)) => {
                if props.can_modify {
                    *current = resp;
                }
            }
            Decision::Continue(None) => {}
        }
    }
    Ok(None)
}

/// Fan out one task per plugin, wait for every completion, then apply the
/// decision procedure in completion order. The first stop decision wins;
/// later results are discarded. Mutations are never applied here: a
/// parallel category is never a mutating one.
async fn parallel_request(
    plugins: &[Arc<PluginInstance>],
    current: &HttpRequest,
    props: CategoryProperties,
) -> Result<Option<HttpResponse>, PipelineError> {
    let (tx, mut rx) = mpsc::channel(plugins.len());
    for instance in plugins {
        let tx = tx.clone();
        let instance = Arc::clone(instance);
        let req = current.clone();
        tokio::spawn(async move {
            let result = instance.handle_request(req).await;
            let _ = tx.send((instance, result)).await;
        });
    }
    drop(tx);

    let mut completed = Vec::with_capacity(plugins.len());
    while let Some(pair) = rx.recv().await {
        completed.push(pair);
    }

    collate(completed, props).await
}

async fn parallel_response(
    plugins: &[Arc<PluginInstance>],
    current: &HttpResponse,
    props: CategoryProperties,
) -> Result<Option<HttpResponse>, PipelineError> {
    let (tx, mut rx) = mpsc::channel(plugins.len());
    for instance in plugins {
        let tx = tx.clone();
        let instance = Arc::clone(instance);
        let resp = current.clone();
        tokio::spawn(async move {
            let result = instance.handle_response(resp).await;
            let _ = tx.send((instance, result)).await;
        });
    }
    drop(tx);

    let mut completed = Vec::with_capacity(plugins.len());
    while let Some(pair) = rx.recv().await {
        completed.push(pair);
    }

    collate(completed, props).await
}

async fn collate(
    completed: Vec<(Arc<PluginInstance>, Result<HttpResponse, RpcError>)>,
    props: CategoryProperties,
) -> Result<Option<HttpResponse>, PipelineError> {
    let mut stop = None;
    for (instance, result) in completed {
        let required = instance.required().await;
        match decide(result, required, instance.name(), props.ignore_optional_rejection)? {
            Decision::Stop(resp) if stop.is_none() => stop = Some(resp),
            Decision::Stop(_) | Decision::Continue(_) => {}
        }
    }
    Ok(stop)
}
