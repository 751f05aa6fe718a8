use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SocketConfig;
use crate::websocket::UpgradeRequest;

/// Reason a hook vetoed an upgrade. Sent to the peer verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct FilterAbort {
    pub reason: String,
}

impl FilterAbort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait FilterHook: Send + Sync {
    /// Name used in logs when the hook aborts.
    fn name(&self) -> &str {
        "filter"
    }

    async fn filter(
        &self,
        request: UpgradeRequest,
        config: Arc<SocketConfig>,
    ) -> Result<UpgradeRequest, FilterAbort>;
}

/// Hook backed by an async closure, see [`filter_fn`].
pub struct FnFilter<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a [`FilterHook`].
pub fn filter_fn<F, Fut>(name: impl Into<String>, f: F) -> FnFilter<F>
where
    F: Fn(UpgradeRequest, Arc<SocketConfig>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<UpgradeRequest, FilterAbort>> + Send,
{
    FnFilter {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> FilterHook for FnFilter<F>
where
    F: Fn(UpgradeRequest, Arc<SocketConfig>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<UpgradeRequest, FilterAbort>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn filter(
        &self,
        request: UpgradeRequest,
        config: Arc<SocketConfig>,
    ) -> Result<UpgradeRequest, FilterAbort> {
        (self.f)(request, config).await
    }
}

#[derive(Debug)]
pub enum FilterOutcome {
    Proceed(UpgradeRequest),
    Abort { hook: String, reason: String },
}

/// Ordered hook list owned by one controller.
#[derive(Default)]
pub struct FilterPipeline {
    hooks: RwLock<Vec<Arc<dyn FilterHook>>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(self, hook: impl FilterHook + 'static) -> Self {
        self.register(Arc::new(hook));
        self
    }

    /// Append `hook`; it runs after every hook registered before it.
    pub fn register(&self, hook: Arc<dyn FilterHook>) {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(hook = hook.name(), position = hooks.len(), "Filter hook registered");
        hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every hook in order, stopping at the first abort.
    ///
    /// Hooks registered while a run is in progress apply from the next run on.
    pub async fn run(&self, request: UpgradeRequest, config: Arc<SocketConfig>) -> FilterOutcome {
        let hooks: Vec<Arc<dyn FilterHook>> =
            self.hooks.read().unwrap_or_else(|e| e.into_inner()).clone();

        let mut request = request;
        for hook in hooks {
            match hook.filter(request, config.clone()).await {
                Ok(next) => request = next,
                Err(abort) => {
                    return FilterOutcome::Abort {
                        hook: hook.name().to_string(),
                        reason: abort.reason,
                    };
                }
            }
        }

        FilterOutcome::Proceed(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct Trail(Vec<&'static str>);

    fn request() -> UpgradeRequest {
        UpgradeRequest::from_request(Request::builder().uri("/websocket").body(()).unwrap())
    }

    fn config() -> Arc<SocketConfig> {
        Arc::new(SocketConfig::default())
    }

    fn tag(label: &'static str) -> impl FilterHook {
        filter_fn(label, move |mut req: UpgradeRequest, _config| async move {
            let mut trail = req.extensions_mut().remove::<Trail>().unwrap_or(Trail(vec![]));
            trail.0.push(label);
            req.extensions_mut().insert(trail);
            Ok(req)
        })
    }

    #[tokio::test]
    async fn test_empty_pipeline_proceeds() {
        let pipeline = FilterPipeline::new();
        assert!(pipeline.is_empty());
        assert!(matches!(
            pipeline.run(request(), config()).await,
            FilterOutcome::Proceed(_)
        ));
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let pipeline = FilterPipeline::new().with(tag("first")).with(tag("second"));

        match pipeline.run(request(), config()).await {
            FilterOutcome::Proceed(req) => {
                assert_eq!(req.extensions().get::<Trail>(), Some(&Trail(vec!["first", "second"])));
            }
            other => panic!("expected proceed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_abort_short_circuits() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let pipeline = FilterPipeline::new()
            .with(tag("first"))
            .with(filter_fn("deny", |_req, _config| async {
                Err(FilterAbort::new("feature disabled"))
            }))
            .with(filter_fn("never", move |req, _config| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(req)
                }
            }));

        match pipeline.run(request(), config()).await {
            FilterOutcome::Abort { hook, reason } => {
                assert_eq!(hook, "deny");
                assert_eq!(reason, "feature disabled");
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_sees_config_and_can_modify_headers() {
        let pipeline = FilterPipeline::new().with(filter_fn(
            "endpoint-tag",
            |mut req: UpgradeRequest, config: Arc<SocketConfig>| async move {
                let value = HeaderValue::from_str(&config.endpoint)
                    .map_err(|e| FilterAbort::new(e.to_string()))?;
                req.extensions_mut().insert(value);
                Ok(req)
            },
        ));

        match pipeline.run(request(), config()).await {
            FilterOutcome::Proceed(req) => {
                assert_eq!(
                    req.extensions().get::<HeaderValue>(),
                    Some(&HeaderValue::from_static("/websocket"))
                );
            }
            other => panic!("expected proceed, got {:?}", other),
        }
    }
}
