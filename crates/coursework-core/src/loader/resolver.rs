//! Dependency-ordered execution of a loader registry.
//!
//! Loaders whose dependencies are all resolved run concurrently on the
//! calling task. A loader becomes eligible the moment every key it depends
//! on is present in the accumulating map. Resolution is all or nothing:
//! after the first error no further loaders are launched, in-flight ones
//! are drained and their results discarded, and the first error is
//! returned.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, instrument, warn};

use super::registry::{LoaderRegistry, LoaderSpec, Resolved};
use crate::error::{CoreError, CoreResult};
use crate::metrics::METRICS;

/// A validated registry ready to resolve invocations.
pub struct DependencyResolver<I> {
    registry: LoaderRegistry<I>,
    order: Vec<String>,
}

impl<I> Clone for DependencyResolver<I> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            order: self.order.clone(),
        }
    }
}

impl<I> std::fmt::Debug for DependencyResolver<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("order", &self.order)
            .finish()
    }
}

impl<I> DependencyResolver<I>
where
    I: Send + Sync + 'static,
{
    /// Validate `registry`. Unknown dependencies and cycles fail here, so
    /// no loader ever runs against a broken graph.
    pub fn new(registry: LoaderRegistry<I>) -> CoreResult<Self> {
        let order = registry.validate()?;
        Ok(Self { registry, order })
    }

    /// Keys in a valid execution order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    #[instrument(skip_all, fields(loaders = self.order.len()))]
    pub async fn resolve(&self, input: Arc<I>) -> CoreResult<Resolved> {
        let mut resolved = Resolved::new();
        let mut waiting: Vec<&LoaderSpec<I>> = self
            .order
            .iter()
            .filter_map(|key| self.registry.get(key))
            .collect();
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<CoreError> = None;

        loop {
            if first_error.is_none() {
                let (ready, blocked): (Vec<_>, Vec<_>) = waiting
                    .into_iter()
                    .partition(|spec| spec.dependencies().iter().all(|d| resolved.contains_key(d)));
                waiting = blocked;

                for spec in ready {
                    let deps: Resolved = spec
                        .dependencies()
                        .iter()
                        .filter_map(|d| resolved.get(d).map(|v| (d.clone(), v.clone())))
                        .collect();
                    let key = spec.key().to_string();
                    let fut = spec.invoke(Arc::clone(&input), deps);
                    debug!(loader = %key, "loader started");
                    METRICS.inc_loaders_executed();
                    in_flight.push(async move { (key, fut.await) });
                }
            }

            match in_flight.next().await {
                Some((key, Ok(value))) => {
                    if first_error.is_none() {
                        debug!(loader = %key, "loader finished");
                        resolved.insert(key, value);
                    }
                }
                Some((key, Err(err))) => {
                    warn!(loader = %key, error = %err, "loader failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                None => break,
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if !waiting.is_empty() {
            return Err(CoreError::CyclicDependency {
                keys: waiting.iter().map(|s| s.key().to_string()).collect(),
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn sleeper(key: &'static str, millis: u64, trace: Trace) -> LoaderSpec<()> {
        LoaderSpec::new(key, move |_, _| {
            let trace = Arc::clone(&trace);
            async move {
                trace.lock().unwrap().push(format!("start:{key}"));
                tokio::time::sleep(Duration::from_millis(millis)).await;
                trace.lock().unwrap().push(format!("end:{key}"));
                Ok(json!(key))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn independent_loaders_run_concurrently() {
        let trace = Trace::default();
        let registry = LoaderRegistry::new()
            .with(sleeper("a", 100, Arc::clone(&trace)))
            .unwrap()
            .with(sleeper("b", 100, Arc::clone(&trace)))
            .unwrap();
        let resolver = DependencyResolver::new(registry).unwrap();

        let started = tokio::time::Instant::now();
        let resolved = resolver.resolve(Arc::new(())).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dependent_loader_waits_and_sees_only_its_inputs() {
        let trace = Trace::default();
        let seen = Arc::new(Mutex::new(Resolved::new()));
        let seen_in = Arc::clone(&seen);
        let trace_in = Arc::clone(&trace);

        let registry = LoaderRegistry::new()
            .with(sleeper("settings", 50, Arc::clone(&trace)))
            .unwrap()
            .with(sleeper("key", 10, Arc::clone(&trace)))
            .unwrap()
            .with(sleeper("unrelated", 200, Arc::clone(&trace)))
            .unwrap()
            .with(
                LoaderSpec::new("configuration", move |_, deps: Resolved| {
                    let seen = Arc::clone(&seen_in);
                    let trace = Arc::clone(&trace_in);
                    async move {
                        trace.lock().unwrap().push("run:configuration".to_string());
                        *seen.lock().unwrap() = deps.clone();
                        Ok(json!({ "ready": true }))
                    }
                })
                .after(["settings", "key"]),
            )
            .unwrap();
        let resolver = DependencyResolver::new(registry).unwrap();

        let resolved = resolver.resolve(Arc::new(())).await.unwrap();
        assert_eq!(resolved["configuration"], json!({ "ready": true }));
        assert_eq!(resolved["unrelated"], json!("unrelated"));

        let deps = seen.lock().unwrap().clone();
        assert_eq!(deps.keys().collect::<Vec<_>>(), vec!["key", "settings"]);

        let events = trace.lock().unwrap().clone();
        let at = |e: &str| events.iter().position(|x| x == e).unwrap();
        assert!(at("end:settings") < at("run:configuration"));
        assert!(at("end:key") < at("run:configuration"));
        assert!(at("run:configuration") < at("end:unrelated"));
    }

    #[tokio::test]
    async fn unknown_dependency_fails_before_any_loader_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = LoaderRegistry::new()
            .with(LoaderSpec::new("children", move |_: Arc<()>, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!([]))
                }
            }))
            .unwrap()
            .with(
                LoaderSpec::new("submission", |_, _| async { Ok(json!(null)) })
                    .after(["settings"]),
            )
            .unwrap();

        let err = DependencyResolver::new(registry).unwrap_err();
        assert!(matches!(err, CoreError::UnknownDependency { .. }));
        assert!(err.is_configuration());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cycle_rejected_at_construction() {
        let registry = LoaderRegistry::<()>::new()
            .with(LoaderSpec::new("a", |_, _| async { Ok(json!(1)) }).after(["b"]))
            .unwrap()
            .with(LoaderSpec::new("b", |_, _| async { Ok(json!(2)) }).after(["a"]))
            .unwrap();

        assert!(matches!(
            DependencyResolver::new(registry),
            Err(CoreError::CyclicDependency { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_wins_and_dependents_never_start() {
        let trace = Trace::default();
        let dependent_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dependent_calls);

        let registry = LoaderRegistry::new()
            .with(LoaderSpec::new("broken", |_, _| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(CoreError::not_found("assignment", "a-1"))
            }))
            .unwrap()
            .with(LoaderSpec::new("later", |_, _| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(CoreError::Executor("second".to_string()))
            }))
            .unwrap()
            .with(sleeper("slow", 100, Arc::clone(&trace)))
            .unwrap()
            .with(
                LoaderSpec::new("dependent", move |_, _| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                })
                .after(["slow"]),
            )
            .unwrap();
        let resolver = DependencyResolver::new(registry).unwrap();

        let err = resolver.resolve(Arc::new(())).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        // the in-flight loader was drained, not abandoned
        assert!(trace.lock().unwrap().contains(&"end:slow".to_string()));
        assert_eq!(dependent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_registry_resolves_to_empty_map() {
        let resolver = DependencyResolver::<()>::new(LoaderRegistry::new()).unwrap();
        assert!(resolver.resolve(Arc::new(())).await.unwrap().is_empty());
    }
}
