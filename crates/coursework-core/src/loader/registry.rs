//! Loader specifications and the registry that validates them.
//!
//! A [`LoaderSpec`] names the key it contributes, the keys it depends on,
//! and an async function producing its value. The registry keeps specs in
//! registration order and validates the dependency graph up front: unknown
//! dependencies and cycles are reported before any loader runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Values produced so far in one invocation, keyed by loader key.
pub type Resolved = BTreeMap<String, Value>;

type LoaderFn<I> =
    Arc<dyn Fn(Arc<I>, Resolved) -> BoxFuture<'static, CoreResult<Value>> + Send + Sync>;

/// One named loader.
///
/// `run` receives the shared invocation input and exactly the resolved
/// values of its declared dependencies.
pub struct LoaderSpec<I> {
    key: String,
    dependencies: BTreeSet<String>,
    run: LoaderFn<I>,
}

impl<I> LoaderSpec<I>
where
    I: Send + Sync + 'static,
{
    pub fn new<F, Fut>(key: impl Into<String>, run: F) -> Self
    where
        F: Fn(Arc<I>, Resolved) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Value>> + Send + 'static,
    {
        Self {
            key: key.into(),
            dependencies: BTreeSet::new(),
            run: Arc::new(move |input, deps| Box::pin(run(input, deps))),
        }
    }

    /// Declare keys that must be resolved before this loader runs.
    pub fn after<K: Into<String>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.dependencies.extend(keys.into_iter().map(Into::into));
        self
    }
}

impl<I> LoaderSpec<I> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub(crate) fn invoke(
        &self,
        input: Arc<I>,
        deps: Resolved,
    ) -> BoxFuture<'static, CoreResult<Value>> {
        (self.run)(input, deps)
    }
}

impl<I> Clone for LoaderSpec<I> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            dependencies: self.dependencies.clone(),
            run: Arc::clone(&self.run),
        }
    }
}

impl<I> std::fmt::Debug for LoaderSpec<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderSpec")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Ordered set of loaders with unique keys.
pub struct LoaderRegistry<I> {
    specs: Vec<LoaderSpec<I>>,
}

impl<I> Default for LoaderRegistry<I> {
    fn default() -> Self {
        Self { specs: Vec::new() }
    }
}

impl<I> Clone for LoaderRegistry<I> {
    fn clone(&self) -> Self {
        Self {
            specs: self.specs.clone(),
        }
    }
}

impl<I> std::fmt::Debug for LoaderRegistry<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.specs.iter()).finish()
    }
}

impl<I> LoaderRegistry<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loader. Keys must be unique.
    pub fn register(&mut self, spec: LoaderSpec<I>) -> CoreResult<()> {
        if self.get(spec.key()).is_some() {
            return Err(CoreError::DuplicateLoader {
                key: spec.key().to_string(),
            });
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, spec: LoaderSpec<I>) -> CoreResult<Self> {
        self.register(spec)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&LoaderSpec<I>> {
        self.specs.iter().find(|s| s.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.key.as_str())
    }

    pub fn specs(&self) -> &[LoaderSpec<I>] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Check the dependency graph and return the keys in a topological order.
    ///
    /// Unknown dependencies are reported first (in registration order), then
    /// cycles. Ties keep registration order.
    pub fn validate(&self) -> CoreResult<Vec<String>> {
        for spec in &self.specs {
            if let Some(missing) = spec
                .dependencies
                .iter()
                .find(|dep| self.get(dep).is_none())
            {
                return Err(CoreError::UnknownDependency {
                    loader: spec.key.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        // Kahn's algorithm over registration order.
        let mut in_degree: HashMap<&str, usize> = self
            .specs
            .iter()
            .map(|s| (s.key.as_str(), s.dependencies.len()))
            .collect();
        let mut queue: VecDeque<&str> = self
            .specs
            .iter()
            .filter(|s| s.dependencies.is_empty())
            .map(|s| s.key.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.specs.len());

        while let Some(key) = queue.pop_front() {
            order.push(key.to_string());
            for dependent in self.specs.iter().filter(|s| s.dependencies.contains(key)) {
                if let Some(deg) = in_degree.get_mut(dependent.key.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent.key.as_str());
                    }
                }
            }
        }

        if order.len() != self.specs.len() {
            let keys = self
                .specs
                .iter()
                .filter(|s| !order.contains(&s.key))
                .map(|s| s.key.clone())
                .collect();
            return Err(CoreError::CyclicDependency { keys });
        }

        Ok(order)
    }
}
