//! Recursive context assembly over the assignment tree.
//!
//! `build` first builds every child concurrently (order preserved), then
//! runs the node's own loaders with the built children as input. Any error
//! anywhere in the subtree fails the whole build.

use std::sync::Arc;

use coursework_state::{AssignmentId, AssignmentRecord, Principal, Store};
use futures::future::{try_join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info_span, Instrument};

use crate::error::{CoreError, CoreResult};
use crate::loader::{DependencyResolver, Resolved};
use crate::metrics::METRICS;
use crate::obs;

/// Resolved loader values for one node plus the acting principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub assignment_id: AssignmentId,
    pub key: String,
    pub title: String,
    pub principal: Option<Principal>,
    pub values: Resolved,
}

impl Context {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The built child contexts, if a `children` loader ran.
    pub fn children(&self) -> CoreResult<Vec<Context>> {
        match self.values.get("children") {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(Vec::new()),
        }
    }
}

/// Input handed to every loader for one node.
#[derive(Debug, Clone)]
pub struct LoadInput {
    pub node: AssignmentRecord,
    pub principal: Option<Principal>,
    pub children: Vec<Context>,
}

#[derive(Clone)]
pub struct ContextBuilder {
    store: Arc<dyn Store>,
    resolver: Arc<DependencyResolver<LoadInput>>,
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn Store>, resolver: DependencyResolver<LoadInput>) -> Self {
        Self {
            store,
            resolver: Arc::new(resolver),
        }
    }

    /// Root assignments, earliest start first.
    pub async fn roots(&self) -> CoreResult<Vec<AssignmentRecord>> {
        Ok(self.store.list_root_assignments().await?)
    }

    pub fn build(
        &self,
        node: AssignmentRecord,
        principal: Option<Principal>,
    ) -> BoxFuture<'_, CoreResult<Context>> {
        let span = info_span!(
            "context.build",
            assignment_id = %node.assignment_id,
            key = %node.key
        );
        Box::pin(
            async move {
                let children = self.store.children_of(&node).await?;
                let children = try_join_all(
                    children
                        .into_iter()
                        .map(|child| self.build(child, principal.clone())),
                )
                .await?;

                let input = Arc::new(LoadInput {
                    node,
                    principal,
                    children,
                });
                let values = self.resolver.resolve(Arc::clone(&input)).await?;

                METRICS.inc_contexts_built();
                obs::emit_context_built(
                    input.node.assignment_id.as_str(),
                    values.len(),
                    input.children.len(),
                );
                Ok(Context {
                    assignment_id: input.node.assignment_id.clone(),
                    key: input.node.key.clone(),
                    title: input.node.title.clone(),
                    principal: input.principal.clone(),
                    values,
                })
            }
            .instrument(span),
        )
    }

    pub async fn build_by_id(
        &self,
        id: &AssignmentId,
        principal: Option<Principal>,
    ) -> CoreResult<Context> {
        let node = self.store.get_assignment(id).await?;
        self.build(node, principal).await
    }

    /// Build the root assignment with the given key.
    pub async fn build_for_key(
        &self,
        key: &str,
        principal: Option<Principal>,
    ) -> CoreResult<Context> {
        let node = self
            .store
            .find_root_assignment(key)
            .await?
            .ok_or_else(|| CoreError::not_found("assignment", key))?;
        self.build(node, principal).await
    }
}
