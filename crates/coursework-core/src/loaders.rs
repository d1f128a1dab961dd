//! The standard loader set for assignment contexts.
//!
//! | key           | depends on | value                                              |
//! |---------------|------------|----------------------------------------------------|
//! | `children`    |            | built child contexts, in child order               |
//! | `properties`  |            | node properties with `inherit` resolved            |
//! | `evaluation`  |            | evaluation settings or `null`                      |
//! | `boilerplate` |            | boilerplate with its repository populated, or `null` |
//! | `submission`  |            | nested: `settings`, `submissions`, `key`, `configuration` |
//!
//! Stores and the provisioner are captured by the loader closures; nothing
//! is looked up from a global registry.

use std::sync::Arc;

use coursework_state::{Store, SubmissionSettings};
use serde_json::{json, Value};

use crate::config::LoaderConfig;
use crate::context::{ContextBuilder, LoadInput};
use crate::error::CoreResult;
use crate::inherit;
use crate::loader::{DependencyResolver, LoaderRegistry, LoaderSpec};
use crate::provision::ResourceProvisioner;

pub fn children_loader() -> LoaderSpec<LoadInput> {
    LoaderSpec::new("children", |input: Arc<LoadInput>, _| async move {
        Ok(serde_json::to_value(&input.children)?)
    })
}

pub fn properties_loader(store: Arc<dyn Store>) -> LoaderSpec<LoadInput> {
    LoaderSpec::new("properties", move |input: Arc<LoadInput>, _| {
        let store = Arc::clone(&store);
        async move {
            let properties = inherit::resolve_all(store.as_ref(), &input.node).await?;
            Ok(serde_json::to_value(properties)?)
        }
    })
}

pub fn evaluation_loader(store: Arc<dyn Store>) -> LoaderSpec<LoadInput> {
    LoaderSpec::new("evaluation", move |input: Arc<LoadInput>, _| {
        let store = Arc::clone(&store);
        async move {
            let settings = store.evaluation_settings(&input.node.assignment_id).await?;
            Ok(serde_json::to_value(settings)?)
        }
    })
}

pub fn boilerplate_loader(store: Arc<dyn Store>) -> LoaderSpec<LoadInput> {
    LoaderSpec::new("boilerplate", move |input: Arc<LoadInput>, _| {
        let store = Arc::clone(&store);
        async move {
            let Some(boilerplate) = store.boilerplate(&input.node.assignment_id).await? else {
                return Ok(Value::Null);
            };
            let repository = match &boilerplate.repository_id {
                Some(id) => Some(store.get_repository(id).await?),
                None => None,
            };
            Ok(json!({
                "description": boilerplate.description,
                "repository": repository,
            }))
        }
    })
}

/// Sub-loaders resolved inside the `submission` loader.
pub fn submission_registry(
    store: Arc<dyn Store>,
    provisioner: ResourceProvisioner,
    config: &LoaderConfig,
) -> CoreResult<LoaderRegistry<LoadInput>> {
    let settings_store = Arc::clone(&store);
    let settings = LoaderSpec::new("settings", move |input: Arc<LoadInput>, _| {
        let store = Arc::clone(&settings_store);
        async move {
            let settings = store.submission_settings(&input.node.assignment_id).await?;
            Ok(serde_json::to_value(settings)?)
        }
    });

    let limit = config.recent_submissions;
    let submissions = LoaderSpec::new("submissions", move |input: Arc<LoadInput>, _| {
        let store = Arc::clone(&store);
        async move {
            let Some(principal) = &input.principal else {
                return Ok(json!([]));
            };
            let recent = store
                .recent_submissions(&input.node.assignment_id, principal, limit)
                .await?;
            Ok(serde_json::to_value(recent)?)
        }
    });

    let context = config.access_key_context.clone();
    let key_provisioner = provisioner.clone();
    let key = LoaderSpec::new("key", move |input: Arc<LoadInput>, _| {
        let provisioner = key_provisioner.clone();
        let context = context.clone();
        async move {
            let Some(principal) = &input.principal else {
                return Ok(Value::Null);
            };
            let key = provisioner.access_key(principal, &context).await?;
            Ok(serde_json::to_value(key)?)
        }
    });

    let configuration = LoaderSpec::new("configuration", move |input: Arc<LoadInput>, deps| {
        let provisioner = provisioner.clone();
        async move {
            let settings: Option<SubmissionSettings> = match deps.get("settings") {
                Some(value) => serde_json::from_value(value.clone())?,
                None => None,
            };
            let has_key = deps.get("key").is_some_and(|k| !k.is_null());
            if !has_key {
                return Ok(Value::Null);
            }
            let configuration = provisioner
                .configure(
                    &input.node.assignment_id,
                    input.principal.as_ref(),
                    settings.as_ref(),
                )
                .await?;
            Ok(serde_json::to_value(configuration)?)
        }
    })
    .after(["settings", "key"]);

    LoaderRegistry::new()
        .with(settings)?
        .with(submissions)?
        .with(key)?
        .with(configuration)
}

pub fn submission_loader(resolver: DependencyResolver<LoadInput>) -> LoaderSpec<LoadInput> {
    let resolver = Arc::new(resolver);
    LoaderSpec::new("submission", move |input: Arc<LoadInput>, _| {
        let resolver = Arc::clone(&resolver);
        async move {
            let values = resolver.resolve(input).await?;
            Ok(serde_json::to_value(values)?)
        }
    })
}

/// The full top-level registry.
pub fn standard_registry(
    store: Arc<dyn Store>,
    config: &LoaderConfig,
) -> CoreResult<LoaderRegistry<LoadInput>> {
    let provisioner = ResourceProvisioner::new(Arc::clone(&store));
    let nested =
        DependencyResolver::new(submission_registry(Arc::clone(&store), provisioner, config)?)?;

    LoaderRegistry::new()
        .with(children_loader())?
        .with(properties_loader(Arc::clone(&store)))?
        .with(evaluation_loader(Arc::clone(&store)))?
        .with(boilerplate_loader(Arc::clone(&store)))?
        .with(submission_loader(nested))
}

impl ContextBuilder {
    /// Builder wired with [`standard_registry`].
    pub fn standard(store: Arc<dyn Store>, config: &LoaderConfig) -> CoreResult<Self> {
        let resolver = DependencyResolver::new(standard_registry(Arc::clone(&store), config)?)?;
        Ok(ContextBuilder::new(store, resolver))
    }
}
