//! Configuration registry for exported resource identifiers.
//!
//! Each provisioned resource publishes its durable name or ARN under a
//! namespaced path (see [`crate::naming::parameter_path`]). Consumers read
//! identifiers from here instead of recomputing them.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::{global_name, parameter_path, Context};

/// A stored registry value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Full registry path.
    pub path: String,
    /// Stored value.
    pub value: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Key/value registry keyed by namespaced path.
pub trait ParameterRegistry: Send + Sync {
    /// Stores a parameter, replacing any previous value at the same path.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be written.
    fn put(&self, parameter: Parameter) -> Result<()>;

    /// Reads a parameter.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no parameter exists at `path`.
    fn get(&self, path: &str) -> Result<Parameter>;

    /// Lists parameters whose path starts with `prefix`, ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn list(&self, prefix: &str) -> Result<Vec<Parameter>>;
}

/// In-process registry.
#[derive(Debug, Default)]
pub struct MemoryParameterRegistry {
    parameters: RwLock<BTreeMap<String, Parameter>>,
}

impl MemoryParameterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParameterRegistry for MemoryParameterRegistry {
    fn put(&self, parameter: Parameter) -> Result<()> {
        if !parameter.path.starts_with('/') {
            return Err(Error::InvalidInput(format!(
                "parameter path must start with '/': {}",
                parameter.path
            )));
        }
        self.parameters
            .write()
            .map_err(|_| Error::internal("registry lock poisoned"))?
            .insert(parameter.path.clone(), parameter);
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Parameter> {
        self.parameters
            .read()
            .map_err(|_| Error::internal("registry lock poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("parameter", path))
    }

    fn list(&self, prefix: &str) -> Result<Vec<Parameter>> {
        Ok(self
            .parameters
            .read()
            .map_err(|_| Error::internal("registry lock poisoned"))?
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect())
    }
}

/// A value one stack exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    /// Logical identifier within the stack.
    pub id: String,
    /// Registry key (last path segment).
    pub key: String,
    /// Exported value.
    pub value: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Stack that groups the key, if any.
    pub stack: Option<String>,
    /// Also export under a global name.
    pub export: bool,
}

impl StackOutput {
    /// Registry path for this output.
    #[must_use]
    pub fn path(&self, ctx: &Context) -> String {
        parameter_path(ctx, self.stack.as_deref(), &self.key)
    }

    /// Global export name, when exported.
    #[must_use]
    pub fn export_name(&self, ctx: &Context) -> Option<String> {
        self.export.then(|| global_name(ctx, &self.key))
    }
}

/// Publishes outputs to the registry, returning the paths written.
///
/// # Errors
///
/// Returns the first registry error.
pub fn publish_outputs(
    registry: &dyn ParameterRegistry,
    ctx: &Context,
    outputs: &[StackOutput],
) -> Result<Vec<String>> {
    let mut written = Vec::with_capacity(outputs.len());
    for output in outputs {
        let path = output.path(ctx);
        registry.put(Parameter {
            path: path.clone(),
            value: output.value.clone(),
            description: output.description.clone(),
        })?;
        tracing::debug!(%path, export = ?output.export_name(ctx), "published registry parameter");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context {
            app_prefix: "strata".into(),
            tag_prefix: "strata".into(),
            stage: "dev".into(),
            region: "eu-west-1".into(),
            account: "1".into(),
            multi_region: false,
        }
    }

    #[test]
    fn published_outputs_are_listed_by_prefix() {
        let registry = MemoryParameterRegistry::new();
        let outputs = vec![
            StackOutput {
                id: "LandingName".into(),
                key: "landing-bucket-name".into(),
                value: "strata-dev-raw-data".into(),
                description: Some("Landing bucket".into()),
                stack: Some("ingest".into()),
                export: true,
            },
            StackOutput {
                id: "Workgroup".into(),
                key: "query-workgroup-name".into(),
                value: "strata-dev-query-workgroup".into(),
                description: None,
                stack: None,
                export: false,
            },
        ];
        let paths = publish_outputs(&registry, &ctx(), &outputs).expect("publish");
        assert_eq!(
            paths,
            vec![
                "/strata/dev/ingest/landing-bucket-name",
                "/strata/dev/query-workgroup-name"
            ]
        );

        let ingest = registry.list("/strata/dev/ingest/").expect("list");
        assert_eq!(ingest.len(), 1);
        assert_eq!(ingest[0].value, "strata-dev-raw-data");
        assert_eq!(registry.list("/strata/dev/").expect("list").len(), 2);
        assert_eq!(
            outputs[0].export_name(&ctx()).as_deref(),
            Some("strata-dev-landing-bucket-name")
        );
        assert!(outputs[1].export_name(&ctx()).is_none());
    }

    #[test]
    fn missing_and_malformed_paths() {
        let registry = MemoryParameterRegistry::new();
        assert!(registry.get("/nope").expect_err("missing").is_not_found());
        assert!(registry
            .put(Parameter {
                path: "relative".into(),
                value: "v".into(),
                description: None,
            })
            .is_err());
    }
}
