// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow loading.
//!
//! Workers load workflow code by module path and workflow name each time they
//! are spawned. [`WorkflowRegistry`] is the in-process loader: modules are
//! registered up front under their artifact path, and a resolved module path
//! matches a registered module when it equals it or ends with it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::LoadError;
use crate::workflow::Workflow;

/// Loads workflow code for a worker.
pub trait WorkflowLoader: Send + Sync {
    /// Load `workflow_name` from the module at `module_path`.
    fn load(&self, module_path: &str, workflow_name: &str) -> Result<Arc<dyn Workflow>, LoadError>;
}

/// In-process workflow modules keyed by module path.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    modules: HashMap<String, HashMap<String, Arc<dyn Workflow>>>,
}

impl WorkflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `workflow` as `workflow_name` inside `module`.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        workflow_name: impl Into<String>,
        workflow: Arc<dyn Workflow>,
    ) -> &mut Self {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(workflow_name.into(), workflow);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_workflow(
        mut self,
        module: impl Into<String>,
        workflow_name: impl Into<String>,
        workflow: Arc<dyn Workflow>,
    ) -> Self {
        self.register(module, workflow_name, workflow);
        self
    }

    /// Registered module paths.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Names of the workflows registered in `module`, sorted.
    pub fn workflow_names(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .get(module)
            .map(|workflows| workflows.keys().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    fn find_module(&self, module_path: &str) -> Option<&HashMap<String, Arc<dyn Workflow>>> {
        if let Some(module) = self.modules.get(module_path) {
            return Some(module);
        }
        let path = Path::new(module_path);
        self.modules
            .iter()
            .find(|(key, _)| path.ends_with(Path::new(key.as_str())))
            .map(|(_, module)| module)
    }
}

impl WorkflowLoader for WorkflowRegistry {
    fn load(&self, module_path: &str, workflow_name: &str) -> Result<Arc<dyn Workflow>, LoadError> {
        let module = self
            .find_module(module_path)
            .ok_or_else(|| LoadError::ModuleNotFound(module_path.to_string()))?;

        module
            .get(workflow_name)
            .cloned()
            .ok_or_else(|| LoadError::WorkflowNotFound {
                module: module_path.to_string(),
                workflow: workflow_name.to_string(),
            })
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut modules: Vec<_> = self.modules.keys().collect();
        modules.sort();
        f.debug_struct("WorkflowRegistry")
            .field("modules", &modules)
            .finish()
    }
}
