use crate::core::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Named graph inputs or outputs.
pub type TensorMap = HashMap<String, Tensor>;

/// A loaded computational graph. Implementations wrap whatever runtime
/// actually executes the network; a call may block for the whole forward
/// pass.
pub trait Graph: Send + Sync {
    fn run(&self, inputs: &TensorMap) -> anyhow::Result<TensorMap>;
}

/// Loads graphs from storage.
pub trait InferenceEngine {
    fn load(&self, path: &Path, options: &SessionOptions) -> anyhow::Result<Box<dyn Graph>>;
}

impl<F> InferenceEngine for F
where
    F: Fn(&Path, &SessionOptions) -> anyhow::Result<Box<dyn Graph>>,
{
    fn load(&self, path: &Path, options: &SessionOptions) -> anyhow::Result<Box<dyn Graph>> {
        self(path, options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphOptimizationLevel {
    Disabled,
    Basic,
    Extended,
    #[default]
    All,
}

/// Runtime options handed to the engine untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub execution_providers: Vec<String>,
    pub optimization_level: GraphOptimizationLevel,
    pub log_severity: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            execution_providers: vec!["xnnpack".to_string()],
            optimization_level: GraphOptimizationLevel::All,
            log_severity: 3,
        }
    }
}

/// Runs `graph` and maps engine failures into [`Error::Engine`].
pub(crate) fn run_graph(graph: &dyn Graph, inputs: TensorMap) -> Result<TensorMap> {
    graph.run(&inputs).map_err(Error::Engine)
}

/// Removes a named output, failing when the graph did not produce it.
pub(crate) fn take_output(outputs: &mut TensorMap, name: &str) -> Result<Tensor> {
    outputs
        .remove(name)
        .ok_or_else(|| Error::Engine(anyhow::anyhow!("graph produced no output named {:?}", name)))
}
