use super::traits::{Graph, InferenceEngine, SessionOptions};
use crate::core::{Error, Result};
use std::path::Path;

/// Every graph a caption model is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphRole {
    VisionEncoder,
    VisionProjection,
    TextEncoder,
    TextDecoder,
}

impl GraphRole {
    pub const ALL: [GraphRole; 4] = [
        GraphRole::VisionEncoder,
        GraphRole::VisionProjection,
        GraphRole::TextEncoder,
        GraphRole::TextDecoder,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            GraphRole::VisionEncoder => "vision_encoder.onnx",
            GraphRole::VisionProjection => "vision_projection.onnx",
            GraphRole::TextEncoder => "text_encoder.onnx",
            GraphRole::TextDecoder => "text_decoder.onnx",
        }
    }
}

/// One loaded graph per [`GraphRole`]. Immutable once built.
pub struct Sessions {
    vision_encoder: Box<dyn Graph>,
    vision_projection: Box<dyn Graph>,
    text_encoder: Box<dyn Graph>,
    text_decoder: Box<dyn Graph>,
}

impl Sessions {
    pub fn new(mut load: impl FnMut(GraphRole) -> Result<Box<dyn Graph>>) -> Result<Self> {
        Ok(Self {
            vision_encoder: load(GraphRole::VisionEncoder)?,
            vision_projection: load(GraphRole::VisionProjection)?,
            text_encoder: load(GraphRole::TextEncoder)?,
            text_decoder: load(GraphRole::TextDecoder)?,
        })
    }

    /// Loads every role's graph file from `dir`.
    pub fn load(engine: &dyn InferenceEngine, dir: &Path, options: &SessionOptions) -> Result<Self> {
        Self::new(|role| {
            let path = dir.join(role.file_name());
            if !path.exists() {
                return Err(Error::asset(
                    role.file_name(),
                    format!("missing from {}", dir.display()),
                ));
            }
            tracing::debug!("loading {:?} graph from {}", role, path.display());
            engine.load(&path, options).map_err(Error::Engine)
        })
    }

    pub fn graph(&self, role: GraphRole) -> &dyn Graph {
        match role {
            GraphRole::VisionEncoder => self.vision_encoder.as_ref(),
            GraphRole::VisionProjection => self.vision_projection.as_ref(),
            GraphRole::TextEncoder => self.text_encoder.as_ref(),
            GraphRole::TextDecoder => self.text_decoder.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::TensorMap;
    use std::collections::HashSet;

    struct Named(&'static str);

    impl Graph for Named {
        fn run(&self, _inputs: &TensorMap) -> anyhow::Result<TensorMap> {
            anyhow::bail!("{}", self.0)
        }
    }

    #[test]
    fn test_file_names_are_distinct() {
        let names: HashSet<_> = GraphRole::ALL.iter().map(|r| r.file_name()).collect();
        assert_eq!(names.len(), GraphRole::ALL.len());
    }

    #[test]
    fn test_sessions_route_by_role() {
        let sessions = Sessions::new(|role| {
            Ok(Box::new(Named(role.file_name())) as Box<dyn Graph>)
        })
        .unwrap();
        for role in GraphRole::ALL {
            let err = sessions.graph(role).run(&TensorMap::new()).unwrap_err();
            assert_eq!(err.to_string(), role.file_name());
        }
    }

    #[test]
    fn test_load_reports_missing_graph() {
        let dir = tempfile::tempdir().unwrap();
        let engine = |_: &Path, _: &SessionOptions| -> anyhow::Result<Box<dyn Graph>> {
            Ok(Box::new(Named("unused")))
        };
        let err = Sessions::load(&engine, dir.path(), &SessionOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Asset { .. }));
    }
}
