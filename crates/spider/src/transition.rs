//! Transition systems: how a model's internal tree becomes SQL.

use crate::grammar::SqlTree;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("tree does not match the {system} grammar: {source}")]
pub struct SurfaceError {
    pub system: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Registry of transition systems, selected by `name` in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum TransitionSystem {
    /// Spider SQL grammar: trees convert to [`SqlTree`] and can be scored.
    #[default]
    Spider,
    /// Generic tree transitions with no surface grammar.
    Tree,
}

impl TransitionSystem {
    pub fn name(self) -> &'static str {
        match self {
            Self::Spider => "spider",
            Self::Tree => "tree",
        }
    }

    /// Whether surface SQL exists, and therefore whether outputs can be scored.
    pub fn has_surface_grammar(self) -> bool {
        matches!(self, Self::Spider)
    }

    /// Convert a model tree into a surface tree. `Ok(None)` when this system
    /// has no surface grammar.
    pub fn to_surface(self, tree: &serde_json::Value) -> Result<Option<SqlTree>, SurfaceError> {
        match self {
            Self::Spider => serde_json::from_value(tree.clone())
                .map(Some)
                .map_err(|source| SurfaceError {
                    system: self.name(),
                    source,
                }),
            Self::Tree => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_tags() {
        let ts: TransitionSystem = serde_json::from_str(r#"{"name":"tree"}"#).unwrap();
        assert_eq!(ts, TransitionSystem::Tree);
        assert!(serde_json::from_str::<TransitionSystem>(r#"{"name":"lambda"}"#).is_err());
        assert_eq!(TransitionSystem::default(), TransitionSystem::Spider);
    }

    #[test]
    fn test_to_surface() {
        let tree = serde_json::json!({
            "select": {"items": [{"val": {"kind": "column", "col_id": 0}}]}
        });
        let surface = TransitionSystem::Spider.to_surface(&tree).unwrap();
        assert!(surface.is_some());
        assert!(TransitionSystem::Tree.to_surface(&tree).unwrap().is_none());

        let err = TransitionSystem::Spider
            .to_surface(&serde_json::json!({"select": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("spider grammar"));
    }
}
