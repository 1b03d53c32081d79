//! Named, reusable pipeline definitions.

use std::collections::HashMap;

use crate::definition::{deep_merge, PipelineDefinition};
use crate::error::FlowError;

/// Recipes may extend recipes up to this depth.
const MAX_RECIPE_DEPTH: usize = 16;

/// Recipe lookup table.
#[derive(Debug, Clone, Default)]
pub struct Recipes {
    by_name: HashMap<String, PipelineDefinition>,
}

impl Recipes {
    /// Indexes named recipes. Unnamed entries are ignored; for duplicate
    /// names the last one wins.
    pub fn new(recipes: Vec<PipelineDefinition>) -> Self {
        let by_name = recipes
            .into_iter()
            .filter_map(|recipe| recipe.name.clone().map(|name| (name, recipe)))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&PipelineDefinition> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Expands the recipe chain of `definition`.
    ///
    /// The local definition is deep-merged over its recipe: objects merge
    /// recursively, local values win and lists are replaced.
    pub fn resolve(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<PipelineDefinition, FlowError> {
        let mut current = definition.clone();
        let mut depth = 0;

        while let Some(recipe_name) = current.recipe.take() {
            depth += 1;
            if depth > MAX_RECIPE_DEPTH {
                return Err(FlowError::config(format!(
                    "recipe '{}' nests deeper than {} levels",
                    recipe_name, MAX_RECIPE_DEPTH
                )));
            }

            let recipe = self
                .get(&recipe_name)
                .ok_or_else(|| FlowError::RecipeNotFound(recipe_name.clone()))?;

            let mut merged = recipe.to_value()?;
            let overlay = current.to_value()?;
            deep_merge(&mut merged, overlay);
            current = PipelineDefinition::from_value(merged)?;
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::JarSpec;
    use serde_json::json;

    fn recipes() -> Recipes {
        let base: PipelineDefinition = serde_json::from_value(json!({
            "name": "people",
            "source": {"jar": "jsonl", "path": "people.jsonl", "sourceUrl": "file:///people"},
            "transforms": [{"jar": "flatten"}]
        }))
        .unwrap();
        let derived: PipelineDefinition = serde_json::from_value(json!({
            "name": "people-logged",
            "recipe": "people",
            "transforms": [{"jar": "flatten"}, {"jar": "log"}]
        }))
        .unwrap();
        let looping = PipelineDefinition::from_recipe("loop", "loop");
        Recipes::new(vec![base, derived, looping])
    }

    #[test]
    fn test_local_values_win() {
        let local: PipelineDefinition = serde_json::from_value(json!({
            "name": "people-2024",
            "recipe": "people",
            "source": {"jar": "jsonl", "path": "people-2024.jsonl"}
        }))
        .unwrap();

        let resolved = recipes().resolve(&local).unwrap();
        assert_eq!(resolved.display_name(), "people-2024");
        assert!(resolved.recipe.is_none());

        let source = resolved.source.unwrap();
        assert_eq!(source.require_str("path").unwrap(), "people-2024.jsonl");
        assert_eq!(source.require_str("sourceUrl").unwrap(), "file:///people");
        assert_eq!(resolved.transforms, vec![JarSpec::new("flatten")]);
    }

    #[test]
    fn test_recipe_of_recipe() {
        let local = PipelineDefinition::from_recipe("mine", "people-logged");
        let resolved = recipes().resolve(&local).unwrap();

        assert_eq!(resolved.display_name(), "mine");
        assert_eq!(resolved.source.unwrap().jar, "jsonl");
        assert_eq!(resolved.transforms.len(), 2);
    }

    #[test]
    fn test_unnamed_local_takes_recipe_name() {
        let local = PipelineDefinition {
            recipe: Some("people".to_string()),
            ..PipelineDefinition::default()
        };
        let resolved = recipes().resolve(&local).unwrap();
        assert_eq!(resolved.display_name(), "people");
    }

    #[test]
    fn test_missing_and_cyclic_recipes() {
        let missing = PipelineDefinition::from_recipe("x", "nope");
        assert!(matches!(
            recipes().resolve(&missing),
            Err(FlowError::RecipeNotFound(name)) if name == "nope"
        ));

        let cyclic = PipelineDefinition::from_recipe("x", "loop");
        let err = recipes().resolve(&cyclic).unwrap_err();
        assert!(err.is_config());
    }
}
