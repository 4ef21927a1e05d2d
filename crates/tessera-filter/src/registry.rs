//! Name → factory registry of filters

use std::collections::BTreeMap;

use serde_json::Value;
use tessera_stack::{StackError, StackResult};

use crate::{ClipPercentile, FilterAlgorithm, MatchHistograms};

/// Builds a filter from its JSON parameters
pub type FilterFactory = fn(&Value) -> StackResult<Box<dyn FilterAlgorithm>>;

/// Explicitly populated filter registry
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    factories: BTreeMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// Registry without any filters
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in filters
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, FilterFactory); 2] = [
            ("MatchHistograms", match_histograms),
            ("ClipPercentile", clip_percentile),
        ];
        for (name, factory) in builtins {
            // names are distinct literals
            let _ = registry.register(name, factory);
        }
        registry
    }

    /// Add a filter under a new name
    pub fn register(&mut self, name: impl Into<String>, factory: FilterFactory) -> StackResult<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(StackError::config(format!(
                "filter {name} is already registered"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a registered filter
    pub fn create(&self, name: &str, params: &Value) -> StackResult<Box<dyn FilterAlgorithm>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            StackError::config(format!(
                "unknown filter {name}, expected one of {:?}",
                self.names()
            ))
        })?;
        factory(params)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

fn match_histograms(params: &Value) -> StackResult<Box<dyn FilterAlgorithm>> {
    Ok(Box::new(MatchHistograms::from_params(params)?))
}

fn clip_percentile(params: &Value) -> StackResult<Box<dyn FilterAlgorithm>> {
    Ok(Box::new(ClipPercentile::from_params(params)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_names() {
        let registry = FilterRegistry::builtin();
        assert_eq!(registry.names(), vec!["ClipPercentile", "MatchHistograms"]);
        assert!(registry.contains("MatchHistograms"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = FilterRegistry::builtin();
        let result = registry.register("ClipPercentile", clip_percentile);
        assert!(matches!(result, Err(StackError::Config(_))));
    }

    #[test]
    fn test_create() {
        let registry = FilterRegistry::builtin();
        let filter = registry
            .create("ClipPercentile", &json!({"p_min": 5, "p_max": 95}))
            .unwrap();
        assert_eq!(filter.method_name(), "ClipPercentile");
        assert!(registry.create("Gaussian", &json!({})).is_err());
        assert!(registry.create("MatchHistograms", &json!({})).is_err());
    }
}
