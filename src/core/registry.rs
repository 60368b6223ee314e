/// Framework registry
///
/// Read-only name → ports lookup, built once at start-up from the static table.

use crate::core::error::{BackupError, Result};
use crate::utils::{Framework, ALL_FRAMEWORKS, FRAMEWORKS};

#[derive(Debug, Clone)]
pub struct FrameworkRegistry {
    frameworks: &'static [Framework],
}

impl Default for FrameworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self {
            frameworks: FRAMEWORKS,
        }
    }

    pub fn frameworks(&self) -> &[Framework] {
        self.frameworks
    }

    /// Look up one framework by name
    pub fn resolve(&self, name: &str) -> Result<&Framework> {
        self.frameworks
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| self.unknown(name))
    }

    /// Expand a CLI selector into frameworks: a single name, `all`, or nothing (= all)
    pub fn select(&self, selector: Option<&str>) -> Result<Vec<&Framework>> {
        match selector {
            None | Some(ALL_FRAMEWORKS) => Ok(self.frameworks.iter().collect()),
            Some(name) => Ok(vec![self.resolve(name)?]),
        }
    }

    fn unknown(&self, name: &str) -> BackupError {
        let mut valid: Vec<&str> = self.frameworks.iter().map(|f| f.name).collect();
        valid.push(ALL_FRAMEWORKS);
        BackupError::UnknownFramework {
            name: name.to_string(),
            valid: valid.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_framework() {
        let registry = FrameworkRegistry::new();
        let dspy = registry.resolve("dspy").unwrap();
        assert_eq!(dspy.postgres_port, 5433);
        assert_eq!(dspy.qdrant_port, 6334);
        assert_eq!(registry.resolve("pydantic_ai").unwrap().qdrant_port, 6337);
    }

    #[test]
    fn test_unknown_framework_names_valid_set() {
        let registry = FrameworkRegistry::new();
        let err = registry.resolve("langchain").unwrap_err();
        let message = err.to_string();

        assert!(err.is_environment());
        assert!(message.contains("'langchain'"));
        for name in ["crewai", "dspy", "pocketflow", "google_adk", "pydantic_ai", "all"] {
            assert!(message.contains(name), "missing {} in {}", name, message);
        }
    }

    #[test]
    fn test_select_all_keeps_registry_order() {
        let registry = FrameworkRegistry::new();
        let names: Vec<_> = registry.select(Some("all")).unwrap().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["crewai", "dspy", "pocketflow", "google_adk", "pydantic_ai"]);
        assert_eq!(registry.select(None).unwrap().len(), 5);
    }

    #[test]
    fn test_select_single_and_unknown() {
        let registry = FrameworkRegistry::new();
        assert_eq!(registry.select(Some("crewai")).unwrap().len(), 1);
        assert!(registry.select(Some("autogen")).is_err());
    }
}
