//! Name-based lookup of symplectic composition schemes
//!
//! Schemes are self-describing: each reports its canonical name, aliases and order.
//! The registry indexes instances by every name they answer to and hands out fresh
//! boxed copies, so a configuration file can pick the regularized engine's scheme by
//! string.

use super::SymplecticScheme;
use crate::error::{HardError, HardResult};
use std::collections::{BTreeSet, HashMap};

pub struct SchemeRegistry {
    /// Maps names (canonical and aliases) to scheme instances
    schemes: HashMap<String, Box<dyn SymplecticScheme>>,
}

impl SchemeRegistry {
    /// Create an empty registry without any pre-registered schemes.
    pub fn new() -> Self {
        Self {
            schemes: HashMap::new(),
        }
    }

    /// Register the built-in schemes. Returns self for method chaining.
    pub fn with_standard_schemes(mut self) -> Self {
        use super::{Leapfrog, Pefrl};

        self.register(Box::new(Leapfrog));
        self.register(Box::new(Pefrl));

        self
    }

    pub fn with_scheme(mut self, scheme: Box<dyn SymplecticScheme>) -> Self {
        self.register(scheme);
        self
    }

    pub fn register(&mut self, scheme: Box<dyn SymplecticScheme>) {
        for alias in scheme.aliases() {
            self.schemes.insert(alias.to_string(), scheme.clone_box());
        }
        self.schemes.insert(scheme.name().to_string(), scheme);
    }

    pub fn create(&self, name: &str) -> HardResult<Box<dyn SymplecticScheme>> {
        self.schemes
            .get(name)
            .map(|scheme| scheme.clone_box())
            .ok_or_else(|| {
                let alias_names: Vec<String> =
                    self.list_aliases().into_iter().map(|(alias, _)| alias).collect();
                HardError::UnknownScheme(format!(
                    "'{}'. Available schemes: {}. Aliases: {}",
                    name,
                    self.list_available().join(", "),
                    alias_names.join(", ")
                ))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemes.contains_key(name)
    }

    /// Sorted canonical names
    pub fn list_available(&self) -> Vec<String> {
        self.schemes
            .values()
            .map(|scheme| scheme.name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorted `(alias, canonical name)` pairs
    pub fn list_aliases(&self) -> Vec<(String, String)> {
        let mut aliases: Vec<(String, String)> = self
            .schemes
            .iter()
            .filter(|(key, scheme)| key.as_str() != scheme.name())
            .map(|(key, scheme)| (key.clone(), scheme.name().to_string()))
            .collect();

        aliases.sort();
        aliases
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::new().with_standard_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::integrators::SplitSystem;
    use crate::physics::math::Scalar;

    #[derive(Debug, Clone)]
    struct TestSchemeA;

    impl SymplecticScheme for TestSchemeA {
        fn clone_box(&self) -> Box<dyn SymplecticScheme> {
            Box::new(self.clone())
        }

        fn step(&self, _: &mut dyn SplitSystem, _: Scalar) {}

        fn convergence_order(&self) -> usize {
            2
        }

        fn name(&self) -> &'static str {
            "test_a"
        }

        fn aliases(&self) -> Vec<&'static str> {
            vec!["ta", "test_alias_a"]
        }
    }

    #[derive(Debug, Clone)]
    struct TestSchemeNoAlias;

    impl SymplecticScheme for TestSchemeNoAlias {
        fn clone_box(&self) -> Box<dyn SymplecticScheme> {
            Box::new(self.clone())
        }

        fn step(&self, _: &mut dyn SplitSystem, _: Scalar) {}

        fn convergence_order(&self) -> usize {
            1
        }

        fn name(&self) -> &'static str {
            "no_alias"
        }
    }

    #[test]
    fn test_standard_schemes_resolve() {
        let registry = SchemeRegistry::default();
        assert_eq!(registry.list_available(), vec!["leapfrog", "pefrl"]);
        assert_eq!(registry.create("leapfrog").unwrap().convergence_order(), 2);
        assert_eq!(registry.create("pefrl").unwrap().convergence_order(), 4);
    }

    #[test]
    fn test_alias_resolution() {
        let registry = SchemeRegistry::new().with_scheme(Box::new(TestSchemeA));

        for name in ["test_a", "ta", "test_alias_a"] {
            assert_eq!(registry.create(name).unwrap().name(), "test_a");
        }

        let aliases = registry.list_aliases();
        assert_eq!(
            aliases,
            vec![
                ("ta".to_string(), "test_a".to_string()),
                ("test_alias_a".to_string(), "test_a".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_scheme_error() {
        let registry = SchemeRegistry::default();

        match registry.create("nonexistent") {
            Err(HardError::UnknownScheme(message)) => {
                assert!(message.contains("nonexistent"));
                assert!(message.contains("leapfrog"));
                assert!(message.contains("pefrl"));
            }
            other => panic!("Expected UnknownScheme, got {other:?}"),
        }
    }

    #[test]
    fn test_no_aliases_scheme() {
        let registry = SchemeRegistry::new().with_scheme(Box::new(TestSchemeNoAlias));
        assert!(registry.contains("no_alias"));
        assert!(registry.list_aliases().is_empty());
    }

    #[test]
    fn test_case_sensitivity() {
        let registry = SchemeRegistry::default();
        assert!(registry.create("Leapfrog").is_err());
        assert!(registry.create("PEFRL").is_err());
        assert!(registry.create("fr4").is_ok());
    }

    #[test]
    fn test_empty_registry() {
        let registry = SchemeRegistry::new();
        assert!(registry.list_available().is_empty());
        assert!(registry.create("leapfrog").is_err());
    }
}
