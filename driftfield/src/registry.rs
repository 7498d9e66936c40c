use std::{collections::HashMap, sync::Arc};

use crate::{
    config::FieldConfig,
    errors::{Error, Result},
    flux::VerticalVelocity,
    grid::Grid,
    source::Source,
    variable::{DatasetVariable, Field},
};

/// Builds a field from its configuration.
pub type FieldFactory = fn(&FieldConfig, Arc<dyn Grid>, Arc<dyn Source>) -> Result<Box<dyn Field>>;

/// Maps the `kind` of a field configuration to the factory that builds it.
///
pub struct FieldRegistry {
    factories: HashMap<String, FieldFactory>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry knowing the `"dataset"` and `"vertical_velocity"` kinds
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("dataset", DatasetVariable::from_config);
        registry.register("vertical_velocity", VerticalVelocity::from_config);

        registry
    }

    /// Register `factory` for `kind`, replacing any factory registered before.
    pub fn register(&mut self, kind: impl Into<String>, factory: FieldFactory) {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "field factory registered");
        self.factories.insert(kind, factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Validate `config` and build the field it describes.
    ///
    /// Needs no async runtime. Prefetching picks up whichever runtime the field is later driven on.
    ///
    pub fn build(
        &self,
        config: &FieldConfig,
        grid: Arc<dyn Grid>,
        source: Arc<dyn Source>,
    ) -> Result<Box<dyn Field>> {
        config.validate()?;
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| Error::UnknownKind(config.kind.clone()))?;

        factory(config, grid, source)
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
