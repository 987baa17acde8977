//! Config loading facade: one entry point over the layered sources.

use crate::config::merge::merge_policy;
use crate::config::sources::{environment, global_file, legacy_env};
use crate::config::EvictionConfig;
use crate::error::EvictionError;
use config::File;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the global config file (if any) and the environment.
    pub fn load() -> Result<EvictionConfig, EvictionError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        Self::finish(builder)
    }

    /// Load from an explicit file, skipping the global file. The environment still applies.
    pub fn load_from_file(path: &Path) -> Result<EvictionConfig, EvictionError> {
        if !path.exists() {
            return Err(EvictionError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let builder = merge_policy::builder_with_defaults()?.add_source(File::from(path));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<EvictionConfig, EvictionError> {
        let builder = environment::add_to_builder(builder)?;
        let builder = legacy_env::add_to_builder(builder)?;
        Ok(builder.build()?.try_deserialize()?)
    }
}
