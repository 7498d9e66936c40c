use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Everything needed to build one field, fixed for the length of a run.
///
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FieldConfig {
    /// Registry key of the field factory, `"dataset"` unless given
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Variable name, or for derived fields the name the field goes by
    pub name: String,

    /// Dataset files, in any order
    pub locations: Vec<String>,

    /// Horizontal velocity components a vertical velocity is derived from
    #[serde(default)]
    pub velocity: Option<VelocityConfig>,

    /// Number of time layers held in memory at once
    #[serde(default = "default_nlayer")]
    pub nlayer: usize,

    #[serde(default)]
    pub tiling: TilingConfig,

    /// Number of background tile loads allowed to run at once. 0 turns prefetching off.
    #[serde(default = "default_prefetch_workers")]
    pub prefetch_workers: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VelocityConfig {
    pub u: String,
    pub v: String,
}

/// Nominal tile size, in grid cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TilingConfig {
    #[serde(default = "default_horizontal")]
    pub horizontal: usize,

    #[serde(default = "default_vertical")]
    pub vertical: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            horizontal: default_horizontal(),
            vertical: default_vertical(),
        }
    }
}

fn default_kind() -> String {
    String::from("dataset")
}

fn default_nlayer() -> usize {
    2
}

fn default_prefetch_workers() -> usize {
    4
}

fn default_horizontal() -> usize {
    32
}

fn default_vertical() -> usize {
    8
}

impl FieldConfig {
    /// A `"dataset"` field with default settings.
    pub fn dataset(name: impl Into<String>, locations: Vec<String>) -> Self {
        Self {
            kind: default_kind(),
            name: name.into(),
            locations,
            velocity: None,
            nlayer: default_nlayer(),
            tiling: TilingConfig::default(),
            prefetch_workers: default_prefetch_workers(),
        }
    }

    /// Read and validate a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config(String::from("field name is empty")));
        }
        if self.locations.is_empty() {
            return Err(Error::Config(format!("{}: no dataset files given", self.name)));
        }
        if self.nlayer == 0 {
            return Err(Error::Config(format!("{}: nlayer must be at least 1", self.name)));
        }
        if self.tiling.horizontal == 0 || self.tiling.vertical == 0 {
            return Err(Error::Config(format!(
                "{}: tile sizes must be at least 1, got {:?}",
                self.name, self.tiling
            )));
        }
        if self.kind == "vertical_velocity" && self.velocity.is_none() {
            return Err(Error::Config(format!(
                "{}: vertical velocity needs u and v variable names",
                self.name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() -> Result<()> {
        let config = FieldConfig::from_json(r#"{"name": "temp", "locations": ["a.nc"]}"#)?;
        assert_eq!(
            config,
            FieldConfig::dataset("temp", vec![String::from("a.nc")])
        );
        assert_eq!(config.nlayer, 2);
        assert_eq!(config.prefetch_workers, 4);

        Ok(())
    }

    #[test]
    fn test_from_path() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "kind": "vertical_velocity",
                "name": "w",
                "locations": ["roms_his_0001.nc", "roms_his_0002.nc"],
                "velocity": {{"u": "u", "v": "v"}},
                "nlayer": 3,
                "tiling": {{"horizontal": 16}},
                "prefetch_workers": 0
            }}"#
        )?;

        let config = FieldConfig::from_path(file.path())?;
        assert_eq!(config.kind, "vertical_velocity");
        assert_eq!(config.locations.len(), 2);
        assert_eq!(
            config.velocity,
            Some(VelocityConfig {
                u: String::from("u"),
                v: String::from("v")
            })
        );
        assert_eq!(config.nlayer, 3);
        assert_eq!(config.tiling.horizontal, 16);
        assert_eq!(config.tiling.vertical, 8);
        assert_eq!(config.prefetch_workers, 0);

        Ok(())
    }

    #[test]
    fn test_invalid() {
        let result = FieldConfig::from_json(r#"{"name": "temp", "locations": []}"#);
        assert!(matches!(result, Err(Error::Config(_))));

        let result =
            FieldConfig::from_json(r#"{"name": "temp", "locations": ["a.nc"], "nlayer": 0}"#);
        assert!(matches!(result, Err(Error::Config(_))));

        let result = FieldConfig::from_json(
            r#"{"kind": "vertical_velocity", "name": "w", "locations": ["a.nc"]}"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));

        let result = FieldConfig::from_json(r#"{"locations": ["a.nc"]}"#);
        assert!(matches!(result, Err(Error::Json(_))));

        let result = FieldConfig::from_path("/definitely/not/here.json");
        assert!(matches!(result, Err(Error::IO(_))));
    }
}
