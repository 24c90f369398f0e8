use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use glob::glob;
use log::error;
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

use super::error::{ConfigurationError, Error, RuntimeError};

/// SQL text embedded in a materialization definition.
///
/// Serialized as a plain string; multi-line SQL ends up as a literal block
/// scalar in YAML so the generated files stay readable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct SqlSrc(pub String);

impl SqlSrc {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SqlSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SqlSrc {
    fn from(value: String) -> Self {
        SqlSrc(value)
    }
}

pub fn default_processing_delay() -> Interval {
    Interval::parse("30m").unwrap()
}

pub fn default_stability_delay() -> Interval {
    Interval::parse("5m").unwrap()
}

pub fn default_reprocessing_period() -> Interval {
    Interval::parse("3 days").unwrap()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrendMaterializationSource {
    pub trend_store_part: String,
    pub mapping_function: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrendViewMaterialization {
    pub target_trend_store_part: String,
    pub enabled: bool,
    pub processing_delay: Interval,
    pub stability_delay: Interval,
    pub reprocessing_period: Interval,
    pub sources: Vec<TrendMaterializationSource>,
    pub view: SqlSrc,
    pub fingerprint_function: SqlSrc,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrendMaterializationFunction {
    pub return_type: SqlSrc,
    pub src: SqlSrc,
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrendFunctionMaterialization {
    pub target_trend_store_part: String,
    pub enabled: bool,
    pub processing_delay: Interval,
    pub stability_delay: Interval,
    pub reprocessing_period: Interval,
    pub sources: Vec<TrendMaterializationSource>,
    pub function: TrendMaterializationFunction,
    pub fingerprint_function: SqlSrc,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum TrendMaterialization {
    View(TrendViewMaterialization),
    Function(TrendFunctionMaterialization),
}

impl fmt::Display for TrendMaterialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendMaterialization::View(view_materialization) => write!(
                f,
                "TrendViewMaterialization('{}')",
                &view_materialization.target_trend_store_part
            ),
            TrendMaterialization::Function(function_materialization) => write!(
                f,
                "TrendFunctionMaterialization('{}')",
                &function_materialization.target_trend_store_part
            ),
        }
    }
}

impl TrendMaterialization {
    pub fn name(&self) -> &str {
        match self {
            TrendMaterialization::View(m) => &m.target_trend_store_part,
            TrendMaterialization::Function(m) => &m.target_trend_store_part,
        }
    }

    pub fn sources(&self) -> &[TrendMaterializationSource] {
        match self {
            TrendMaterialization::View(m) => &m.sources,
            TrendMaterialization::Function(m) => &m.sources,
        }
    }

    pub fn fingerprint_function(&self) -> &SqlSrc {
        match self {
            TrendMaterialization::View(m) => &m.fingerprint_function,
            TrendMaterialization::Function(m) => &m.fingerprint_function,
        }
    }

    pub fn dump(&self) -> Result<String, Error> {
        match self {
            TrendMaterialization::View(m) => serde_yaml::to_string(m).map_err(|e| {
                Error::Runtime(RuntimeError::from_msg(format!(
                    "Could not dump view materialization: {e}"
                )))
            }),
            TrendMaterialization::Function(m) => serde_yaml::to_string(m).map_err(|e| {
                Error::Runtime(RuntimeError::from_msg(format!(
                    "Could not dump function materialization: {e}"
                )))
            }),
        }
    }
}

impl From<TrendViewMaterialization> for TrendMaterialization {
    fn from(value: TrendViewMaterialization) -> Self {
        TrendMaterialization::View(value)
    }
}

impl From<TrendFunctionMaterialization> for TrendMaterialization {
    fn from(value: TrendFunctionMaterialization) -> Self {
        TrendMaterialization::Function(value)
    }
}

/// Comment block placed at the start of files written by the aggregation
/// command.
pub fn generated_file_header(definition_path: &Path, source_trend_store_path: &Path) -> String {
    [
        "###########################################################################\n".to_string(),
        "#\n".to_string(),
        "# This file is automatically generated by the `minerva aggregation` command\n".to_string(),
        "#\n".to_string(),
        format!("# definition:         {}\n", definition_path.display()),
        format!("# source trend store: {}\n", source_trend_store_path.display()),
        "#\n".to_string(),
        "###########################################################################\n".to_string(),
    ]
    .join("")
}

/// Write `content` to `path`, preceded by `header`.
pub fn write_generated_file(path: &Path, header: &str, content: &str) -> Result<(), Error> {
    let mut file = std::fs::File::create(path).map_err(|e| {
        RuntimeError::from_msg(format!("Could not create file '{}': {e}", path.display()))
    })?;

    file.write_all(header.as_bytes())
        .and_then(|()| file.write_all(content.as_bytes()))
        .map_err(|e| {
            RuntimeError::from_msg(format!("Could not write to file '{}': {e}", path.display()))
                .into()
        })
}

pub fn trend_materialization_from_config(path: &Path) -> Result<TrendMaterialization, Error> {
    let f = std::fs::File::open(path).map_err(|e| {
        ConfigurationError::from_msg(format!(
            "Could not open materialization definition file '{}': {e}",
            path.display()
        ))
    })?;

    serde_yaml::from_reader(f).map_err(|e| {
        ConfigurationError::from_msg(format!(
            "Could not deserialize materialization '{}': {e}",
            path.display()
        ))
        .into()
    })
}

/// All materializations in the `materialization` directory of an instance,
/// with the path they were loaded from.
pub fn load_materializations_from(
    minerva_instance_root: &Path,
) -> impl Iterator<Item = (PathBuf, TrendMaterialization)> {
    let glob_path = format!(
        "{}/materialization/*.yaml",
        minerva_instance_root.to_string_lossy()
    );

    glob(&glob_path)
        .into_iter()
        .flatten()
        .filter_map(|entry| match entry {
            Ok(path) => match trend_materialization_from_config(&path) {
                Ok(materialization) => Some((path, materialization)),
                Err(e) => {
                    error!("Error loading materialization '{}': {}", &path.display(), e);
                    None
                }
            },
            Err(_) => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_materialization() -> TrendViewMaterialization {
        TrendViewMaterialization {
            target_trend_store_part: "hub_region_main_15m".to_string(),
            enabled: true,
            processing_delay: default_processing_delay(),
            stability_delay: default_stability_delay(),
            reprocessing_period: default_reprocessing_period(),
            sources: vec![TrendMaterializationSource {
                trend_store_part: "hub_node_main_15m".to_string(),
                mapping_function: "trend.mapping_id".to_string(),
            }],
            view: SqlSrc("SELECT 1\nFROM trend.\"hub_node_main_15m\";\n".to_string()),
            fingerprint_function: SqlSrc("SELECT now(), '{}'::jsonb;\n".to_string()),
        }
    }

    #[test]
    fn key_order_and_defaults() {
        let yaml = TrendMaterialization::from(view_materialization()).dump().unwrap();

        let keys: Vec<&str> = yaml
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('-'))
            .filter_map(|line| line.split(':').next())
            .collect();

        assert_eq!(
            keys,
            vec![
                "target_trend_store_part",
                "enabled",
                "processing_delay",
                "stability_delay",
                "reprocessing_period",
                "sources",
                "view",
                "fingerprint_function",
            ]
        );

        assert!(yaml.contains("processing_delay: 30m\n"));
        assert!(yaml.contains("stability_delay: 5m\n"));
        assert!(yaml.contains("reprocessing_period: 3 days\n"));
        assert!(yaml.contains("view: |"));
    }

    #[test]
    fn header_names_definition_and_source() {
        let header = generated_file_header(
            Path::new("aggregation/hub_region_15m.yaml"),
            Path::new("trend/hub_node_15m.yaml"),
        );

        let lines: Vec<&str> = header.lines().collect();

        assert_eq!(lines.len(), 8);
        assert_eq!(lines[4], "# definition:         aggregation/hub_region_15m.yaml");
        assert_eq!(lines[5], "# source trend store: trend/hub_node_15m.yaml");
        assert!(lines.iter().all(|line| line.starts_with('#')));
    }

    #[test]
    fn written_file_reads_back() {
        let instance_root = tempfile::tempdir().unwrap();
        let materialization_dir = instance_root.path().join("materialization");

        std::fs::create_dir(&materialization_dir).unwrap();

        let materialization = TrendMaterialization::from(view_materialization());
        let path = materialization_dir.join("hub_region_main_15m.yaml");
        let header = generated_file_header(Path::new("a.yaml"), Path::new("b.yaml"));

        write_generated_file(&path, &header, &materialization.dump().unwrap()).unwrap();

        let loaded: Vec<(PathBuf, TrendMaterialization)> =
            load_materializations_from(instance_root.path()).collect();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, path);
        assert_eq!(loaded[0].1, materialization);
        assert_eq!(loaded[0].1.to_string(), "TrendViewMaterialization('hub_region_main_15m')");
    }
}
