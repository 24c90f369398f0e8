use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_type::DataType;
use crate::granularity::Granularity;
use crate::interval::Interval;

use super::error::{ConfigurationError, Error, RuntimeError};

pub const SAMPLES_TREND_NAME: &str = "samples";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Trend {
    pub name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_time_aggregation")]
    pub time_aggregation: String,
    #[serde(default = "default_entity_aggregation")]
    pub entity_aggregation: String,
    #[serde(default = "default_extra_data")]
    pub extra_data: Value,
}

fn default_time_aggregation() -> String {
    String::from("sum")
}

fn default_entity_aggregation() -> String {
    String::from("sum")
}

fn default_extra_data() -> Value {
    Value::Object(Map::new())
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trend({}, {})", &self.name, &self.data_type)
    }
}

impl Trend {
    /// Row count column of aggregated parts, used for weighted
    /// re-aggregation and completeness checks.
    pub fn samples() -> Trend {
        Trend {
            name: SAMPLES_TREND_NAME.to_string(),
            data_type: DataType::Int2,
            description: Some("Number of source records".to_string()),
            time_aggregation: "sum".to_string(),
            entity_aggregation: "sum".to_string(),
            extra_data: default_extra_data(),
        }
    }

    /// The trend as it appears in a part that aggregates this trend.
    pub fn aggregate(&self) -> Trend {
        Trend {
            name: self.name.clone(),
            data_type: self.data_type.widen(),
            description: None,
            time_aggregation: self.time_aggregation.clone(),
            entity_aggregation: self.entity_aggregation.clone(),
            extra_data: self.extra_data.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedTrend {
    pub name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrendStorePart {
    pub name: String,
    pub trends: Vec<Trend>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_trends: Vec<GeneratedTrend>,
}

impl TrendStorePart {
    /// # Panics
    ///
    /// Panics when two trends share a name.
    #[must_use]
    pub fn new(
        name: String,
        trends: Vec<Trend>,
        generated_trends: Vec<GeneratedTrend>,
    ) -> TrendStorePart {
        let part = TrendStorePart {
            name,
            trends,
            generated_trends,
        };

        assert!(
            part.duplicate_trend_name().is_none(),
            "duplicate trend name in {part}"
        );

        part
    }

    #[must_use]
    pub fn trend(&self, name: &str) -> Option<&Trend> {
        self.trends.iter().find(|trend| trend.name == name)
    }

    pub fn has_samples(&self) -> bool {
        self.trend(SAMPLES_TREND_NAME).is_some()
    }

    fn duplicate_trend_name(&self) -> Option<&str> {
        let mut seen: HashSet<&str> = HashSet::new();

        self.trends
            .iter()
            .map(|trend| trend.name.as_str())
            .find(|name| !seen.insert(name))
    }
}

impl fmt::Display for TrendStorePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrendStorePart({})", &self.name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrendStore {
    pub data_source: String,
    pub entity_type: String,
    pub granularity: Granularity,
    pub partition_size: Interval,
    pub parts: Vec<TrendStorePart>,
}

impl TrendStore {
    /// # Panics
    ///
    /// Panics when two parts, or two trends within a part, share a name.
    #[must_use]
    pub fn new(
        data_source: String,
        entity_type: String,
        granularity: Granularity,
        partition_size: Interval,
        parts: Vec<TrendStorePart>,
    ) -> TrendStore {
        let trend_store = TrendStore {
            data_source,
            entity_type,
            granularity,
            partition_size,
            parts,
        };

        if let Err(e) = trend_store.validate() {
            panic!("invalid trend store {trend_store}: {e}");
        }

        trend_store
    }

    #[must_use]
    pub fn part(&self, name: &str) -> Option<&TrendStorePart> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Check the naming invariants of a trend store that was read from a
    /// definition.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen: HashSet<&str> = HashSet::new();

        for part in &self.parts {
            if !seen.insert(&part.name) {
                return Err(ConfigurationError::from_msg(format!(
                    "Duplicate part name '{}' in {self}",
                    part.name
                )));
            }

            if let Some(name) = part.duplicate_trend_name() {
                return Err(ConfigurationError::from_msg(format!(
                    "Duplicate trend name '{name}' in {part}"
                )));
            }
        }

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| {
            RuntimeError::from_msg(format!("Could not serialize {self}: {e}")).into()
        })
    }

    pub fn from_yaml(definition: &str) -> Result<TrendStore, Error> {
        let trend_store: TrendStore = serde_yaml::from_str(definition).map_err(|e| {
            ConfigurationError::from_msg(format!("Could not read trend store definition: {e}"))
        })?;

        trend_store.validate()?;

        Ok(trend_store)
    }
}

impl fmt::Display for TrendStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrendStore({}, {}, {})",
            &self.data_source, &self.entity_type, &self.granularity
        )
    }
}

pub fn load_trend_store_from_file(path: &Path) -> Result<TrendStore, Error> {
    let f = std::fs::File::open(path).map_err(|e| {
        ConfigurationError::from_msg(format!(
            "Could not open trend store definition file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let trend_store: TrendStore = if path.extension() == Some(std::ffi::OsStr::new("yaml")) {
        serde_yaml::from_reader(f).map_err(|e| {
            ConfigurationError::from_msg(format!(
                "Could not read trend store definition from file '{}': {}",
                path.display(),
                e
            ))
        })?
    } else if path.extension() == Some(std::ffi::OsStr::new("json")) {
        serde_json::from_reader(f).map_err(|e| {
            ConfigurationError::from_msg(format!(
                "Could not read trend store definition from file '{}': {}",
                path.display(),
                e
            ))
        })?
    } else {
        return Err(ConfigurationError::from_msg(format!(
            "Unsupported trend store definition format '{}'",
            path.extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_default()
        ))
        .into());
    };

    trend_store.validate()?;

    Ok(trend_store)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TREND_STORE_DEFINITION: &str = r#"
data_source: hub
entity_type: node
granularity: 15m
partition_size: 86400s
parts:
- name: hub_node_main_15m
  trends:
  - name: outside_temp
    data_type: numeric
    time_aggregation: avg
    entity_aggregation: avg
    extra_data: {}
  - name: power_kwh
    data_type: smallint
    description: Energy consumption
    time_aggregation: sum
    entity_aggregation: sum
    extra_data:
      unit: kWh
  generated_trends:
  - name: power_mwh
    data_type: numeric
    expression: power_kwh / 1000
"#;

    #[test]
    fn deserialize_trend_with_defaults() {
        let trend_def = concat!(
            "{",
            "  \"name\": \"Foo\",",
            "  \"data_type\": \"integer\"",
            "}",
        );

        let trend: Trend = serde_json::from_str(trend_def).unwrap();

        assert_eq!(trend.name, "Foo");
        assert_eq!(trend.data_type, DataType::Integer);
        assert_eq!(trend.time_aggregation, "sum");
        assert_eq!(trend.description, None);
        assert_eq!(trend.extra_data, json!({}));
    }

    #[test]
    fn serialize_trend() {
        let trend: Trend = Trend {
            name: "MaxPower".to_string(),
            data_type: DataType::Int8,
            description: None,
            entity_aggregation: "max".to_string(),
            time_aggregation: "max".to_string(),
            extra_data: json!({}),
        };

        let trend_def: String = serde_json::to_string(&trend).unwrap();
        let expected_trend_def = "{\"name\":\"MaxPower\",\"data_type\":\"bigint\",\"time_aggregation\":\"max\",\"entity_aggregation\":\"max\",\"extra_data\":{}}";

        assert_eq!(trend_def, expected_trend_def);
    }

    #[test]
    fn load_declarative_definition() {
        let trend_store = TrendStore::from_yaml(TREND_STORE_DEFINITION).unwrap();

        assert_eq!(trend_store.to_string(), "TrendStore(hub, node, 15m)");
        assert_eq!(trend_store.partition_size.seconds(), 86400);

        let part = trend_store.part("hub_node_main_15m").unwrap();

        assert_eq!(part.trends.len(), 2);
        assert_eq!(part.trend("power_kwh").unwrap().extra_data, json!({"unit": "kWh"}));
        assert_eq!(part.generated_trends[0].expression, "power_kwh / 1000");
        assert!(trend_store.part("Hub_node_main_15m").is_none());
    }

    #[test]
    fn declarative_output_keeps_notation_and_order() {
        let trend_store = TrendStore::from_yaml(TREND_STORE_DEFINITION).unwrap();

        let yaml = trend_store.to_yaml().unwrap();

        let keys: Vec<&str> = yaml
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('-'))
            .filter_map(|line| line.split(':').next())
            .collect();

        assert_eq!(
            keys,
            vec!["data_source", "entity_type", "granularity", "partition_size", "parts"]
        );
        assert!(yaml.contains("granularity: 15m\n"));
        assert!(yaml.contains("partition_size: 86400s\n"));
        assert!(yaml.contains("description: Energy consumption\n"));
        assert_eq!(TrendStore::from_yaml(&yaml).unwrap(), trend_store);
    }

    #[test]
    fn duplicate_part_names_are_rejected() {
        let definition = r#"
data_source: hub
entity_type: node
granularity: 1d
partition_size: 3month
parts:
- name: a
  trends: []
- name: a
  trends: []
"#;

        assert!(matches!(
            TrendStore::from_yaml(definition),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    #[should_panic(expected = "Duplicate part name 'a'")]
    fn constructing_with_duplicate_part_names_panics() {
        let part = TrendStorePart::new("a".to_string(), vec![], vec![]);

        let _ = TrendStore::new(
            "hub".to_string(),
            "node".to_string(),
            Interval::parse("1d").unwrap(),
            Interval::parse("3month").unwrap(),
            vec![part.clone(), part],
        );
    }

    #[test]
    #[should_panic(expected = "duplicate trend name")]
    fn duplicate_trend_names_are_a_programming_error() {
        let trend = Trend::samples();

        let _ = TrendStorePart::new("p".to_string(), vec![trend.clone(), trend], vec![]);
    }
}
