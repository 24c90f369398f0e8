//! Aggregation definitions and their resolution into aggregate trend stores.
//!
//! An aggregation definition describes a trend store that is derived from a
//! source trend store, either by rolling up entities over a relation or by
//! rolling up time into a coarser granularity. Resolving a definition against
//! its source yields the definition of the derived trend store.
use std::fmt;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_yaml::with::singleton_map;

use crate::granularity::{check_time_aggregation, partition_size_for, Granularity};
use crate::relation::RelationLookup;
use crate::trend_store::{GeneratedTrend, Trend, TrendStore, TrendStorePart};

use super::error::{ConfigurationError, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Format implied by the file extension, YAML when there is none.
    pub fn from_path(path: &Path) -> DefinitionFormat {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => DefinitionFormat::Json,
            _ => DefinitionFormat::Yaml,
        }
    }
}

/// Target part of an aggregation.
///
/// A part that names a `source` is derived from that part of the source
/// trend store. A part without `source` is taken as is.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AggregationPart {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trends: Vec<Trend>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_trends: Vec<GeneratedTrend>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityAggregation {
    pub source: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    pub relation: String,
    pub parts: Vec<AggregationPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeAggregation {
    pub source: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub granularity: Granularity,
    pub mapping_function: String,
    pub parts: Vec<AggregationPart>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationDefinition {
    EntityAggregation(EntityAggregation),
    TimeAggregation(TimeAggregation),
}

impl fmt::Display for AggregationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationDefinition::EntityAggregation(a) => {
                write!(f, "EntityAggregation({}, {})", &a.source, &a.name)
            }
            AggregationDefinition::TimeAggregation(a) => {
                write!(f, "TimeAggregation({}, {})", &a.source, &a.name)
            }
        }
    }
}

impl AggregationDefinition {
    /// Parse a YAML definition, where the kind of aggregation is the single
    /// key of the top level mapping.
    pub fn from_yaml(definition: &str) -> Result<AggregationDefinition, Error> {
        singleton_map::deserialize(serde_yaml::Deserializer::from_str(definition)).map_err(|e| {
            ConfigurationError::from_msg(format!("Could not read aggregation definition: {e}"))
                .into()
        })
    }

    /// Name of the source trend store.
    pub fn source(&self) -> &str {
        match self {
            AggregationDefinition::EntityAggregation(a) => &a.source,
            AggregationDefinition::TimeAggregation(a) => &a.source,
        }
    }

    /// Name of the aggregate trend store.
    pub fn name(&self) -> &str {
        match self {
            AggregationDefinition::EntityAggregation(a) => &a.name,
            AggregationDefinition::TimeAggregation(a) => &a.name,
        }
    }

    pub fn parts(&self) -> &[AggregationPart] {
        match self {
            AggregationDefinition::EntityAggregation(a) => &a.parts,
            AggregationDefinition::TimeAggregation(a) => &a.parts,
        }
    }

    pub fn data_source<'a>(&'a self, source: &'a TrendStore) -> &'a str {
        let data_source = match self {
            AggregationDefinition::EntityAggregation(a) => a.data_source.as_deref(),
            AggregationDefinition::TimeAggregation(a) => a.data_source.as_deref(),
        };

        data_source.unwrap_or(&source.data_source)
    }

    pub fn entity_type<'a>(&'a self, source: &'a TrendStore) -> &'a str {
        let entity_type = match self {
            AggregationDefinition::EntityAggregation(a) => a.entity_type.as_deref(),
            AggregationDefinition::TimeAggregation(a) => a.entity_type.as_deref(),
        };

        entity_type.unwrap_or(&source.entity_type)
    }

    pub fn granularity<'a>(&'a self, source: &'a TrendStore) -> &'a Granularity {
        match self {
            AggregationDefinition::EntityAggregation(a) => {
                a.granularity.as_ref().unwrap_or(&source.granularity)
            }
            AggregationDefinition::TimeAggregation(a) => &a.granularity,
        }
    }

    /// Check that the definition is consistent with its source trend store and
    /// the relation it aggregates over.
    pub fn configuration_check<R: RelationLookup + ?Sized>(
        &self,
        source: &TrendStore,
        relations: &R,
    ) -> Result<(), Error> {
        match self {
            AggregationDefinition::EntityAggregation(a) => {
                let relation = relations.relation(&a.relation)?;
                let entity_type = self.entity_type(source);

                if relation.target_entity_type != entity_type {
                    return Err(ConfigurationError::from_msg(format!(
                        "Entity type mismatch between definition and relation target: {} != {}",
                        entity_type, relation.target_entity_type
                    ))
                    .into());
                }

                Ok(())
            }
            AggregationDefinition::TimeAggregation(a) => {
                check_time_aggregation(&source.granularity, &a.granularity)
            }
        }
    }

    /// Target parts that are derived from a source part, paired with that
    /// source part, in definition order.
    pub fn linked_parts<'a>(
        &'a self,
        source: &'a TrendStore,
    ) -> Result<Vec<(&'a TrendStorePart, &'a AggregationPart)>, Error> {
        self.parts()
            .iter()
            .filter_map(|part| part.source.as_deref().map(|name| (name, part)))
            .map(|(source_part_name, part)| {
                let source_part = source
                    .part(source_part_name)
                    .ok_or_else(|| missing_source_part(source_part_name))?;

                Ok((source_part, part))
            })
            .collect()
    }
}

fn missing_source_part(name: &str) -> Error {
    ConfigurationError::from_msg(format!("No definition found for source part '{name}'")).into()
}

pub fn load_aggregation_definition(
    path: &Path,
    format: Option<DefinitionFormat>,
) -> Result<AggregationDefinition, Error> {
    let f = std::fs::File::open(path).map_err(|e| {
        ConfigurationError::from_msg(format!(
            "Could not open aggregation definition file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let definition: AggregationDefinition = match format
        .unwrap_or_else(|| DefinitionFormat::from_path(path))
    {
        DefinitionFormat::Yaml => {
            singleton_map::deserialize(serde_yaml::Deserializer::from_reader(f)).map_err(|e| {
                ConfigurationError::from_msg(format!(
                    "Could not read aggregation definition from file '{}': {}",
                    path.display(),
                    e
                ))
            })?
        }
        DefinitionFormat::Json => serde_json::from_reader(f).map_err(|e| {
            ConfigurationError::from_msg(format!(
                "Could not read aggregation definition from file '{}': {}",
                path.display(),
                e
            ))
        })?,
    };

    Ok(definition)
}

/// Resolve the definition of the trend store that results from applying
/// `definition` to `source`.
pub fn resolve<R: RelationLookup + ?Sized>(
    source: &TrendStore,
    definition: &AggregationDefinition,
    relations: &R,
) -> Result<TrendStore, Error> {
    definition.configuration_check(source, relations)?;

    let parts: Vec<TrendStorePart> = definition
        .parts()
        .iter()
        .map(|part| match &part.source {
            Some(source_part_name) => source
                .part(source_part_name)
                .map(|source_part| define_aggregate_part(source_part, part))
                .ok_or_else(|| missing_source_part(source_part_name)),
            None => Ok(TrendStorePart {
                name: part.name.clone(),
                trends: part.trends.clone(),
                generated_trends: part.generated_trends.clone(),
            }),
        })
        .collect::<Result<Vec<TrendStorePart>, Error>>()?;

    let granularity = definition.granularity(source).clone();
    let partition_size = partition_size_for(&granularity)?;

    let trend_store = TrendStore {
        data_source: definition.data_source(source).to_string(),
        entity_type: definition.entity_type(source).to_string(),
        granularity,
        partition_size,
        parts,
    };

    trend_store.validate()?;

    debug!("Resolved {definition} into {trend_store}");

    Ok(trend_store)
}

fn define_aggregate_part(source_part: &TrendStorePart, target_part: &AggregationPart) -> TrendStorePart {
    let mut trends: Vec<Trend> = source_part.trends.iter().map(Trend::aggregate).collect();

    if !source_part.has_samples() {
        trends.insert(0, Trend::samples());
    }

    let generated_trends = source_part
        .generated_trends
        .iter()
        .chain(target_part.generated_trends.iter())
        .cloned()
        .collect();

    debug!(
        "Aggregate part '{}' from '{}' with {} trends",
        target_part.name,
        source_part.name,
        trends.len()
    );

    TrendStorePart {
        name: target_part.name.clone(),
        trends,
        generated_trends,
    }
}
