use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::aggregation::{
    load_aggregation_definition, resolve, AggregationDefinition, DefinitionFormat,
};
use crate::granularity::Granularity;
use crate::instance::MinervaInstance;
use crate::relation::RelationDirectory;
use crate::trend_materialization::{
    default_processing_delay, default_reprocessing_period, default_stability_delay,
    generated_file_header, write_generated_file, SqlSrc, TrendFunctionMaterialization,
    TrendMaterialization, TrendMaterializationFunction, TrendMaterializationSource,
    TrendViewMaterialization,
};
use crate::trend_store::{load_trend_store_from_file, TrendStore, TrendStorePart};

use super::error::{Error, RuntimeError};

pub const ENTITY_AGGREGATION_MAPPING_FUNCTION: &str = "trend.mapping_id";

#[derive(Error, Debug)]
pub enum AggregationGenerationError {
    #[error("could not create directory '{}': {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<AggregationGenerationError> for Error {
    fn from(err: AggregationGenerationError) -> Error {
        Error::Runtime(RuntimeError::from_msg(err.to_string()))
    }
}

/// Files written for one aggregation definition.
#[derive(Debug)]
pub struct AggregationSummary {
    pub materialization_paths: Vec<PathBuf>,
    pub trend_store_path: PathBuf,
    pub trend_store: TrendStore,
}

/// Generate the materializations and the aggregate trend store definition for
/// the aggregation defined in `definition_path`, and write them to the
/// instance.
pub fn compile_aggregation(
    instance: &MinervaInstance,
    definition_path: &Path,
    format: Option<DefinitionFormat>,
) -> Result<AggregationSummary, Error> {
    let definition = load_aggregation_definition(definition_path, format)?;

    write_aggregation(instance, definition_path, &definition)
}

/// Write the materializations and the aggregate trend store for an already
/// loaded `definition` that was read from `definition_path`.
pub fn write_aggregation(
    instance: &MinervaInstance,
    definition_path: &Path,
    definition: &AggregationDefinition,
) -> Result<AggregationSummary, Error> {
    info!(
        "Using aggregation definition '{}'",
        definition_path.display()
    );

    let source_definition_path = instance.trend_store_file_path(definition.source());

    let source = load_trend_store_from_file(&source_definition_path)?;

    let relations = RelationDirectory {
        instance_root: instance.root.clone(),
    };

    let aggregate_trend_store = resolve(&source, definition, &relations)?;

    let header = generated_file_header(
        &instance.make_relative(definition_path),
        &instance.make_relative(&source_definition_path),
    );

    let materializations = generate_materializations(&source, definition)?;

    let mut materialization_paths = Vec::new();

    for materialization in &materializations {
        let materialization_file_path = instance.materialization_file_path(materialization.name());

        ensure_parent_dir(&materialization_file_path)?;

        println!(
            "Writing materialization to '{}'",
            materialization_file_path.display()
        );

        write_generated_file(&materialization_file_path, &header, &materialization.dump()?)?;

        materialization_paths.push(materialization_file_path);
    }

    let trend_store_path = instance.trend_store_file_path(definition.name());

    println!(
        "Writing aggregate trend store to '{}'",
        trend_store_path.display()
    );

    write_generated_file(&trend_store_path, &header, &aggregate_trend_store.to_yaml()?)?;

    Ok(AggregationSummary {
        materialization_paths,
        trend_store_path,
        trend_store: aggregate_trend_store,
    })
}

fn ensure_parent_dir(path: &Path) -> Result<(), AggregationGenerationError> {
    match path.parent() {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| AggregationGenerationError::CreateDirectory {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        None => Ok(()),
    }
}

/// One materialization per target part that is derived from a source part,
/// in definition order.
pub fn generate_materializations(
    source: &TrendStore,
    definition: &AggregationDefinition,
) -> Result<Vec<TrendMaterialization>, Error> {
    let linked_parts = definition.linked_parts(source)?;

    let materializations = linked_parts
        .into_iter()
        .map(|(source_part, target_part)| -> TrendMaterialization {
            debug!(
                "Generating materialization '{}' from '{}'",
                target_part.name, source_part.name
            );

            match definition {
                AggregationDefinition::EntityAggregation(a) => {
                    define_part_entity_aggregation(source_part, &a.relation, &target_part.name)
                        .into()
                }
                AggregationDefinition::TimeAggregation(a) => define_part_time_aggregation(
                    source_part,
                    &source.granularity,
                    &a.mapping_function,
                    &a.granularity,
                    &target_part.name,
                )
                .into(),
            }
        })
        .collect();

    Ok(materializations)
}

pub fn define_part_entity_aggregation(
    source_part: &TrendStorePart,
    relation: &str,
    name: &str,
) -> TrendViewMaterialization {
    TrendViewMaterialization {
        target_trend_store_part: name.to_string(),
        enabled: true,
        processing_delay: default_processing_delay(),
        stability_delay: default_stability_delay(),
        reprocessing_period: default_reprocessing_period(),
        sources: vec![TrendMaterializationSource {
            trend_store_part: source_part.name.clone(),
            mapping_function: ENTITY_AGGREGATION_MAPPING_FUNCTION.to_string(),
        }],
        view: SqlSrc(entity_aggregation_view_sql(source_part, relation)),
        fingerprint_function: SqlSrc(entity_fingerprint_sql(source_part)),
    }
}

/// View aggregating `source_part` over the target entities of `relation`.
pub fn entity_aggregation_view_sql(source_part: &TrendStorePart, relation: &str) -> String {
    let mut columns = vec![
        "  r.target_id AS entity_id".to_string(),
        "  timestamp".to_string(),
    ];

    if !source_part.has_samples() {
        columns.push("  count(*) AS samples".to_string());
    }

    columns.extend(source_part.trends.iter().map(|trend| {
        format!(
            "  {}(\"{}\") AS \"{}\"",
            trend.entity_aggregation, trend.name, trend.name
        )
    }));

    [
        "SELECT\n".to_string(),
        columns.join(",\n"),
        "\n".to_string(),
        format!("FROM trend.\"{}\" t\n", source_part.name),
        format!("JOIN relation.\"{relation}\" r ON t.entity_id = r.source_id\n"),
        "GROUP BY timestamp, r.target_id;\n".to_string(),
    ]
    .join("")
}

/// Fingerprint of an entity aggregation: the modification watermark of the
/// source part for the same timestamp.
pub fn entity_fingerprint_sql(source_part: &TrendStorePart) -> String {
    [
        format!(
            "SELECT modified.last, format('{{\"{}\": \"%s\"}}', modified.last)::jsonb\n",
            source_part.name
        ),
        "FROM trend_directory.modified\n".to_string(),
        "JOIN trend_directory.trend_store_part ttsp ON ttsp.id = modified.trend_store_part_id\n"
            .to_string(),
        format!(
            "WHERE ttsp::name = '{}' AND modified.timestamp = $1;\n",
            source_part.name
        ),
    ]
    .join("")
}

pub fn define_part_time_aggregation(
    source_part: &TrendStorePart,
    source_granularity: &Granularity,
    mapping_function: &str,
    target_granularity: &Granularity,
    name: &str,
) -> TrendFunctionMaterialization {
    TrendFunctionMaterialization {
        target_trend_store_part: name.to_string(),
        enabled: true,
        processing_delay: default_processing_delay(),
        stability_delay: default_stability_delay(),
        reprocessing_period: default_reprocessing_period(),
        sources: vec![TrendMaterializationSource {
            trend_store_part: source_part.name.clone(),
            mapping_function: mapping_function.to_string(),
        }],
        function: time_aggregate_function(source_part, target_granularity),
        fingerprint_function: SqlSrc(time_fingerprint_sql(
            source_part,
            source_granularity,
            target_granularity,
        )),
    }
}

/// Function aggregating `source_part` into buckets of `target_granularity`
/// ending at the timestamp argument.
pub fn time_aggregate_function(
    source_part: &TrendStorePart,
    target_granularity: &Granularity,
) -> TrendMaterializationFunction {
    let mut column_expressions = vec![
        "      entity_id".to_string(),
        "      $1 AS timestamp".to_string(),
    ];

    let mut result_columns = vec![
        "  \"entity_id\" integer".to_string(),
        "  \"timestamp\" timestamp with time zone".to_string(),
    ];

    if !source_part.has_samples() {
        column_expressions.push("      (count(*))::smallint AS samples".to_string());
        result_columns.push("  samples smallint".to_string());
    }

    for trend in &source_part.trends {
        let data_type = trend.data_type.widen();

        column_expressions.push(format!(
            "      {}(t.\"{}\")::{} AS \"{}\"",
            trend.time_aggregation, trend.name, data_type, trend.name
        ));

        result_columns.push(format!("  \"{}\" {}", trend.name, data_type));
    }

    let return_type = format!("TABLE (\n{}\n)\n", result_columns.join(",\n"));

    let src = [
        "BEGIN\n".to_string(),
        "RETURN QUERY EXECUTE $query$\n".to_string(),
        "    SELECT\n".to_string(),
        column_expressions.join(",\n"),
        "\n".to_string(),
        format!("    FROM trend.\"{}\" AS t\n", source_part.name),
        format!(
            "    WHERE timestamp > $1 - interval '{}' AND timestamp <= $1\n",
            target_granularity.as_str()
        ),
        "    GROUP BY entity_id\n".to_string(),
        "$query$ USING $1;\n".to_string(),
        "END;\n".to_string(),
    ]
    .join("");

    TrendMaterializationFunction {
        return_type: SqlSrc(return_type),
        src: SqlSrc(src),
        language: "plpgsql".to_string(),
    }
}

/// Fingerprint of a time aggregation: the modification watermark of every
/// source timestamp in the target bucket. Source timestamps without a
/// watermark come out as null.
pub fn time_fingerprint_sql(
    source_part: &TrendStorePart,
    source_granularity: &Granularity,
    target_granularity: &Granularity,
) -> String {
    let source_granularity = source_granularity.as_str();
    let target_granularity = target_granularity.as_str();

    [
        "SELECT max(modified.last), format('{%s}', string_agg(format('\"%s\":\"%s\"', t, modified.last), ','))::jsonb\n".to_string(),
        format!("FROM generate_series($1 - interval '{target_granularity}' + interval '{source_granularity}', $1, interval '{source_granularity}') t\n"),
        "LEFT JOIN (\n".to_string(),
        "  SELECT timestamp, last\n".to_string(),
        "  FROM trend_directory.trend_store_part part\n".to_string(),
        "  JOIN trend_directory.modified ON modified.trend_store_part_id = part.id\n".to_string(),
        format!("  WHERE part.name = '{}'\n", source_part.name),
        ") modified ON modified.timestamp = t;\n".to_string(),
    ]
    .join("")
}
