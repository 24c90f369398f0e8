//! Ad-hoc aggregate queries: a formula over trends, evaluated per timestamp
//! over a set of entities.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use postgres_protocol::escape::escape_identifier;
use tokio_postgres::types::ToSql;
use tokio_postgres::GenericClient;

use crate::formula::{parse, Context, TrendMeta};
use crate::granularity::Granularity;
use crate::partition::shard_interval;

use super::error::{DatabaseError, Error, InputError};

pub const TREND_SCHEMA: &str = "trend";

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateValue {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Look up where a trend is stored.
///
/// The data source, when specified, is matched case-insensitively.
pub async fn get_trend_meta<T: GenericClient + Send + Sync>(
    client: &T,
    entity_type_id: i32,
    granularity: &Granularity,
    data_source: Option<&str>,
    trend: &str,
) -> Result<Option<TrendMeta>, Error> {
    let granularity_str = granularity.as_str();

    let mut criteria = vec![
        "ts.entity_type_id = $1",
        "ts.granularity = $2::text::interval",
        "trend.name = $3",
    ];

    let mut query_args: Vec<&(dyn ToSql + Sync)> = vec![&entity_type_id, &granularity_str, &trend];

    if let Some(data_source) = &data_source {
        criteria.push("lower(d.name) = lower($4)");
        query_args.push(data_source);
    }

    let query = format!(
        concat!(
            "SELECT d.name, trend.name, trend_directory.base_table_name(ts)::text ",
            "FROM trend_directory.trend ",
            "JOIN trend_directory.trend_store ts ON ts.id = trend.trend_store_id ",
            "JOIN directory.data_source d ON d.id = ts.data_source_id ",
            "WHERE {}"
        ),
        criteria.join(" AND ")
    );

    let row = client
        .query_opt(&query, &query_args)
        .await
        .map_err(|e| DatabaseError::from_postgres_error("Could not look up trend", e))?;

    Ok(row.map(|row| TrendMeta {
        data_source: row.get(0),
        trend: row.get(1),
        table: row.get(2),
    }))
}

fn table_ref(table: &str) -> String {
    format!("{TREND_SCHEMA}.{}", escape_identifier(table))
}

/// Query evaluating `formula_sql` per timestamp over the entities returned by
/// `entities_query`, for timestamps in `($1, $2]`.
///
/// The first table is the anchor that the other tables are joined to on
/// entity and timestamp.
pub fn build_aggregate_query(
    formula_sql: &str,
    tables: &[String],
    entities_query: &str,
) -> Result<String, Error> {
    let (first_table, other_tables) = tables.split_first().ok_or_else(|| {
        InputError::from_msg("Formula does not reference any trend".to_string())
    })?;

    let anchor = table_ref(first_table);

    let mut trend_joins = vec![format!("JOIN {anchor} ON {anchor}.entity_id = e.id")];

    trend_joins.extend(other_tables.iter().map(|table| {
        let table = table_ref(table);

        format!(
            "JOIN {table} ON {table}.entity_id = e.id AND {table}.timestamp = {anchor}.timestamp"
        )
    }));

    Ok(format!(
        concat!(
            "SELECT {anchor}.timestamp, ({formula})::double precision ",
            "FROM ({entities}) e ",
            "{joins} ",
            "WHERE {anchor}.timestamp > $1 AND {anchor}.timestamp <= $2 ",
            "GROUP BY {anchor}.timestamp"
        ),
        anchor = anchor,
        formula = formula_sql,
        entities = entities_query,
        joins = trend_joins.join(" "),
    ))
}

/// Evaluate `formula` for the entities in `entities_query` over `(start, end]`,
/// ordered by timestamp.
pub async fn get_aggregate_data<T: GenericClient + Send + Sync>(
    client: &T,
    entities_query: &str,
    entity_type_id: i32,
    granularity: &Granularity,
    formula: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> Result<Vec<AggregateValue>, Error> {
    let expr = parse(formula)?;

    let mut resolved: HashMap<(Option<String>, String), TrendMeta> = HashMap::new();

    for (namespace, name) in expr.identifiers() {
        let key = (namespace.map(str::to_string), name.to_string());

        if resolved.contains_key(&key) {
            continue;
        }

        if let Some(trend_meta) =
            get_trend_meta(client, entity_type_id, granularity, namespace, name).await?
        {
            debug!("meta: {trend_meta:?}");

            resolved.insert(key, trend_meta);
        }
    }

    let mut context = Context::new(|namespace: Option<&str>, name: &str| {
        resolved
            .get(&(namespace.map(str::to_string), name.to_string()))
            .cloned()
    });

    let formula_sql = expr.render(&mut context)?;

    let query = build_aggregate_query(&formula_sql, context.tables(), entities_query)?;

    debug!("Aggregate query: {query}");

    let rows = client
        .query(&query, &[start, end])
        .await
        .map_err(|e| DatabaseError::from_postgres_error("Could not retrieve aggregate data", e))?;

    let mut values: Vec<AggregateValue> = rows
        .iter()
        .map(|row| AggregateValue {
            timestamp: row.get(0),
            value: row.get(1),
        })
        .collect();

    values.sort_by_key(|value| value.timestamp);

    Ok(values)
}

/// Evaluate `formula` over the time range of shard `shard_index`.
pub async fn get_aggregate_shard<T: GenericClient + Send + Sync>(
    client: &T,
    entities_query: &str,
    entity_type_id: i32,
    granularity: &Granularity,
    formula: &str,
    shard_index: i64,
) -> Result<Vec<AggregateValue>, Error> {
    let (start, end) = shard_interval(granularity, shard_index)?;

    get_aggregate_data(
        client,
        entities_query,
        entity_type_id,
        granularity,
        formula,
        &start,
        &end,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_table_query() {
        let query = build_aggregate_query(
            "SUM(\"hub_node_main_15m\".\"power\")",
            &["hub_node_main_15m".to_string()],
            "SELECT id FROM entity.node",
        )
        .unwrap();

        assert_eq!(
            query,
            concat!(
                "SELECT trend.\"hub_node_main_15m\".timestamp, ",
                "(SUM(\"hub_node_main_15m\".\"power\"))::double precision ",
                "FROM (SELECT id FROM entity.node) e ",
                "JOIN trend.\"hub_node_main_15m\" ON trend.\"hub_node_main_15m\".entity_id = e.id ",
                "WHERE trend.\"hub_node_main_15m\".timestamp > $1 ",
                "AND trend.\"hub_node_main_15m\".timestamp <= $2 ",
                "GROUP BY trend.\"hub_node_main_15m\".timestamp"
            )
        );
    }

    #[test]
    fn tables_join_on_anchor() {
        let query = build_aggregate_query(
            "SUM(\"a\".\"x\" + \"b\".\"y\")",
            &["a".to_string(), "b".to_string()],
            "SELECT id FROM entity.node",
        )
        .unwrap();

        assert!(query.contains(
            "JOIN trend.\"b\" ON trend.\"b\".entity_id = e.id AND trend.\"b\".timestamp = trend.\"a\".timestamp"
        ));
        assert!(query.contains("GROUP BY trend.\"a\".timestamp"));
    }

    #[test]
    fn formula_without_trends() {
        let result = build_aggregate_query("1 + 1", &[], "SELECT 1");

        assert!(matches!(result, Err(Error::Input(_))));
    }
}
