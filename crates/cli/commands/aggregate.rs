use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser};

use minerva::aggregate::{get_aggregate_data, get_aggregate_shard, AggregateValue};
use minerva::error::InputError;
use minerva::granularity::Granularity;
use minerva::interval::Interval;
use minerva::partition::parse_timestamp;

use super::common::{block_on, connect_db, Cmd, CmdResult};

#[derive(Debug, Parser, PartialEq)]
#[command(group(ArgGroup::new("range").required(true).args(["start", "shard"])))]
pub struct AggregateOpt {
    #[arg(long, help = "id of the entity type the trends belong to")]
    entity_type_id: i32,
    #[arg(long, help = "granularity of the trends")]
    granularity: String,
    #[arg(long, help = "query returning the ids of the entities to aggregate")]
    entities: String,
    #[arg(long, help = "formula to evaluate, e.g. 'SUM(power)'")]
    formula: String,
    #[arg(long, requires = "end", help = "start of the period (exclusive)")]
    start: Option<String>,
    #[arg(long, requires = "start", help = "end of the period (inclusive)")]
    end: Option<String>,
    #[arg(long, conflicts_with_all = ["start", "end"], help = "index of the shard to aggregate")]
    shard: Option<i64>,
}

fn utc_timestamp(value: &str) -> Result<DateTime<Utc>, minerva::error::Error> {
    Ok(parse_timestamp(value)?.with_timezone(&Utc))
}

impl AggregateOpt {
    async fn aggregate(&self) -> CmdResult {
        let granularity: Granularity = Interval::parse(&self.granularity)?;

        let client = connect_db().await?;

        let values = match (&self.start, &self.end, self.shard) {
            (_, _, Some(shard)) => {
                get_aggregate_shard(
                    &client,
                    &self.entities,
                    self.entity_type_id,
                    &granularity,
                    &self.formula,
                    shard,
                )
                .await?
            }
            (Some(start), Some(end), None) => {
                let start = utc_timestamp(start)?;
                let end = utc_timestamp(end)?;

                get_aggregate_data(
                    &client,
                    &self.entities,
                    self.entity_type_id,
                    &granularity,
                    &self.formula,
                    &start,
                    &end,
                )
                .await?
            }
            _ => {
                return Err(InputError::from_msg(
                    "Specify either a period or a shard".to_string(),
                )
                .into())
            }
        };

        print_values(&values);

        Ok(())
    }
}

fn print_values(values: &[AggregateValue]) {
    let mut table = comfy_table::Table::new();
    let style = "     ═╪ ┆          ";
    table.load_preset(style);
    table.set_header(vec!["Timestamp", "Value"]);

    for value in values {
        table.add_row(vec![
            value.timestamp.to_rfc3339(),
            value.value.map(|v| v.to_string()).unwrap_or_default(),
        ]);
    }

    println!("{table}");
}

impl Cmd for AggregateOpt {
    fn run(&self) -> CmdResult {
        // Timestamps are checked before connecting to the database
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            utc_timestamp(start)?;
            utc_timestamp(end)?;
        }

        block_on(self.aggregate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGS: [&str; 9] = [
        "aggregate",
        "--entity-type-id",
        "3",
        "--granularity",
        "15m",
        "--entities",
        "SELECT id FROM entity.node",
        "--formula",
        "SUM(power)",
    ];

    #[test]
    fn parse_period() {
        let opt = AggregateOpt::try_parse_from(ARGS.iter().chain(&[
            "--start",
            "2024-03-01T00:00:00+00:00",
            "--end",
            "2024-03-02T00:00:00+00:00",
        ]))
        .unwrap();

        assert_eq!(opt.entity_type_id, 3);
        assert_eq!(opt.start.as_deref(), Some("2024-03-01T00:00:00+00:00"));
        assert_eq!(opt.shard, None);
    }

    #[test]
    fn parse_shard() {
        let opt = AggregateOpt::try_parse_from(ARGS.iter().chain(&["--shard", "19783"])).unwrap();

        assert_eq!(opt.shard, Some(19783));
    }

    #[test]
    fn range_is_required() {
        assert!(AggregateOpt::try_parse_from(ARGS).is_err());
        assert!(AggregateOpt::try_parse_from(ARGS.iter().chain(&["--start", "2024-03-01T00:00:00Z"])).is_err());
        assert!(AggregateOpt::try_parse_from(
            ARGS.iter()
                .chain(&["--shard", "1", "--start", "2024-03-01T00:00:00Z", "--end", "2024-03-02T00:00:00Z"])
        )
        .is_err());
    }

    #[test]
    fn naive_timestamp_is_rejected_before_connecting() {
        let opt = AggregateOpt::try_parse_from(ARGS.iter().chain(&[
            "--start",
            "2024-03-01 00:00:00",
            "--end",
            "2024-03-02T00:00:00+00:00",
        ]))
        .unwrap();

        assert!(matches!(opt.run(), Err(minerva::error::Error::Input(_))));
    }
}
