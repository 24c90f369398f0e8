use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use minerva::aggregation::{load_aggregation_definition, AggregationDefinition, DefinitionFormat};
use minerva::aggregation_generation::write_aggregation;
use minerva::error::ConfigurationError;
use minerva::instance::MinervaInstance;

use super::common::{Cmd, CmdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DefinitionFileFormat {
    Yaml,
    Json,
}

impl From<DefinitionFileFormat> for DefinitionFormat {
    fn from(value: DefinitionFileFormat) -> Self {
        match value {
            DefinitionFileFormat::Yaml => DefinitionFormat::Yaml,
            DefinitionFileFormat::Json => DefinitionFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregationKind {
    Entity,
    Time,
}

impl AggregationKind {
    fn matches(self, definition: &AggregationDefinition) -> bool {
        matches!(
            (self, definition),
            (AggregationKind::Entity, AggregationDefinition::EntityAggregation(_))
                | (AggregationKind::Time, AggregationDefinition::TimeAggregation(_))
        )
    }
}

#[derive(Debug, Parser, PartialEq)]
pub struct AggregationOpt {
    #[command(subcommand)]
    command: AggregationOptCommands,
}

#[derive(Debug, Subcommand, PartialEq)]
pub enum AggregationOptCommands {
    #[command(about = "compile an entity aggregation")]
    Entity(AggregationCompile),
    #[command(about = "compile a time aggregation")]
    Time(AggregationCompile),
}

impl Cmd for AggregationOpt {
    fn run(&self) -> CmdResult {
        match &self.command {
            AggregationOptCommands::Entity(compile) => compile.compile(AggregationKind::Entity),
            AggregationOptCommands::Time(compile) => compile.compile(AggregationKind::Time),
        }
    }
}

#[derive(Debug, Parser, PartialEq)]
pub struct AggregationCompile {
    #[arg(help = "aggregation definition file")]
    definition: PathBuf,
    #[arg(long, value_enum, help = "definition file format, derived from the extension by default")]
    format: Option<DefinitionFileFormat>,
    #[arg(short, long, help = "Minerva instance root directory")]
    instance_root: Option<PathBuf>,
}

impl AggregationCompile {
    fn compile(&self, kind: AggregationKind) -> CmdResult {
        let instance = MinervaInstance::load(self.instance_root.as_deref())?;

        let definition =
            load_aggregation_definition(&self.definition, self.format.map(DefinitionFormat::from))?;

        if !kind.matches(&definition) {
            return Err(ConfigurationError::from_msg(format!(
                "Definition '{}' is not a {} aggregation",
                self.definition.display(),
                match kind {
                    AggregationKind::Entity => "entity",
                    AggregationKind::Time => "time",
                }
            ))
            .into());
        }

        let summary = write_aggregation(&instance, &self.definition, &definition)?;

        println!(
            "Generated {} materialization(s) for trend store '{}'",
            summary.materialization_paths.len(),
            definition.name()
        );

        Ok(())
    }
}
