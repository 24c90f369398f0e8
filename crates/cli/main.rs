use clap::{Command, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Generator, Shell};
use dotenv::dotenv;

use std::io;
use std::process::ExitCode;

pub mod commands;

use crate::commands::aggregate::AggregateOpt;
use crate::commands::aggregation::AggregationOpt;
use crate::commands::common::Cmd;

#[derive(Parser, Debug, PartialEq)]
#[command(version, about, name = "minerva", arg_required_else_help = true)]
struct Cli {
    #[arg(long = "generate", value_enum)]
    generator: Option<Shell>,
    #[arg(long = "env-file", help = "Path to a custom .env file")]
    env_file: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand, PartialEq)]
enum Commands {
    #[command(about = "Generate materializations and trend stores from aggregation definitions")]
    Aggregation(AggregationOpt),
    #[command(about = "Evaluate a formula over trends of a set of entities")]
    Aggregate(AggregateOpt),
}

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

fn main() -> ExitCode {
    env_logger::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    if let Some(env_file) = &cli.env_file {
        match dotenv::from_path(env_file) {
            Ok(_) => (),
            Err(e) => {
                eprintln!("Failed to load .env file from {env_file}: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        dotenv().ok();
    }

    if let Some(generator) = cli.generator {
        let mut cmd = Cli::command();

        print_completions(generator, &mut cmd);

        return ExitCode::SUCCESS;
    }

    let result = match cli.command {
        Some(Commands::Aggregation(aggregation)) => aggregation.run(),
        Some(Commands::Aggregate(aggregate)) => aggregate.run(),
        None => return ExitCode::FAILURE,
    };

    if let Err(e) = result {
        println!("{e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
