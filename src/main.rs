#![cfg(not(tarpaulin_include))]

use clap::{Parser, Subcommand};
use costance::aggregator::average;
use costance::batch::{run_report, DatasetSource};
use costance::config::{load_config, DEFAULT_CONFIG_PATH};
use costance::job::{AggregationJob, JobList, Source};
use costance::loader::append_measurement;
use costance::measurement::{parse_sample_date, MeasurementRecord, YearMonth};
use costance::shell;
use log::info;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "costance")]
#[command(about = "Fill the monthly KPI report from laboratory measurement spreadsheets", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the monthly average of one parameter
    Average {
        #[arg(long)]
        source: Source,
        /// YYYY-MM, MM/YYYY or any day of the month
        #[arg(long)]
        month: YearMonth,
        parameter: String,
    },
    /// List the parameters found in a source dataset
    Parameters {
        #[arg(long)]
        source: Source,
    },
    /// Print every measurement of a source dataset
    Show {
        #[arg(long)]
        source: Source,
    },
    /// Append one measurement to a source dataset
    Append {
        #[arg(long)]
        source: Source,
        /// Sample date, DD/MM/YYYY
        #[arg(long, value_parser = parse_date_arg)]
        date: chrono::NaiveDate,
        #[arg(long, allow_negative_numbers = true)]
        value: f64,
        parameter: String,
    },
    /// Fill a copy of the report template, jobs given as parameter:source:month
    Run {
        #[arg(required = true)]
        jobs: Vec<AggregationJob>,
    },
    /// Interactive job queue
    Shell,
}

fn parse_date_arg(text: &str) -> Result<chrono::NaiveDate, String> {
    parse_sample_date(text).ok_or_else(|| format!("cannot read '{}' as DD/MM/YYYY", text))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = load_config(&cli.config)?;
    let datasets = settings.datasets();

    match cli.command {
        Command::Average {
            source,
            month,
            parameter,
        } => {
            let dataset = datasets.load(source)?;
            println!(
                "{} {} {}: {}",
                parameter,
                source,
                month,
                average(&dataset.records, &parameter, month)
            );
        }
        Command::Parameters { source } => {
            for parameter in datasets.load(source)?.parameters() {
                println!("{}", parameter);
            }
        }
        Command::Show { source } => {
            let dataset = datasets.load(source)?;
            println!("{:<12} {:<24} {:>12}", "date", "parameter", "value");
            for record in dataset.iter() {
                println!(
                    "{:<12} {:<24} {:>12}",
                    record.sampled_at.format("%d/%m/%Y"),
                    record.parameter,
                    record.value
                );
            }
        }
        Command::Append {
            source,
            date,
            value,
            parameter,
        } => {
            let record = MeasurementRecord::new(parameter, date, value);
            append_measurement(
                datasets.path(source),
                &settings.columns,
                settings.source_sheet.as_deref(),
                &record,
            )?;
            println!("appended to {}", datasets.path(source).display());
        }
        Command::Run { jobs } => {
            let mapping = settings.mapping()?;
            let jobs: JobList = jobs.into_iter().collect();
            let (report, output) = run_report(jobs, &settings, &mapping)?;
            for result in &report.outcomes {
                println!("{}", result);
            }
            println!("{}", report);
            println!("saved {}", output.display());
        }
        Command::Shell => {
            let mapping = settings.mapping()?;
            let stdin = io::stdin();
            let left = shell::run(&settings, &mapping, stdin.lock(), io::stdout())?;
            if !left.is_empty() {
                info!("{} job(s) left in the queue", left.len());
            }
        }
    }

    Ok(())
}
