use crate::aggregator::average;
use crate::batch::{run_report, DatasetSource};
use crate::config::Settings;
use crate::job::{AggregationJob, JobList, Source};
use crate::mapping::CellMapping;
use crate::measurement::YearMonth;
use log::debug;
use std::io::{self, BufRead, Write};

const HELP: &str = "Commands:
  add <parameter:source:month>        Queue a job, e.g. add Cod:uscita:2025-02
  remove <n>                          Remove job number n from the queue
  list                                Show the queued jobs
  run                                 Fill a copy of the report template with all queued jobs
  average <source> <month> <param>    Print one monthly average
  params <source>                     List the parameters found in a source dataset
  help                                Show this help
  q                                   Quit";

/// Interactive job queue. Keeps the queue between commands; `run` consumes
/// it, and gives it back when the report cannot be written.
pub struct Session<'a> {
    settings: &'a Settings,
    mapping: &'a CellMapping,
    jobs: JobList,
    status: String,
}

impl<'a> Session<'a> {
    pub fn new(settings: &'a Settings, mapping: &'a CellMapping) -> Self {
        Session {
            settings,
            mapping,
            jobs: JobList::new(),
            status: String::from("ok"),
        }
    }

    pub fn jobs(&self) -> &JobList {
        &self.jobs
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Executes one command line. Returns `false` when the session should end.
    pub fn execute<W: Write>(&mut self, command: &str, out: &mut W) -> io::Result<bool> {
        let command = command.trim();
        let (verb, rest) = match command.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (command, ""),
        };
        debug!("shell command '{}'", command);

        match verb {
            "" => self.status = String::from("invalid command"),
            "q" => return Ok(false),
            "help" => {
                writeln!(out, "{}", HELP)?;
                self.status = String::from("ok");
            }
            "add" => match rest.parse::<AggregationJob>() {
                Ok(job) => {
                    writeln!(out, "queued #{} {}", self.jobs.len() + 1, job)?;
                    self.jobs.push(job);
                    self.status = String::from("ok");
                }
                Err(e) => self.status = e.to_string(),
            },
            "remove" => {
                let removed = rest
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| self.jobs.remove(i));
                match removed {
                    Some(job) => {
                        writeln!(out, "removed {}", job)?;
                        self.status = String::from("ok");
                    }
                    None => self.status = format!("no job number '{}'", rest),
                }
            }
            "list" => {
                if self.jobs.is_empty() {
                    writeln!(out, "no jobs queued")?;
                }
                for (i, job) in self.jobs.iter().enumerate() {
                    writeln!(out, "{:>3}. {}", i + 1, job)?;
                }
                self.status = String::from("ok");
            }
            "run" => self.run(out)?,
            "average" => self.average(rest, out)?,
            "params" => match rest.parse::<Source>() {
                Ok(source) => match self.settings.datasets().load(source) {
                    Ok(dataset) => {
                        for parameter in dataset.parameters() {
                            writeln!(out, "{}", parameter)?;
                        }
                        self.status = String::from("ok");
                    }
                    Err(e) => self.status = e.to_string(),
                },
                Err(e) => self.status = e.to_string(),
            },
            _ => self.status = String::from("invalid command"),
        }
        Ok(true)
    }

    fn run<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.jobs.is_empty() {
            self.status = String::from("no jobs queued");
            return Ok(());
        }
        let jobs = std::mem::take(&mut self.jobs);
        match run_report(jobs, self.settings, self.mapping) {
            Ok((report, output)) => {
                for result in &report.outcomes {
                    writeln!(out, "{}", result)?;
                }
                writeln!(out, "saved {}", output.display())?;
                self.status = report.to_string();
                self.jobs = report.jobs;
            }
            Err(failure) => {
                self.status = failure.to_string();
                self.jobs = failure.jobs;
            }
        }
        Ok(())
    }

    fn average<W: Write>(&mut self, args: &str, out: &mut W) -> io::Result<()> {
        let mut parts = args.splitn(3, char::is_whitespace);
        let (Some(source), Some(month), Some(parameter)) = (parts.next(), parts.next(), parts.next())
        else {
            self.status = String::from("usage: average <source> <month> <parameter>");
            return Ok(());
        };

        let parsed = source
            .parse::<Source>()
            .map_err(|e| e.to_string())
            .and_then(|s| month.parse::<YearMonth>().map(|m| (s, m)).map_err(|e| e.to_string()));
        let (source, month) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                self.status = e;
                return Ok(());
            }
        };

        match self.settings.datasets().load(source) {
            Ok(dataset) => {
                let parameter = parameter.trim();
                writeln!(
                    out,
                    "{} {} {}: {}",
                    parameter,
                    source,
                    month,
                    average(&dataset.records, parameter, month)
                )?;
                self.status = String::from("ok");
            }
            Err(e) => self.status = e.to_string(),
        }
        Ok(())
    }
}

/// Runs the interactive loop until `q` or end of input
///
/// # Arguments
/// * `settings` - Loaded configuration
/// * `mapping` - Parameter to row table used by `run`
/// * `input` - Command lines
/// * `out` - Where prompts and results go
///
/// # Returns
/// * `io::Result<JobList>` - Jobs still queued when the session ended
pub fn run<R: BufRead, W: Write>(
    settings: &Settings,
    mapping: &CellMapping,
    mut input: R,
    mut out: W,
) -> io::Result<JobList> {
    let mut session = Session::new(settings, mapping);
    loop {
        write!(out, "({}) > ", session.status())?;
        out.flush()?;

        let mut command = String::new();
        if input.read_line(&mut command)? == 0 {
            break;
        }
        if !session.execute(&command, &mut out)? {
            break;
        }
    }
    Ok(session.jobs)
}
