use crate::aggregator::{average, Average};
use crate::cell::CellAddress;
use crate::config::Settings;
use crate::error::{DatasetError, ReportError, ResolveError};
use crate::job::{AggregationJob, JobList, Source};
use crate::loader::FileKind;
use crate::mapping::CellMapping;
use crate::measurement::Dataset;
use crate::saving::copy_template;
use crate::spreadsheet::{ReportSink, Workbook};
use chrono::Local;
use log::{error, info, warn};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Where the batch runner gets measurements from.
pub trait DatasetSource {
    fn load(&self, source: Source) -> Result<Dataset, DatasetError>;
}

#[derive(Debug)]
pub enum JobOutcome {
    Written {
        cell: CellAddress,
        mean: f64,
        samples: usize,
    },
    /// No measurement of the parameter in that month; nothing was written.
    Skipped,
    Warning(ResolveError),
    Failed(DatasetError),
}

#[derive(Debug)]
pub struct JobReport {
    pub job: AggregationJob,
    pub outcome: JobOutcome,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            JobOutcome::Written { cell, mean, samples } => write!(
                f,
                "{}: wrote {} to {} ({} samples)",
                self.job, mean, cell, samples
            ),
            JobOutcome::Skipped => write!(f, "{}: no data, skipped", self.job),
            JobOutcome::Warning(e) => write!(f, "{}: warning: {}", self.job, e),
            JobOutcome::Failed(e) => write!(f, "{}: failed: {}", self.job, e),
        }
    }
}

/// Per-job results of a completed batch, in job order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<JobReport>,
    /// Emptied by a completed batch.
    pub jobs: JobList,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Written { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped))
    }

    pub fn warnings(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Warning(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} skipped, {} warning(s), {} failed",
            self.written(),
            self.skipped(),
            self.warnings(),
            self.failed()
        )
    }
}

/// The report could not be written or saved. The jobs come back untouched
/// so they can be retried.
#[derive(Error, Debug)]
#[error("batch aborted, {} job(s) returned to the list: {error}", .jobs.len())]
pub struct BatchFailure {
    #[source]
    pub error: ReportError,
    pub jobs: JobList,
}

fn run_job<D: DatasetSource + ?Sized>(
    job: &AggregationJob,
    datasets: &D,
    mapping: &CellMapping,
) -> Result<(CellAddress, Average), JobOutcome> {
    let cell = mapping
        .resolve(&job.parameter, job.source, job.month)
        .map_err(JobOutcome::Warning)?;
    let dataset = datasets.load(job.source).map_err(JobOutcome::Failed)?;
    Ok((cell, average(&dataset.records, &job.parameter, job.month)))
}

/// Run every job against `datasets` and write the results into `report`
///
/// Jobs run in insertion order. A job whose cell cannot be resolved, whose
/// dataset cannot be loaded or that has no data is reported and the batch
/// moves on. The report is saved once, after the last job; if a write or the
/// save fails, the whole job list is handed back in [`BatchFailure`].
pub fn run_batch<D, R>(
    jobs: JobList,
    datasets: &D,
    mapping: &CellMapping,
    report: &mut R,
) -> Result<BatchReport, BatchFailure>
where
    D: DatasetSource + ?Sized,
    R: ReportSink + ?Sized,
{
    info!("running batch of {} job(s)", jobs.len());
    let mut outcomes = Vec::with_capacity(jobs.len());
    let mut fatal = None;

    for job in &jobs {
        let outcome = match run_job(job, datasets, mapping) {
            Ok((_, Average::NoData)) => {
                info!("{}: no data", job);
                JobOutcome::Skipped
            }
            Ok((cell, Average::Value { mean, samples })) => {
                if let Err(e) = report.write_value(cell, mean) {
                    fatal = Some(e);
                    break;
                }
                info!("{}: {} -> {}", job, mean, cell);
                JobOutcome::Written { cell, mean, samples }
            }
            Err(outcome) => {
                match &outcome {
                    JobOutcome::Warning(e) => warn!("{}: {}", job, e),
                    JobOutcome::Failed(e) => error!("{}: {}", job, e),
                    _ => {}
                }
                outcome
            }
        };
        outcomes.push(JobReport {
            job: job.clone(),
            outcome,
        });
    }

    if let Some(error) = fatal {
        error!("batch aborted: {}", error);
        return Err(BatchFailure { error, jobs });
    }
    if let Err(error) = report.save() {
        error!("saving the report failed: {}", error);
        return Err(BatchFailure { error, jobs });
    }

    let batch = BatchReport {
        outcomes,
        jobs: JobList::new(),
    };
    info!("batch done: {}", batch);
    Ok(batch)
}

/// File-backed batch: copy the template, fill the copy, save it.
///
/// Returns the batch report together with the path of the filled copy. An
/// output that cannot be saved (xls, xlsm, xlsb, ods) is refused before the
/// template is copied or any job runs.
pub fn run_report(
    jobs: JobList,
    settings: &Settings,
    mapping: &CellMapping,
) -> Result<(BatchReport, PathBuf), BatchFailure> {
    let output = settings.output_path(Local::now().naive_local());
    if !FileKind::from_path(&output).is_some_and(FileKind::is_writable) {
        error!("cannot write report {}: unsupported format", output.display());
        return Err(BatchFailure {
            error: ReportError::Unsupported { path: output },
            jobs,
        });
    }
    let opened = copy_template(&settings.template, &output)
        .and_then(|_| Workbook::open(&output, settings.report_sheet.as_deref()));
    let mut workbook = match opened {
        Ok(workbook) => workbook,
        Err(error) => {
            error!("cannot prepare report {}: {}", output.display(), error);
            return Err(BatchFailure { error, jobs });
        }
    };

    let report = run_batch(jobs, &settings.datasets(), mapping, &mut workbook)?;
    Ok((report, output))
}
