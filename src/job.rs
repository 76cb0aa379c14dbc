use crate::measurement::{ParseMonthError, YearMonth};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which plant stream a dataset was sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Ingresso,
    Uscita,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Ingresso, Source::Uscita];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ingresso => "ingresso",
            Source::Uscita => "uscita",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown source '{0}' (expected ingresso or uscita)")]
pub struct ParseSourceError(pub String);

impl FromStr for Source {
    type Err = ParseSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ingresso" | "influent" | "in" => Ok(Source::Ingresso),
            "uscita" | "effluent" | "out" => Ok(Source::Uscita),
            _ => Err(ParseSourceError(s.to_string())),
        }
    }
}

/// One pending "average this parameter for this month" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationJob {
    pub parameter: String,
    pub source: Source,
    pub month: YearMonth,
}

impl AggregationJob {
    pub fn new(parameter: impl Into<String>, source: Source, month: YearMonth) -> Self {
        AggregationJob {
            parameter: parameter.into(),
            source,
            month,
        }
    }
}

impl fmt::Display for AggregationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.parameter, self.source, self.month)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseJobError {
    #[error("expected parameter:source:month, got '{0}'")]
    Shape(String),
    #[error("job has an empty parameter name")]
    EmptyParameter,
    #[error(transparent)]
    Source(#[from] ParseSourceError),
    #[error(transparent)]
    Month(#[from] ParseMonthError),
}

/// Parses `parameter:source:month`, e.g. `Fosforo:uscita:2025-02`.
/// Parameter names cannot contain `:`; the month is everything after the
/// second separator, so a full timestamp such as `2025-02-10 08:30` works.
impl FromStr for AggregationJob {
    type Err = ParseJobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');
        let (parameter, source, month) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(src), Some(m)) => (p, src, m),
            _ => return Err(ParseJobError::Shape(s.to_string())),
        };
        let parameter = parameter.trim();
        if parameter.is_empty() {
            return Err(ParseJobError::EmptyParameter);
        }
        Ok(AggregationJob {
            parameter: parameter.to_string(),
            source: source.parse()?,
            month: month.parse()?,
        })
    }
}

/// Jobs waiting for the next batch, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobList {
    jobs: Vec<AggregationJob>,
}

impl JobList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: AggregationJob) {
        self.jobs.push(job);
    }

    /// Removes the job at `index` (0-based); the remaining jobs keep their order.
    pub fn remove(&mut self, index: usize) -> Option<AggregationJob> {
        (index < self.jobs.len()).then(|| self.jobs.remove(index))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AggregationJob> {
        self.jobs.iter()
    }
}

impl FromIterator<AggregationJob> for JobList {
    fn from_iter<I: IntoIterator<Item = AggregationJob>>(iter: I) -> Self {
        JobList {
            jobs: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for JobList {
    type Item = AggregationJob;
    type IntoIter = std::vec::IntoIter<AggregationJob>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.into_iter()
    }
}

impl<'a> IntoIterator for &'a JobList {
    type Item = &'a AggregationJob;
    type IntoIter = std::slice::Iter<'a, AggregationJob>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}
