use crate::error::ReportError;
use chrono::NaiveDateTime;
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Copies the report template to the working output file.
///
/// The template itself is never opened for writing. A missing template is
/// reported before anything is created.
pub fn copy_template(template: &Path, output: &Path) -> Result<(), ReportError> {
    if !template.is_file() {
        return Err(ReportError::TemplateNotFound {
            path: template.to_path_buf(),
        });
    }
    if output.exists() && same_file(template, output) {
        return Err(ReportError::OutputIsTemplate {
            path: output.to_path_buf(),
        });
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::copy(template, output).map_err(|source| ReportError::Io {
        path: output.to_path_buf(),
        source,
    })?;

    info!("copied template {} to {}", template.display(), output.display());
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Writes `bytes` to a temporary file next to `path` and renames it over
/// `path`, so readers never see a half-written file.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!("saved {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// `<stem>_<YYYYMMDD_HHMMSS>.<ext>` next to the template.
pub fn default_output_path(template: &Path, now: NaiveDateTime) -> PathBuf {
    let stem = template
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("report");
    let name = match template.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, now.format("%Y%m%d_%H%M%S"), ext),
        None => format!("{}_{}", stem, now.format("%Y%m%d_%H%M%S")),
    };
    template.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn missing_template_creates_nothing() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out").join("report.xlsx");
        let err = copy_template(&dir.path().join("nope.xlsx"), &output).unwrap_err();
        assert!(matches!(err, ReportError::TemplateNotFound { .. }));
        assert!(!output.exists());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn template_is_copied_not_moved() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("kpi.csv");
        fs::write(&template, "a,b\n").unwrap();
        let output = dir.path().join("runs").join("kpi_run.csv");

        copy_template(&template, &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "a,b\n");
        assert_eq!(fs::read_to_string(&template).unwrap(), "a,b\n");

        let err = copy_template(&template, &template).unwrap_err();
        assert!(matches!(err, ReportError::OutputIsTemplate { .. }));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        fs::write(&path, "old content that is longer").unwrap();
        write_atomically(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn output_name_carries_timestamp() {
        let now = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        assert_eq!(
            default_output_path(Path::new("reports/KPI_template.xlsx"), now),
            PathBuf::from("reports/KPI_template_20250301_090507.xlsx")
        );
    }
}
