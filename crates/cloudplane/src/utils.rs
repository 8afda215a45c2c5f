use anyhow::Context as _;
use cloudplane_core::{
    CloudError, FilterKey, Filters, PlanReport, ReconcileError, parse_key, suggestion,
};
use colored::Colorize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a spec file. JSON parses as YAML, so either works.
pub fn load_spec<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec file {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse spec file {}", path.display()))
}

/// Parse repeated `NAME=V1,V2` arguments against a kind's filter keys.
pub fn parse_filters<K: FilterKey>(raw: &[String], keys: &[K]) -> Result<Filters<K>, CloudError> {
    raw.iter().try_fold(Filters::new(), |filters, arg| {
        let (name, values) = arg.split_once('=').ok_or_else(|| {
            CloudError::InvalidFilter(format!("'{arg}' is not of the form NAME=VALUE[,VALUE...]"))
        })?;
        let key = parse_key(name.trim(), keys)?;
        filters.with(key, values.split(',').map(str::trim).filter(|v| !v.is_empty()))
    })
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Skipped steps and best-effort warnings, on stderr
pub fn print_report(report: &PlanReport) {
    let skipped = report.skipped();
    if !skipped.is_empty() {
        eprintln!("  skipped: {}", skipped.join(", ").dimmed());
    }
    for warning in report.warnings() {
        eprintln!(
            "  {} step `{}`: {}",
            "⚠".yellow(),
            warning.step,
            warning.error.as_deref().unwrap_or("failed")
        );
    }
}

/// Report a failure with whatever the user needs to recover, then exit.
pub fn fail(err: impl Into<ReconcileError>) -> ! {
    let err = err.into();
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(id) = err.persisted_id() {
        let kind = match &err {
            ReconcileError::PartiallyCreated { kind, .. }
            | ReconcileError::DeleteUnconfirmed { kind, .. } => *kind,
            _ => "object",
        };
        eprintln!(
            "  {} {kind} exists remotely; keep this id: {}",
            "!".yellow().bold(),
            id.to_string().cyan()
        );
    }
    if err.is_still_converging() {
        eprintln!("  The object is still converging; run the command again later.");
    }
    if let Some(hint) = err.cause().and_then(suggestion) {
        eprintln!("  {} {}", "Hint:".yellow(), hint);
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudplane_provider::{DiskKey, LiveDomainKey};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_filters() {
        let raw = vec![
            "zone=ap-guangzhou-3,ap-guangzhou-4".to_string(),
            "disk-type=CLOUD_SSD".to_string(),
        ];
        let filters = parse_filters(&raw, &[DiskKey::Zone, DiskKey::DiskType]).unwrap();

        assert_eq!(
            filters.values(DiskKey::Zone),
            Some(&["ap-guangzhou-3".to_string(), "ap-guangzhou-4".to_string()][..])
        );
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn test_parse_filters_rejects_unknown_name() {
        let raw = vec!["colour=blue".to_string()];
        let err = parse_filters(&raw, &[DiskKey::Zone]).unwrap_err();
        assert!(err.to_string().contains("unknown filter 'colour'"));
    }

    #[test]
    fn test_parse_filters_requires_equals() {
        let raw = vec!["DomainStatus".to_string()];
        let err = parse_filters(&raw, &[LiveDomainKey::DomainStatus]).unwrap_err();
        assert!(matches!(err, CloudError::InvalidFilter(_)));
    }

    #[test]
    fn test_load_spec_accepts_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "nightly", "disk_id": "disk-1"}}"#).unwrap();

        let spec: cloudplane_provider::SnapshotSpec = load_spec(file.path()).unwrap();
        assert_eq!(spec.disk_id, "disk-1");
    }
}
