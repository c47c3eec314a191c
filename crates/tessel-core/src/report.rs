//! Report lists collect user-facing messages produced while preparing or
//! running a render. Every report is mirrored to `tracing`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReportKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    pub message: String,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ReportKind::Info => "info",
            ReportKind::Warning => "warning",
            ReportKind::Error => "error",
        };
        write!(f, "{}: {}", label, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportList {
    reports: Vec<Report>,
}

impl ReportList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: ReportKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            ReportKind::Info => tracing::info!("{}", message),
            ReportKind::Warning => tracing::warn!("{}", message),
            ReportKind::Error => tracing::error!("{}", message),
        }
        self.reports.push(Report { kind, message });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.report(ReportKind::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.report(ReportKind::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.report(ReportKind::Error, message);
    }

    pub fn has_errors(&self) -> bool {
        self.reports.iter().any(|r| r.kind == ReportKind::Error)
    }

    /// Most recent error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.reports
            .iter()
            .rev()
            .find(|r| r.kind == ReportKind::Error)
            .map(|r| r.message.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_list_tracks_errors() {
        let mut reports = ReportList::new();
        reports.info("starting");
        assert!(!reports.has_errors());
        reports.error("No camera");
        reports.warning("late warning");
        assert!(reports.has_errors());
        assert_eq!(reports.last_error(), Some("No camera"));
        assert_eq!(reports.len(), 3);
    }

    #[test]
    fn test_report_display() {
        let report = Report {
            kind: ReportKind::Warning,
            message: "Setting scene alpha".into(),
        };
        assert_eq!(report.to_string(), "warning: Setting scene alpha");
    }
}
