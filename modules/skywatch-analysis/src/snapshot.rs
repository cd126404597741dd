use chrono::{DateTime, Utc};

use skywatch_common::Report;

/// Read-only view of the report corpus taken at the start of a run.
/// Detectors share this snapshot and never mutate it, so they can run
/// independently of each other within one invocation.
#[derive(Debug, Clone)]
pub struct ReportSnapshot {
    reports: Vec<Report>,
    taken_at: DateTime<Utc>,
}

impl ReportSnapshot {
    pub fn new(reports: Vec<Report>, taken_at: DateTime<Utc>) -> Self {
        Self { reports, taken_at }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn all(&self) -> &[Report] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Reports with real coordinates.
    pub fn geocoded(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter().filter(|r| r.coords().is_some())
    }

    /// Reports with any event date, approximate or not.
    pub fn dated(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter().filter(|r| r.event_at.is_some())
    }

    /// Reports with a precise (non-approximate) event date. Wave candidacy
    /// requires these.
    pub fn precisely_dated(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter().filter(|r| r.precise_event_at().is_some())
    }
}
