//! Programs, their phases, and sites
//!
//! Programs and sites are provisioned by an external collaborator. This crate
//! only needs enough of their shape to drive partition pre-creation (the
//! program's date span and its sites) and to stamp the active phase on new
//! observations.

use crate::ids::{ProgramId, SiteId, TenantId};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A named phase of a program, active over an inclusive date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Phase {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            start_date,
            end_date,
        }
    }

    /// Whether `date` falls inside this phase (both ends inclusive)
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

/// A program owns sites and a first-level partition segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub tenant_id: TenantId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Ordered by start date
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl Program {
    /// Return the phase active on `date`, if any.
    ///
    /// Phases are expected not to overlap; when they do, the first listed wins.
    pub fn phase_at(&self, date: NaiveDate) -> Option<&Phase> {
        self.phases.iter().find(|p| p.contains(date))
    }

    /// First day of every month touched by the program's date span, in order.
    ///
    /// An inverted span (end before start) yields only the start month.
    pub fn month_starts(&self) -> Vec<NaiveDate> {
        let first = crate::partition::first_of_month(self.start_date);
        let last = crate::partition::first_of_month(self.end_date.max(self.start_date));

        let mut months = Vec::new();
        let mut current = first;
        while current <= last {
            months.push(current);
            current = crate::partition::next_month(current);
        }
        months
    }
}

/// A site belongs to exactly one program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub program_id: ProgramId,
    pub name: String,
}

impl Site {
    pub fn new(program_id: ProgramId, name: impl Into<String>) -> Self {
        Self {
            id: SiteId::new(),
            program_id,
            name: name.into(),
        }
    }
}

/// Describe a month in `YYYY-MM` form
pub fn month_label(month: NaiveDate) -> String {
    format!("{:04}-{:02}", month.year(), month.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn program(start: NaiveDate, end: NaiveDate) -> Program {
        Program {
            id: ProgramId::new(),
            tenant_id: TenantId::new("acme"),
            name: "trial".to_string(),
            start_date: start,
            end_date: end,
            phases: vec![
                Phase::new("control", date(2024, 1, 1), date(2024, 1, 31)),
                Phase::new("treatment", date(2024, 2, 1), date(2024, 3, 15)),
            ],
        }
    }

    #[test]
    fn test_phase_at() {
        let p = program(date(2024, 1, 1), date(2024, 3, 15));
        assert_eq!(p.phase_at(date(2024, 1, 31)).unwrap().name, "control");
        assert_eq!(p.phase_at(date(2024, 2, 1)).unwrap().name, "treatment");
        assert!(p.phase_at(date(2024, 4, 1)).is_none());
    }

    #[test]
    fn test_month_starts_spans_year_boundary() {
        let p = program(date(2023, 11, 20), date(2024, 2, 3));
        let months = p.month_starts();
        assert_eq!(
            months,
            vec![
                date(2023, 11, 1),
                date(2023, 12, 1),
                date(2024, 1, 1),
                date(2024, 2, 1)
            ]
        );
    }

    #[test]
    fn test_month_starts_inverted_span() {
        let p = program(date(2024, 5, 10), date(2024, 1, 1));
        assert_eq!(p.month_starts(), vec![date(2024, 5, 1)]);
    }

    #[test]
    fn test_month_label() {
        assert_eq!(month_label(date(2024, 3, 1)), "2024-03");
    }
}
