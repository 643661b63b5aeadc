//! Fluent builders for test programs and observations

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use strata_core::{
    NewObservation, ObservationRow, Phase, Program, ProgramId, RecordId, SeriesKind, Site,
    SiteId, SubmissionId, TenantId,
};

/// Builder for [`Program`]; defaults to a January..March 2024 span with no phases
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new(tenant_id: &TenantId) -> Self {
        Self {
            program: Program {
                id: ProgramId::new(),
                tenant_id: tenant_id.clone(),
                name: "test-program".to_string(),
                start_date: date(2024, 1, 1),
                end_date: date(2024, 3, 31),
                phases: Vec::new(),
            },
        }
    }

    pub fn id(mut self, id: ProgramId) -> Self {
        self.program.id = id;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.program.name = name.to_string();
        self
    }

    /// Inclusive date span
    pub fn span(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.program.start_date = start;
        self.program.end_date = end;
        self
    }

    pub fn phase(mut self, name: &str, start: NaiveDate, end: NaiveDate) -> Self {
        self.program.phases.push(Phase::new(name, start, end));
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}

/// Builder for [`NewObservation`] and flat rows
#[derive(Clone)]
pub struct ObservationBuilder {
    observation: NewObservation,
}

impl ObservationBuilder {
    pub fn petri(program: &Program, site: &Site) -> Self {
        Self::new(SeriesKind::Petri, program, site.id)
    }

    pub fn gasifier(program: &Program, site: &Site) -> Self {
        Self::new(SeriesKind::Gasifier, program, site.id)
    }

    pub fn new(kind: SeriesKind, program: &Program, site_id: SiteId) -> Self {
        Self {
            observation: NewObservation {
                kind,
                tenant_id: program.tenant_id.clone(),
                program_id: program.id,
                site_id,
                submission_id: SubmissionId::new(),
                series_code: "series-1".to_string(),
                observed_at: at(2024, 1, 10),
                value: 0.0,
                measured_rate: None,
                target_rate: None,
                remaining_material: None,
                notes: None,
            },
        }
    }

    pub fn series(mut self, code: &str) -> Self {
        self.observation.series_code = code.to_string();
        self
    }

    pub fn observed_at(mut self, ts: DateTime<Utc>) -> Self {
        self.observation.observed_at = ts;
        self
    }

    pub fn value(mut self, value: f64) -> Self {
        self.observation.value = value;
        self
    }

    /// Measured and target consumption rates
    pub fn rates(mut self, measured: f64, target: f64) -> Self {
        self.observation.measured_rate = Some(measured);
        self.observation.target_rate = Some(target);
        self
    }

    pub fn measured_rate(mut self, measured: f64) -> Self {
        self.observation.measured_rate = Some(measured);
        self
    }

    pub fn remaining(mut self, remaining: f64) -> Self {
        self.observation.remaining_material = Some(remaining);
        self
    }

    pub fn submission(mut self, submission_id: SubmissionId) -> Self {
        self.observation.submission_id = submission_id;
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.observation.tenant_id = tenant_id;
        self
    }

    pub fn notes(mut self, notes: &str) -> Self {
        self.observation.notes = Some(notes.to_string());
        self
    }

    pub fn build(self) -> NewObservation {
        self.observation
    }

    /// Render as a legacy flat row with a fresh record id
    pub fn row(self) -> ObservationRow {
        self.observation
            .into_row(RecordId::new(), None, Utc::now())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Midday UTC on the given date
pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}
