//! Database row models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strata_core::{PartitionEntry, Phase, Program, ProgramId, Site, SiteId, TenantId};
use uuid::Uuid;

/// Program row; phases are stored as a JSON array
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProgramModel {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub phases: sqlx::types::Json<Vec<Phase>>,
}

impl From<ProgramModel> for Program {
    fn from(m: ProgramModel) -> Self {
        Program {
            id: ProgramId::from_uuid(m.id),
            tenant_id: TenantId::new(m.tenant_id),
            name: m.name,
            start_date: m.start_date,
            end_date: m.end_date,
            phases: m.phases.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SiteModel {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
}

impl From<SiteModel> for Site {
    fn from(m: SiteModel) -> Self {
        Site {
            id: SiteId::from_uuid(m.id),
            program_id: ProgramId::from_uuid(m.program_id),
            name: m.name,
        }
    }
}

/// Partition registry row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PartitionRegistryModel {
    pub partition_name: String,
    pub table_name: String,
    pub level: String,
    pub partition_key_value: String,
    pub parent_partition: String,
    pub program_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub range_start: Option<DateTime<Utc>>,
    pub range_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub row_count_estimate: i64,
}

impl TryFrom<PartitionRegistryModel> for PartitionEntry {
    type Error = crate::Error;

    fn try_from(m: PartitionRegistryModel) -> crate::Result<Self> {
        Ok(PartitionEntry {
            level: m.level.parse()?,
            table_name: m.table_name,
            partition_name: m.partition_name,
            partition_key_value: m.partition_key_value,
            parent_partition: m.parent_partition,
            program_id: m.program_id.map(ProgramId::from_uuid),
            site_id: m.site_id.map(SiteId::from_uuid),
            range_start: m.range_start,
            range_end: m.range_end,
            created_at: m.created_at,
            row_count_estimate: m.row_count_estimate,
        })
    }
}
