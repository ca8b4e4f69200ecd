//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use rtsm_core::{Pack, PackStatus, Patient, PatientStatus};
use sqlx::FromRow;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库受试者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: String,
    pub display_name: String,
    pub status: String, // 存储为字符串，转换为PatientStatus枚举
    pub site: String,
    pub enrollment_date: NaiveDate,
    pub informed_consent_date: NaiveDate,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub treatment: String,
    pub screen_failure_date: Option<NaiveDate>,
    pub assigned_pack_id: Option<String>,
    pub treatment_completion_date: Option<NaiveDate>,
    pub code_break_date: Option<NaiveDate>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: db_patient.id,
            display_name: db_patient.display_name,
            status: PatientStatus::parse(&db_patient.status)
                .unwrap_or(PatientStatus::Enrolled), // 未知状态按初始状态处理
            site: db_patient.site,
            enrollment_date: db_patient.enrollment_date,
            informed_consent_date: db_patient.informed_consent_date,
            date_of_birth: db_patient.date_of_birth,
            gender: db_patient.gender,
            treatment: db_patient.treatment,
            screen_failure_date: db_patient.screen_failure_date,
            assigned_pack_id: db_patient.assigned_pack_id,
            treatment_completion_date: db_patient.treatment_completion_date,
            code_break_date: db_patient.code_break_date,
            is_deleted: db_patient.is_deleted,
            created_at: db_patient.created_at,
            updated_at: db_patient.updated_at,
        }
    }
}

/// 数据库药包表
#[derive(Debug, FromRow)]
pub struct DbPack {
    pub pack_number: String,
    pub pack_type: String,
    pub status: String, // 存储为状态编码，转换为PackStatus枚举
    pub location: String,
    pub allocation_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<DbPack> for Pack {
    fn from(db_pack: DbPack) -> Self {
        Pack {
            pack_number: db_pack.pack_number,
            pack_type: db_pack.pack_type,
            status: PackStatus::parse(&db_pack.status).unwrap_or(PackStatus::Quarantined), // 未知编码按隔离处理，绝不误判为可用
            location: db_pack.location,
            allocation_date: db_pack.allocation_date,
            created_at: db_pack.created_at,
        }
    }
}
