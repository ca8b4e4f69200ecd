//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 受试者记录
///
/// 受试者入组后创建，只做软删除，不做物理删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,           // 全局唯一ID，格式 PAT001
    pub display_name: String, // 站点内编号，格式 <站点代码>001
    pub status: PatientStatus,
    pub site: String, // 入组时由注册用户的站点确定，之后不可变
    pub enrollment_date: NaiveDate,
    pub informed_consent_date: NaiveDate,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub treatment: String, // 随机化前为 "Pending"，之后为药包类型标签
    pub screen_failure_date: Option<NaiveDate>, // 一次性写入
    pub assigned_pack_id: Option<String>, // 一次性写入，永不清除
    pub treatment_completion_date: Option<NaiveDate>, // 一次性写入
    pub code_break_date: Option<NaiveDate>, // 一次性写入，紧急揭盲日期
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 受试者生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PatientStatus {
    Enrolled,           // 已入组
    ScreenFailure,      // 筛选失败（终态）
    Randomized,         // 已随机化
    TreatmentCompleted, // 治疗完成（终态）
    CodeBroken,         // 已紧急揭盲
}

impl PatientStatus {
    /// 持久化时使用的状态字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientStatus::Enrolled => "Enrolled",
            PatientStatus::ScreenFailure => "Screen Failure",
            PatientStatus::Randomized => "Randomized",
            PatientStatus::TreatmentCompleted => "Treatment Completed",
            PatientStatus::CodeBroken => "Code Broken",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Enrolled" => Some(PatientStatus::Enrolled),
            "Screen Failure" => Some(PatientStatus::ScreenFailure),
            "Randomized" => Some(PatientStatus::Randomized),
            "Treatment Completed" => Some(PatientStatus::TreatmentCompleted),
            "Code Broken" => Some(PatientStatus::CodeBroken),
            _ => None,
        }
    }
}

impl std::fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 药包记录
///
/// 由一次性的供应脚本预先生成，随机化时被消耗，永不删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pack {
    pub pack_number: String, // 唯一编号，格式 BYL001，不可变
    pub pack_type: String,   // 盲态治疗类别 (PLACEBO, 10_MG 等)，不可变
    pub status: PackStatus,
    pub location: String, // 当前所在位置："Depot" 或站点代码
    pub allocation_date: Option<NaiveDate>, // 随机化分配日期
    pub created_at: DateTime<Utc>,
}

/// 药包状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PackStatus {
    Available,   // 可用 (A)
    InTransit,   // 运输中 (B)，由物流模块设置
    Allocated,   // 已分配给受试者
    Damaged,     // 已损坏 (D)
    Quarantined, // 已隔离 (Q)
}

impl PackStatus {
    /// 持久化时使用的状态编码
    pub fn as_code(&self) -> &'static str {
        match self {
            PackStatus::Available => "A",
            PackStatus::InTransit => "B",
            PackStatus::Allocated => "Allocated",
            PackStatus::Damaged => "D",
            PackStatus::Quarantined => "Q",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "A" => Some(PackStatus::Available),
            "B" => Some(PackStatus::InTransit),
            "Allocated" => Some(PackStatus::Allocated),
            "D" => Some(PackStatus::Damaged),
            "Q" => Some(PackStatus::Quarantined),
            _ => None,
        }
    }
}

/// 药库位置标识
pub const DEPOT_LOCATION: &str = "Depot";

/// 随机化前的治疗标签
pub const TREATMENT_PENDING: &str = "Pending";

/// 新药包插入模型（供应规划产物）
#[derive(Debug, Clone)]
pub struct NewPack {
    pub pack_number: String,
    pub pack_type: String,
    pub location: String,
    pub status: PackStatus,
}

/// 入组请求
///
/// 字段名与前端JSON负载保持一致。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub username: String,
    pub informed_consent_date: NaiveDate,
    pub enrollment_date: NaiveDate,
    pub date_of_birth: NaiveDate,
    pub gender: String,
}

impl EnrollmentRequest {
    /// 入组前的输入校验，失败的请求不会触达存储层
    pub fn validate(&self) -> crate::Result<()> {
        if self.username.trim().is_empty() {
            return Err(crate::RtsmError::Validation("Missing field: username".into()));
        }
        if self.gender.trim().is_empty() {
            return Err(crate::RtsmError::Validation("Missing field: gender".into()));
        }
        if self.date_of_birth > self.enrollment_date {
            return Err(crate::RtsmError::Validation(
                "Date of birth cannot be after enrollment date".into(),
            ));
        }
        Ok(())
    }
}

/// 筛选失败请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenFailureRequest {
    pub username: String,
    pub patient_id: String,
    pub screen_failure_date: NaiveDate,
}

/// 随机化请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomizationRequest {
    pub username: String,
    pub patient_id: String,
}

/// 治疗完成请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentCompletionRequest {
    pub username: String,
    pub patient_id: String,
    pub completion_date: NaiveDate,
}

/// 紧急揭盲请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBreakRequest {
    pub username: String,
    pub patient_id: String,
    pub code_break_date: NaiveDate,
}

/// 列表场景下的受试者摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSummary {
    pub id: String,
    pub display_name: String,
}

impl From<&Patient> for PatientSummary {
    fn from(patient: &Patient) -> Self {
        PatientSummary {
            id: patient.id.clone(),
            display_name: patient.display_name.clone(),
        }
    }
}

/// 随机化结果：受试者与药包的配对
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Randomization {
    pub patient: Patient,
    pub pack: Pack,
}
