//! 试验存储接口
//!
//! 每个方法都是一个原子工作单元：实现方必须保证方法内部的
//! "读取-决策-写入"序列相对并发调用是串行化的，失败时不留下
//! 任何部分写入。

use async_trait::async_trait;
use chrono::NaiveDate;
use rtsm_core::{
    EnrollmentRequest, NewPack, Pack, Patient, PatientSummary, Randomization, Result,
};

use crate::selector::PackSelector;

/// 受试者与药包库存的持久化接口
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// 入组：分配受试者ID与站点内编号并插入记录。
    /// ID分配必须与并发入组串行化，两次并发入组不能得到相同ID。
    async fn enroll_patient(&self, site: &str, request: &EnrollmentRequest) -> Result<Patient>;

    /// 站点内全部未删除受试者
    async fn patients_for_site(&self, site: &str) -> Result<Vec<Patient>>;

    /// 可随机化受试者：Enrolled 且未分配药包
    async fn randomization_eligible(&self, site: &str) -> Result<Vec<PatientSummary>>;

    /// 可记录治疗完成的受试者：Randomized、已分配药包、完成日期为空
    async fn completion_eligible(&self, site: &str) -> Result<Vec<PatientSummary>>;

    /// 可紧急揭盲的受试者：未揭盲且未完成治疗
    async fn code_break_eligible(&self, site: &str) -> Result<Vec<PatientSummary>>;

    /// 站点内已揭盲的受试者
    async fn code_broken_patients(&self, site: &str) -> Result<Vec<Patient>>;

    /// 记录筛选失败
    async fn record_screen_failure(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient>;

    /// 随机化：锁定受试者与站点内可用药包，选包并原子更新双方。
    /// 无可用药包时返回NoSupply且不产生任何修改。
    async fn randomize_patient(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
        selector: &dyn PackSelector,
    ) -> Result<Randomization>;

    /// 记录治疗完成
    async fn complete_treatment(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient>;

    /// 记录紧急揭盲
    async fn record_code_break(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient>;

    /// 站点内可用药包
    async fn available_packs(&self, site: &str) -> Result<Vec<Pack>>;

    /// 批量写入预生成的药包（供应步骤，不在热路径上）
    async fn insert_packs(&self, packs: Vec<NewPack>) -> Result<u64>;

    /// 下一个全局发货单编号，如 CON-BYL001（供物流模块消费）
    async fn next_consignment_id(&self) -> Result<String>;
}
