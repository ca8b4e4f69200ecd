//! 试验操作引擎
//!
//! 面向调用方的统一入口：校验输入、解析调用者站点、委托存储层
//! 执行原子变更，并把所有领域守卫失败转换为结构化错误返回。
//! 没有任何操作会导致进程失败。

use chrono::Utc;
use rtsm_core::{
    CodeBreakRequest, EnrollmentRequest, Pack, Patient, PatientSummary, Randomization,
    RandomizationRequest, Result, RtsmError, ScreenFailureRequest, TreatmentCompletionRequest,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::directory::SiteDirectory;
use crate::provision::{plan_provisioning, TypeBoundary};
use crate::selector::PackSelector;
use crate::store::TrialStore;

/// 试验操作引擎
pub struct TrialEngine {
    store: Arc<dyn TrialStore>,
    directory: Arc<dyn SiteDirectory>,
    selector: Arc<dyn PackSelector>,
}

impl TrialEngine {
    pub fn new(
        store: Arc<dyn TrialStore>,
        directory: Arc<dyn SiteDirectory>,
        selector: Arc<dyn PackSelector>,
    ) -> Self {
        Self {
            store,
            directory,
            selector,
        }
    }

    /// 列表操作的站点解析：用户无站点时返回None，由调用方返回空结果
    async fn site_for_listing(&self, username: &str) -> Result<Option<String>> {
        let site = self.directory.site_for_user(username).await?;
        if site.is_none() {
            warn!("User '{}' not found or has no associated site", username);
        }
        Ok(site)
    }

    /// 变更操作的站点解析：用户无站点时直接拒绝
    async fn site_for_mutation(&self, username: &str) -> Result<String> {
        self.directory
            .site_for_user(username)
            .await?
            .ok_or_else(|| {
                RtsmError::NotFound(format!(
                    "User '{}' not found or has no associated site",
                    username
                ))
            })
    }

    /// 入组新受试者
    pub async fn enroll(&self, request: &EnrollmentRequest) -> Result<Patient> {
        request.validate()?;
        let site = self.site_for_mutation(&request.username).await?;

        let patient = self.store.enroll_patient(&site, request).await?;
        info!(
            "Enrolled patient {} ({}) at site {}",
            patient.id, patient.display_name, site
        );
        Ok(patient)
    }

    /// 站点内全部受试者
    pub async fn patients(&self, username: &str) -> Result<Vec<Patient>> {
        match self.site_for_listing(username).await? {
            Some(site) => self.store.patients_for_site(&site).await,
            None => Ok(Vec::new()),
        }
    }

    /// 记录筛选失败
    pub async fn record_screen_failure(&self, request: &ScreenFailureRequest) -> Result<Patient> {
        ensure_patient_id(&request.patient_id)?;
        let site = self.site_for_mutation(&request.username).await?;

        let patient = self
            .store
            .record_screen_failure(&site, &request.patient_id, request.screen_failure_date)
            .await
            .map_err(|e| log_rejection("screen failure", &request.patient_id, e))?;
        info!("Recorded screen failure for patient {}", patient.id);
        Ok(patient)
    }

    /// 可随机化受试者列表
    pub async fn randomization_eligible(&self, username: &str) -> Result<Vec<PatientSummary>> {
        match self.site_for_listing(username).await? {
            Some(site) => self.store.randomization_eligible(&site).await,
            None => Ok(Vec::new()),
        }
    }

    /// 站点内可用药包列表
    pub async fn available_packs(&self, username: &str) -> Result<Vec<Pack>> {
        match self.site_for_listing(username).await? {
            Some(site) => self.store.available_packs(&site).await,
            None => Ok(Vec::new()),
        }
    }

    /// 随机化受试者：从站点可用药包中随机选取并原子配对
    pub async fn randomize(&self, request: &RandomizationRequest) -> Result<Randomization> {
        ensure_patient_id(&request.patient_id)?;
        let site = self.site_for_mutation(&request.username).await?;

        let outcome = self
            .store
            .randomize_patient(
                &site,
                &request.patient_id,
                Utc::now().date_naive(),
                self.selector.as_ref(),
            )
            .await
            .map_err(|e| log_rejection("randomization", &request.patient_id, e))?;
        info!(
            "Randomized patient {} to pack {} at site {}",
            outcome.patient.id, outcome.pack.pack_number, site
        );
        Ok(outcome)
    }

    /// 可记录治疗完成的受试者列表
    pub async fn completion_eligible(&self, username: &str) -> Result<Vec<PatientSummary>> {
        match self.site_for_listing(username).await? {
            Some(site) => self.store.completion_eligible(&site).await,
            None => Ok(Vec::new()),
        }
    }

    /// 记录治疗完成
    pub async fn complete_treatment(
        &self,
        request: &TreatmentCompletionRequest,
    ) -> Result<Patient> {
        ensure_patient_id(&request.patient_id)?;
        let site = self.site_for_mutation(&request.username).await?;

        let patient = self
            .store
            .complete_treatment(&site, &request.patient_id, request.completion_date)
            .await
            .map_err(|e| log_rejection("treatment completion", &request.patient_id, e))?;
        info!("Recorded treatment completion for patient {}", patient.id);
        Ok(patient)
    }

    /// 可紧急揭盲的受试者列表
    pub async fn code_break_eligible(&self, username: &str) -> Result<Vec<PatientSummary>> {
        match self.site_for_listing(username).await? {
            Some(site) => self.store.code_break_eligible(&site).await,
            None => Ok(Vec::new()),
        }
    }

    /// 记录紧急揭盲
    pub async fn record_code_break(&self, request: &CodeBreakRequest) -> Result<Patient> {
        ensure_patient_id(&request.patient_id)?;
        let site = self.site_for_mutation(&request.username).await?;

        let patient = self
            .store
            .record_code_break(&site, &request.patient_id, request.code_break_date)
            .await
            .map_err(|e| log_rejection("code break", &request.patient_id, e))?;
        info!("Recorded emergency code break for patient {}", patient.id);
        Ok(patient)
    }

    /// 站点内已揭盲的受试者列表
    pub async fn code_broken_patients(&self, username: &str) -> Result<Vec<Patient>> {
        match self.site_for_listing(username).await? {
            Some(site) => self.store.code_broken_patients(&site).await,
            None => Ok(Vec::new()),
        }
    }

    /// 批量供应药包（一次性步骤，不在热路径上）
    pub async fn provision_packs(&self, count: u32, boundaries: &[TypeBoundary]) -> Result<u64> {
        let plan = plan_provisioning(count, boundaries)?;
        let inserted = self.store.insert_packs(plan).await?;
        info!("Provisioned {} packs at depot", inserted);
        Ok(inserted)
    }

    /// 下一个发货单编号（供物流模块消费）
    pub async fn next_consignment_id(&self) -> Result<String> {
        self.store.next_consignment_id().await
    }
}

fn ensure_patient_id(patient_id: &str) -> Result<()> {
    if patient_id.trim().is_empty() {
        return Err(RtsmError::Validation("Missing patient ID".into()));
    }
    Ok(())
}

/// 领域守卫失败记一条warn，基础设施错误留给上层记error
fn log_rejection(operation: &str, patient_id: &str, err: RtsmError) -> RtsmError {
    if err.is_domain() {
        warn!("Rejected {} for patient {}: {}", operation, patient_id, err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticSiteDirectory;
    use crate::memory::InMemoryTrialStore;
    use crate::selector::FirstAvailableSelector;
    use chrono::NaiveDate;
    use rtsm_core::{PackStatus, PatientStatus};

    fn engine_with_sites() -> TrialEngine {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("info")
            .try_init();
        let directory = StaticSiteDirectory::new()
            .with_user("coordinator_s1", "S1")
            .with_user("coordinator_s2", "S2");
        TrialEngine::new(
            Arc::new(InMemoryTrialStore::new()),
            Arc::new(directory),
            Arc::new(FirstAvailableSelector),
        )
    }

    fn enrollment(username: &str) -> EnrollmentRequest {
        EnrollmentRequest {
            username: username.into(),
            informed_consent_date: date(2025, 2, 27),
            enrollment_date: date(2025, 3, 1),
            date_of_birth: date(1985, 6, 15),
            gender: "F".into(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_full_patient_lifecycle_scenario() {
        let engine = engine_with_sites();

        // 站点S1入组两位受试者
        let p1 = engine.enroll(&enrollment("coordinator_s1")).await.unwrap();
        assert_eq!(p1.id, "PAT001");
        assert_eq!(p1.display_name, "S1001");
        assert_eq!(p1.status, PatientStatus::Enrolled);
        assert_eq!(p1.treatment, "Pending");

        let p2 = engine.enroll(&enrollment("coordinator_s1")).await.unwrap();
        assert_eq!(p2.id, "PAT002");
        assert_eq!(p2.display_name, "S1002");

        // PAT001筛选失败，重复记录被拒绝
        let sf = ScreenFailureRequest {
            username: "coordinator_s1".into(),
            patient_id: p1.id.clone(),
            screen_failure_date: date(2025, 3, 5),
        };
        let failed = engine.record_screen_failure(&sf).await.unwrap();
        assert_eq!(failed.status, PatientStatus::ScreenFailure);
        assert_eq!(failed.screen_failure_date, Some(date(2025, 3, 5)));
        assert!(matches!(
            engine.record_screen_failure(&sf).await.unwrap_err(),
            RtsmError::Conflict(_)
        ));

        // 供应一个10_MG药包到S1后随机化PAT002
        engine
            .store
            .insert_packs(vec![rtsm_core::NewPack {
                pack_number: "BYL001".into(),
                pack_type: "10_MG".into(),
                location: "S1".into(),
                status: PackStatus::Available,
            }])
            .await
            .unwrap();

        let randomize = RandomizationRequest {
            username: "coordinator_s1".into(),
            patient_id: p2.id.clone(),
        };
        let outcome = engine.randomize(&randomize).await.unwrap();
        assert_eq!(outcome.patient.status, PatientStatus::Randomized);
        assert_eq!(outcome.patient.assigned_pack_id.as_deref(), Some("BYL001"));
        assert_eq!(outcome.patient.treatment, "10_MG");
        assert_eq!(outcome.pack.status, PackStatus::Allocated);

        // 重复随机化被拒绝
        assert!(matches!(
            engine.randomize(&randomize).await.unwrap_err(),
            RtsmError::Conflict(_)
        ));

        // 治疗完成
        let complete = TreatmentCompletionRequest {
            username: "coordinator_s1".into(),
            patient_id: p2.id.clone(),
            completion_date: date(2025, 4, 1),
        };
        let completed = engine.complete_treatment(&complete).await.unwrap();
        assert_eq!(completed.status, PatientStatus::TreatmentCompleted);

        // 紧急揭盲，重复揭盲被拒绝
        let code_break = CodeBreakRequest {
            username: "coordinator_s1".into(),
            patient_id: p2.id.clone(),
            code_break_date: date(2025, 4, 5),
        };
        let broken = engine.record_code_break(&code_break).await.unwrap();
        assert_eq!(broken.status, PatientStatus::CodeBroken);
        assert_eq!(broken.code_break_date, Some(date(2025, 4, 5)));
        assert!(matches!(
            engine.record_code_break(&code_break).await.unwrap_err(),
            RtsmError::Conflict(_)
        ));

        let listed = engine.code_broken_patients("coordinator_s1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, p2.id);
    }

    #[tokio::test]
    async fn test_display_names_independent_across_sites() {
        let engine = engine_with_sites();

        let s1 = engine.enroll(&enrollment("coordinator_s1")).await.unwrap();
        let s2 = engine.enroll(&enrollment("coordinator_s2")).await.unwrap();

        // 两个站点拿到相同的数字后缀，但完整编号不同
        assert_eq!(s1.display_name, "S1001");
        assert_eq!(s2.display_name, "S2001");
        assert_ne!(s1.id, s2.id);
    }

    #[tokio::test]
    async fn test_unknown_user_listing_is_empty_but_mutation_rejected() {
        let engine = engine_with_sites();

        // 列表：信息性空结果
        assert!(engine.patients("stranger").await.unwrap().is_empty());
        assert!(engine
            .randomization_eligible("stranger")
            .await
            .unwrap()
            .is_empty());

        // 变更：拒绝
        let err = engine.enroll(&enrollment("stranger")).await.unwrap_err();
        assert!(matches!(err, RtsmError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_site_isolation_between_coordinators() {
        let engine = engine_with_sites();
        let p1 = engine.enroll(&enrollment("coordinator_s1")).await.unwrap();

        // S2的协调员既看不到也改不了S1的受试者
        assert!(engine.patients("coordinator_s2").await.unwrap().is_empty());
        let err = engine
            .record_screen_failure(&ScreenFailureRequest {
                username: "coordinator_s2".into(),
                patient_id: p1.id.clone(),
                screen_failure_date: date(2025, 3, 5),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_no_supply_is_recoverable() {
        let engine = engine_with_sites();
        let patient = engine.enroll(&enrollment("coordinator_s1")).await.unwrap();
        let request = RandomizationRequest {
            username: "coordinator_s1".into(),
            patient_id: patient.id.clone(),
        };

        let err = engine.randomize(&request).await.unwrap_err();
        assert!(matches!(err, RtsmError::NoSupply(_)));
        assert!(err.is_retryable());

        // 供应后药包仍在药库，未运抵站点前重试依旧是供应不足
        engine
            .provision_packs(1, &[TypeBoundary::new(1, "PLACEBO")])
            .await
            .unwrap();
        assert!(matches!(
            engine.randomize(&request).await.unwrap_err(),
            RtsmError::NoSupply(_)
        ));
    }

    #[tokio::test]
    async fn test_provision_and_consignment_ids() {
        let engine = engine_with_sites();
        let inserted = engine
            .provision_packs(
                5,
                &[TypeBoundary::new(1, "PLACEBO"), TypeBoundary::new(4, "10_MG")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 5);

        assert_eq!(engine.next_consignment_id().await.unwrap(), "CON-BYL001");
        assert_eq!(engine.next_consignment_id().await.unwrap(), "CON-BYL002");
    }

    #[tokio::test]
    async fn test_validation_precedes_storage() {
        let engine = engine_with_sites();

        let mut request = enrollment("coordinator_s1");
        request.gender = "".into();
        assert!(matches!(
            engine.enroll(&request).await.unwrap_err(),
            RtsmError::Validation(_)
        ));

        let err = engine
            .record_screen_failure(&ScreenFailureRequest {
                username: "coordinator_s1".into(),
                patient_id: "  ".into(),
                screen_failure_date: date(2025, 3, 5),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::Validation(_)));
    }
}
