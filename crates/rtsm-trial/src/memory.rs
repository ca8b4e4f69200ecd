//! 内存试验存储
//!
//! 用于测试与单机演示的存储实现。所有状态放在一把
//! `tokio::sync::RwLock` 后面，每个变更方法持有写锁完成整个
//! "读取-决策-写入"序列，因此并发调用天然串行化。

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rtsm_core::{
    identifiers, EnrollmentRequest, NewPack, Pack, PackStatus, Patient, PatientStatus,
    PatientSummary, Randomization, Result, RtsmError, TREATMENT_PENDING,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::lifecycle;
use crate::selector::PackSelector;
use crate::state_machine::PatientStateMachine;
use crate::store::TrialStore;

#[derive(Debug, Default)]
struct StoreState {
    patients: BTreeMap<String, Patient>,
    packs: BTreeMap<String, Pack>,
    consignment_seq: u32,
}

/// 内存存储
#[derive(Debug)]
pub struct InMemoryTrialStore {
    state: RwLock<StoreState>,
    state_machine: PatientStateMachine,
}

impl InMemoryTrialStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            state_machine: PatientStateMachine::new(),
        }
    }

    /// 取站点内编号的下一个序号；站点已有编号解析失败时返回None，
    /// 此时调用方使用兜底编号
    fn next_display_seq(state: &StoreState, site: &str) -> Option<u32> {
        let mut max_seq = None;
        for patient in state.patients.values().filter(|p| p.site == site) {
            match identifiers::parse_display_suffix(site, &patient.display_name) {
                Some(seq) => max_seq = Some(max_seq.map_or(seq, |m: u32| m.max(seq))),
                // 命名不一致，放弃序号方案
                None => return None,
            }
        }
        Some(identifiers::next_seq(max_seq))
    }

    fn next_patient_seq(state: &StoreState) -> u32 {
        let max_seq = state
            .patients
            .keys()
            .filter_map(|id| identifiers::parse_patient_seq(id))
            .max();
        identifiers::next_seq(max_seq)
    }
}

impl Default for InMemoryTrialStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 按站点取一个受试者的可变引用，不存在或已删除视为未找到
fn patient_mut<'a>(
    state: &'a mut StoreState,
    site: &str,
    patient_id: &str,
) -> Result<&'a mut Patient> {
    match state.patients.get_mut(patient_id) {
        Some(patient) if patient.site == site && !patient.is_deleted => Ok(patient),
        _ => Err(RtsmError::NotFound(
            "Patient not found or does not belong to your site".into(),
        )),
    }
}

#[async_trait]
impl TrialStore for InMemoryTrialStore {
    async fn enroll_patient(&self, site: &str, request: &EnrollmentRequest) -> Result<Patient> {
        let mut state = self.state.write().await;

        let id = identifiers::format_patient_id(Self::next_patient_seq(&state));
        let display_name = match Self::next_display_seq(&state, site) {
            Some(seq) => identifiers::format_display_name(site, seq),
            None => identifiers::fallback_display_name(site),
        };

        let now = Utc::now();
        let patient = Patient {
            id: id.clone(),
            display_name,
            status: PatientStatus::Enrolled,
            site: site.to_string(),
            enrollment_date: request.enrollment_date,
            informed_consent_date: request.informed_consent_date,
            date_of_birth: request.date_of_birth,
            gender: request.gender.clone(),
            treatment: TREATMENT_PENDING.to_string(),
            screen_failure_date: None,
            assigned_pack_id: None,
            treatment_completion_date: None,
            code_break_date: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.patients.insert(id, patient.clone());
        Ok(patient)
    }

    async fn patients_for_site(&self, site: &str) -> Result<Vec<Patient>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .filter(|p| p.site == site && !p.is_deleted)
            .cloned()
            .collect())
    }

    async fn randomization_eligible(&self, site: &str) -> Result<Vec<PatientSummary>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .filter(|p| {
                p.site == site
                    && !p.is_deleted
                    && p.status == PatientStatus::Enrolled
                    && p.assigned_pack_id.is_none()
            })
            .map(PatientSummary::from)
            .collect())
    }

    async fn completion_eligible(&self, site: &str) -> Result<Vec<PatientSummary>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .filter(|p| {
                p.site == site
                    && !p.is_deleted
                    && p.status == PatientStatus::Randomized
                    && p.assigned_pack_id.is_some()
                    && p.treatment_completion_date.is_none()
            })
            .map(PatientSummary::from)
            .collect())
    }

    async fn code_break_eligible(&self, site: &str) -> Result<Vec<PatientSummary>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .filter(|p| {
                p.site == site
                    && !p.is_deleted
                    && p.status != PatientStatus::CodeBroken
                    && p.code_break_date.is_none()
                    && p.treatment_completion_date.is_none()
            })
            .map(PatientSummary::from)
            .collect())
    }

    async fn code_broken_patients(&self, site: &str) -> Result<Vec<Patient>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .filter(|p| p.site == site && !p.is_deleted && p.code_break_date.is_some())
            .cloned()
            .collect())
    }

    async fn record_screen_failure(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient> {
        let mut state = self.state.write().await;
        let patient = patient_mut(&mut state, site, patient_id)?;
        lifecycle::apply_screen_failure(&self.state_machine, patient, date)?;
        Ok(patient.clone())
    }

    async fn randomize_patient(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
        selector: &dyn PackSelector,
    ) -> Result<Randomization> {
        let mut state = self.state.write().await;

        // 先做受试者守卫，受试者不合格时不触碰库存
        {
            let patient = patient_mut(&mut state, site, patient_id)?;
            if patient.assigned_pack_id.is_some() {
                return Err(RtsmError::Conflict("Patient is already randomized".into()));
            }
            if patient.status != PatientStatus::Enrolled {
                return Err(RtsmError::Conflict(format!(
                    "Patient is not in 'Enrolled' status and cannot be randomized (status '{}')",
                    patient.status
                )));
            }
        }

        let candidates: Vec<Pack> = state
            .packs
            .values()
            .filter(|p| p.status == PackStatus::Available && p.location == site)
            .cloned()
            .collect();
        let chosen = selector
            .select(&candidates)
            .ok_or_else(|| RtsmError::NoSupply("No available packs for randomization".into()))?
            .pack_number
            .clone();

        let state = &mut *state;
        let patient = state
            .patients
            .get_mut(patient_id)
            .ok_or_else(|| RtsmError::NotFound("Patient not found".into()))?;
        let pack = state
            .packs
            .get_mut(&chosen)
            .ok_or_else(|| RtsmError::NotFound(format!("Pack '{}' not found", chosen)))?;
        lifecycle::apply_randomization(&self.state_machine, patient, pack, date)?;

        Ok(Randomization {
            patient: patient.clone(),
            pack: pack.clone(),
        })
    }

    async fn complete_treatment(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient> {
        let mut state = self.state.write().await;
        let patient = patient_mut(&mut state, site, patient_id)?;
        lifecycle::apply_treatment_completion(&self.state_machine, patient, date)?;
        Ok(patient.clone())
    }

    async fn record_code_break(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient> {
        let mut state = self.state.write().await;
        let patient = patient_mut(&mut state, site, patient_id)?;
        lifecycle::apply_code_break(&self.state_machine, patient, date)?;
        Ok(patient.clone())
    }

    async fn available_packs(&self, site: &str) -> Result<Vec<Pack>> {
        let state = self.state.read().await;
        Ok(state
            .packs
            .values()
            .filter(|p| p.status == PackStatus::Available && p.location == site)
            .cloned()
            .collect())
    }

    async fn insert_packs(&self, packs: Vec<NewPack>) -> Result<u64> {
        let mut state = self.state.write().await;
        for pack in &packs {
            if state.packs.contains_key(&pack.pack_number) {
                return Err(RtsmError::Conflict(format!(
                    "Pack '{}' already exists",
                    pack.pack_number
                )));
            }
        }
        let count = packs.len() as u64;
        let now = Utc::now();
        for pack in packs {
            state.packs.insert(
                pack.pack_number.clone(),
                Pack {
                    pack_number: pack.pack_number,
                    pack_type: pack.pack_type,
                    status: pack.status,
                    location: pack.location,
                    allocation_date: None,
                    created_at: now,
                },
            );
        }
        Ok(count)
    }

    async fn next_consignment_id(&self) -> Result<String> {
        let mut state = self.state.write().await;
        state.consignment_seq += 1;
        Ok(identifiers::format_consignment_id(state.consignment_seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::FirstAvailableSelector;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn enrollment_request(username: &str) -> EnrollmentRequest {
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

    fn pack(number: &str, pack_type: &str, location: &str) -> NewPack {
        NewPack {
            pack_number: number.into(),
            pack_type: pack_type.into(),
            location: location.into(),
            status: PackStatus::Available,
        }
    }

    #[tokio::test]
    async fn test_sequential_ids_per_site() {
        let store = InMemoryTrialStore::new();
        let request = enrollment_request("c1");

        let p1 = store.enroll_patient("S1", &request).await.unwrap();
        let p2 = store.enroll_patient("S1", &request).await.unwrap();
        let p3 = store.enroll_patient("S2", &request).await.unwrap();

        assert_eq!(p1.id, "PAT001");
        assert_eq!(p2.id, "PAT002");
        // 受试者ID全局递增，而站点内编号各自独立
        assert_eq!(p3.id, "PAT003");
        assert_eq!(p1.display_name, "S1001");
        assert_eq!(p2.display_name, "S1002");
        assert_eq!(p3.display_name, "S2001");
    }

    #[tokio::test]
    async fn test_concurrent_enrollments_get_distinct_ids() {
        let store = Arc::new(InMemoryTrialStore::new());
        let mut handles = Vec::new();

        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .enroll_patient("S1", &enrollment_request("c1"))
                    .await
                    .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for handle in handles {
            let patient = handle.await.unwrap();
            ids.insert(patient.id);
            names.insert(patient.display_name);
        }
        assert_eq!(ids.len(), 25);
        assert_eq!(names.len(), 25);
    }

    #[tokio::test]
    async fn test_display_name_fallback_on_inconsistent_naming() {
        let store = InMemoryTrialStore::new();
        let patient = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        // 人为制造命名不一致
        {
            let mut state = store.state.write().await;
            state.patients.get_mut(&patient.id).unwrap().display_name = "S1_LEGACY".into();
        }

        let next = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();
        assert!(next.display_name.starts_with("S1-"));
    }

    #[tokio::test]
    async fn test_randomization_consumes_exactly_one_pack() {
        let store = InMemoryTrialStore::new();
        store
            .insert_packs(vec![
                pack("BYL001", "10_MG", "S1"),
                pack("BYL002", "PLACEBO", "S1"),
                pack("BYL003", "PLACEBO", "S2"),
            ])
            .await
            .unwrap();
        let patient = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        let outcome = store
            .randomize_patient("S1", &patient.id, date(2025, 3, 10), &FirstAvailableSelector)
            .await
            .unwrap();

        assert_eq!(outcome.patient.status, PatientStatus::Randomized);
        assert_eq!(outcome.patient.assigned_pack_id.as_deref(), Some("BYL001"));
        assert_eq!(outcome.pack.status, PackStatus::Allocated);
        // 其它站点的药包不受影响，本站点剩余一个可用
        assert_eq!(store.available_packs("S1").await.unwrap().len(), 1);
        assert_eq!(store.available_packs("S2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_supply_leaves_patient_unchanged() {
        let store = InMemoryTrialStore::new();
        let patient = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        let err = store
            .randomize_patient("S1", &patient.id, date(2025, 3, 10), &FirstAvailableSelector)
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::NoSupply(_)));

        let patients = store.patients_for_site("S1").await.unwrap();
        assert_eq!(patients[0].status, PatientStatus::Enrolled);
        assert!(patients[0].assigned_pack_id.is_none());
    }

    #[tokio::test]
    async fn test_pack_allocated_at_most_once() {
        let store = InMemoryTrialStore::new();
        store
            .insert_packs(vec![pack("BYL001", "10_MG", "S1")])
            .await
            .unwrap();
        let p1 = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();
        let p2 = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        store
            .randomize_patient("S1", &p1.id, date(2025, 3, 10), &FirstAvailableSelector)
            .await
            .unwrap();
        // 唯一的药包已被消耗，第二位受试者只能等待补给
        let err = store
            .randomize_patient("S1", &p2.id, date(2025, 3, 10), &FirstAvailableSelector)
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::NoSupply(_)));
    }

    #[tokio::test]
    async fn test_concurrent_randomization_of_same_patient_assigns_one_pack() {
        let store = Arc::new(InMemoryTrialStore::new());
        store
            .insert_packs(vec![
                pack("BYL001", "10_MG", "S1"),
                pack("BYL002", "PLACEBO", "S1"),
            ])
            .await
            .unwrap();
        let patient = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let patient_id = patient.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .randomize_patient("S1", &patient_id, date(2025, 3, 10), &FirstAvailableSelector)
                    .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    succeeded += 1;
                    assert_eq!(outcome.patient.status, PatientStatus::Randomized);
                }
                // 后到的调用看到已分配的受试者，被状态守卫拒绝
                Err(err) => assert!(matches!(err, RtsmError::Conflict(_))),
            }
        }
        assert_eq!(succeeded, 1);

        // 两个药包只消耗一个
        assert_eq!(store.available_packs("S1").await.unwrap().len(), 1);
        let patients = store.patients_for_site("S1").await.unwrap();
        assert!(patients[0].assigned_pack_id.is_some());
    }

    #[tokio::test]
    async fn test_site_scoping_of_mutations() {
        let store = InMemoryTrialStore::new();
        let patient = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        // 其它站点的协调员无法操作该受试者
        let err = store
            .record_screen_failure("S2", &patient.id, date(2025, 3, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::NotFound(_)));

        store
            .record_screen_failure("S1", &patient.id, date(2025, 3, 5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_soft_deleted_patients_hidden() {
        let store = InMemoryTrialStore::new();
        let patient = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();
        {
            let mut state = store.state.write().await;
            state.patients.get_mut(&patient.id).unwrap().is_deleted = true;
        }

        assert!(store.patients_for_site("S1").await.unwrap().is_empty());
        assert!(store.randomization_eligible("S1").await.unwrap().is_empty());
        let err = store
            .record_screen_failure("S1", &patient.id, date(2025, 3, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_eligibility_listings() {
        let store = InMemoryTrialStore::new();
        store
            .insert_packs(vec![pack("BYL001", "10_MG", "S1")])
            .await
            .unwrap();
        let p1 = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();
        let p2 = store
            .enroll_patient("S1", &enrollment_request("c1"))
            .await
            .unwrap();

        assert_eq!(store.randomization_eligible("S1").await.unwrap().len(), 2);

        store
            .randomize_patient("S1", &p1.id, date(2025, 3, 10), &FirstAvailableSelector)
            .await
            .unwrap();
        assert_eq!(store.randomization_eligible("S1").await.unwrap().len(), 1);
        assert_eq!(store.completion_eligible("S1").await.unwrap().len(), 1);

        store
            .complete_treatment("S1", &p1.id, date(2025, 4, 1))
            .await
            .unwrap();
        assert!(store.completion_eligible("S1").await.unwrap().is_empty());
        // 完成治疗后不再列入可揭盲名单
        let eligible = store.code_break_eligible("S1").await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, p2.id);

        store
            .record_code_break("S1", &p2.id, date(2025, 4, 2))
            .await
            .unwrap();
        assert!(store.code_break_eligible("S1").await.unwrap().is_empty());
        let broken = store.code_broken_patients("S1").await.unwrap();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].id, p2.id);
    }

    #[tokio::test]
    async fn test_consignment_ids_sequential() {
        let store = InMemoryTrialStore::new();
        assert_eq!(store.next_consignment_id().await.unwrap(), "CON-BYL001");
        assert_eq!(store.next_consignment_id().await.unwrap(), "CON-BYL002");
    }

    #[tokio::test]
    async fn test_duplicate_pack_provisioning_rejected() {
        let store = InMemoryTrialStore::new();
        store
            .insert_packs(vec![pack("BYL001", "PLACEBO", "Depot")])
            .await
            .unwrap();
        let err = store
            .insert_packs(vec![pack("BYL001", "PLACEBO", "Depot")])
            .await
            .unwrap_err();
        assert!(matches!(err, RtsmError::Conflict(_)));
    }
}
