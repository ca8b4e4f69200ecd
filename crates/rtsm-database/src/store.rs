//! 试验存储的PostgreSQL实现
//!
//! 每个变更方法在一个sqlx事务内完成"读取-决策-写入"：序号分配
//! 通过trial_counters行的自增写锁串行化，受试者与药包行通过
//! `FOR UPDATE` 锁定。任何失败提前返回时事务随drop回滚，
//! 不会留下部分写入。

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rtsm_core::{
    identifiers, EnrollmentRequest, NewPack, Pack, Patient, PatientStatus, PatientSummary,
    Randomization, Result, RtsmError, TREATMENT_PENDING,
};
use rtsm_trial::{lifecycle, PackSelector, PatientStateMachine, TrialStore};
use sqlx::{PgPool, Postgres, Transaction};

use crate::connection::DatabasePool;
use crate::models::{DbPack, DbPatient};

/// PostgreSQL试验存储
pub struct PgTrialStore {
    pool: DatabasePool,
    state_machine: PatientStateMachine,
}

impl PgTrialStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            state_machine: PatientStateMachine::new(),
        }
    }

    fn pool(&self) -> &PgPool {
        self.pool.pool()
    }
}

fn db_err(e: sqlx::Error) -> RtsmError {
    RtsmError::Database(e.to_string())
}

/// 计数器自增并取值；ON CONFLICT的行锁把并发分配串行化
async fn next_counter(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<u32> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO trial_counters (name, value) VALUES ($1, 1)
        ON CONFLICT (name) DO UPDATE SET value = trial_counters.value + 1
        RETURNING value
        "#,
    )
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .map_err(db_err)?;
    u32::try_from(value)
        .map_err(|_| RtsmError::Internal(format!("Counter '{}' out of range: {}", name, value)))
}

/// 锁定并读取站点内的受试者行
async fn lock_patient(
    tx: &mut Transaction<'_, Postgres>,
    site: &str,
    patient_id: &str,
) -> Result<Patient> {
    let row = sqlx::query_as::<_, DbPatient>(
        "SELECT * FROM patients WHERE id = $1 AND site = $2 AND is_deleted = FALSE FOR UPDATE",
    )
    .bind(patient_id)
    .bind(site)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    row.map(Patient::from).ok_or_else(|| {
        RtsmError::NotFound("Patient not found or does not belong to your site".into())
    })
}

/// 写回受试者的可变列
async fn update_patient(tx: &mut Transaction<'_, Postgres>, patient: &Patient) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE patients
        SET status = $1, treatment = $2, screen_failure_date = $3, assigned_pack_id = $4,
            treatment_completion_date = $5, code_break_date = $6, updated_at = $7
        WHERE id = $8
        "#,
    )
    .bind(patient.status.as_str())
    .bind(&patient.treatment)
    .bind(patient.screen_failure_date)
    .bind(patient.assigned_pack_id.as_deref())
    .bind(patient.treatment_completion_date)
    .bind(patient.code_break_date)
    .bind(patient.updated_at)
    .bind(&patient.id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl TrialStore for PgTrialStore {
    async fn enroll_patient(&self, site: &str, request: &EnrollmentRequest) -> Result<Patient> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let patient_seq = next_counter(&mut tx, "patient").await?;
        let display_seq = next_counter(&mut tx, &format!("display:{}", site)).await?;

        let now = Utc::now();
        let patient = Patient {
            id: identifiers::format_patient_id(patient_seq),
            display_name: identifiers::format_display_name(site, display_seq),
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

        sqlx::query(
            r#"
            INSERT INTO patients (
                id, display_name, status, site, enrollment_date, informed_consent_date,
                date_of_birth, gender, treatment, is_deleted, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&patient.id)
        .bind(&patient.display_name)
        .bind(patient.status.as_str())
        .bind(&patient.site)
        .bind(patient.enrollment_date)
        .bind(patient.informed_consent_date)
        .bind(patient.date_of_birth)
        .bind(&patient.gender)
        .bind(&patient.treatment)
        .bind(patient.is_deleted)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(patient)
    }

    async fn patients_for_site(&self, site: &str) -> Result<Vec<Patient>> {
        let rows = sqlx::query_as::<_, DbPatient>(
            "SELECT * FROM patients WHERE site = $1 AND is_deleted = FALSE ORDER BY id",
        )
        .bind(site)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Patient::from).collect())
    }

    async fn randomization_eligible(&self, site: &str) -> Result<Vec<PatientSummary>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, display_name FROM patients
            WHERE site = $1 AND is_deleted = FALSE
              AND status = 'Enrolled' AND assigned_pack_id IS NULL
            ORDER BY id
            "#,
        )
        .bind(site)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, display_name)| PatientSummary { id, display_name })
            .collect())
    }

    async fn completion_eligible(&self, site: &str) -> Result<Vec<PatientSummary>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, display_name FROM patients
            WHERE site = $1 AND is_deleted = FALSE
              AND status = 'Randomized' AND assigned_pack_id IS NOT NULL
              AND treatment_completion_date IS NULL
            ORDER BY id
            "#,
        )
        .bind(site)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, display_name)| PatientSummary { id, display_name })
            .collect())
    }

    async fn code_break_eligible(&self, site: &str) -> Result<Vec<PatientSummary>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, display_name FROM patients
            WHERE site = $1 AND is_deleted = FALSE
              AND status != 'Code Broken' AND code_break_date IS NULL
              AND treatment_completion_date IS NULL
            ORDER BY id
            "#,
        )
        .bind(site)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, display_name)| PatientSummary { id, display_name })
            .collect())
    }

    async fn code_broken_patients(&self, site: &str) -> Result<Vec<Patient>> {
        let rows = sqlx::query_as::<_, DbPatient>(
            r#"
            SELECT * FROM patients
            WHERE site = $1 AND is_deleted = FALSE AND code_break_date IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(site)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Patient::from).collect())
    }

    async fn record_screen_failure(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let mut patient = lock_patient(&mut tx, site, patient_id).await?;
        lifecycle::apply_screen_failure(&self.state_machine, &mut patient, date)?;
        update_patient(&mut tx, &patient).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(patient)
    }

    async fn randomize_patient(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
        selector: &dyn PackSelector,
    ) -> Result<Randomization> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let mut patient = lock_patient(&mut tx, site, patient_id).await?;
        // 受试者不合格时不再锁库存
        if patient.assigned_pack_id.is_some() {
            return Err(RtsmError::Conflict("Patient is already randomized".into()));
        }
        if patient.status != PatientStatus::Enrolled {
            return Err(RtsmError::Conflict(format!(
                "Patient is not in 'Enrolled' status and cannot be randomized (status '{}')",
                patient.status
            )));
        }

        let candidates: Vec<Pack> = sqlx::query_as::<_, DbPack>(
            "SELECT * FROM packs WHERE status = 'A' AND location = $1 ORDER BY pack_number FOR UPDATE",
        )
        .bind(site)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Pack::from)
        .collect();

        let mut pack = selector
            .select(&candidates)
            .ok_or_else(|| RtsmError::NoSupply("No available packs for randomization".into()))?
            .clone();

        lifecycle::apply_randomization(&self.state_machine, &mut patient, &mut pack, date)?;

        update_patient(&mut tx, &patient).await?;
        sqlx::query(
            "UPDATE packs SET status = $1, allocation_date = $2 WHERE pack_number = $3",
        )
        .bind(pack.status.as_code())
        .bind(pack.allocation_date)
        .bind(&pack.pack_number)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Randomization { patient, pack })
    }

    async fn complete_treatment(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let mut patient = lock_patient(&mut tx, site, patient_id).await?;
        lifecycle::apply_treatment_completion(&self.state_machine, &mut patient, date)?;
        update_patient(&mut tx, &patient).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(patient)
    }

    async fn record_code_break(
        &self,
        site: &str,
        patient_id: &str,
        date: NaiveDate,
    ) -> Result<Patient> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let mut patient = lock_patient(&mut tx, site, patient_id).await?;
        lifecycle::apply_code_break(&self.state_machine, &mut patient, date)?;
        update_patient(&mut tx, &patient).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(patient)
    }

    async fn available_packs(&self, site: &str) -> Result<Vec<Pack>> {
        let rows = sqlx::query_as::<_, DbPack>(
            "SELECT * FROM packs WHERE status = 'A' AND location = $1 ORDER BY pack_number",
        )
        .bind(site)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Pack::from).collect())
    }

    async fn insert_packs(&self, packs: Vec<NewPack>) -> Result<u64> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let count = packs.len() as u64;
        for pack in packs {
            sqlx::query(
                r#"
                INSERT INTO packs (pack_number, pack_type, status, location)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&pack.pack_number)
            .bind(&pack.pack_type)
            .bind(pack.status.as_code())
            .bind(&pack.location)
            .execute(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RtsmError::Conflict(format!("Pack '{}' already exists", pack.pack_number))
                }
                _ => db_err(e),
            })?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(count)
    }

    async fn next_consignment_id(&self) -> Result<String> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        let seq = next_counter(&mut tx, "consignment").await?;
        tx.commit().await.map_err(db_err)?;
        Ok(identifiers::format_consignment_id(seq))
    }
}
