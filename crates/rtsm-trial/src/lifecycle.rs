//! 生命周期转换
//!
//! 纯函数形式的受试者/药包转换逻辑：校验状态机边、一次性写入字段
//! 和药包可用性，全部通过后才就地修改记录。任何守卫失败都返回
//! 描述性冲突错误且不产生任何修改。存储实现负责把这些修改
//! 作为一个原子单元落盘。

use chrono::{NaiveDate, Utc};
use rtsm_core::{Pack, PackStatus, Patient, PatientStatus, Result, RtsmError};

use crate::state_machine::{PatientEvent, PatientStateMachine};

/// 记录筛选失败
pub fn apply_screen_failure(
    sm: &PatientStateMachine,
    patient: &mut Patient,
    date: NaiveDate,
) -> Result<()> {
    if patient.screen_failure_date.is_some() {
        return Err(RtsmError::Conflict(
            "Patient is already marked as screen failure".into(),
        ));
    }
    let new_status = guard_transition(sm, patient, &PatientEvent::ScreenFail)?;

    patient.status = new_status;
    patient.screen_failure_date = Some(date);
    patient.updated_at = Utc::now();
    Ok(())
}

/// 随机化：受试者与选中药包的配对，双方的修改必须一起提交
pub fn apply_randomization(
    sm: &PatientStateMachine,
    patient: &mut Patient,
    pack: &mut Pack,
    date: NaiveDate,
) -> Result<()> {
    if patient.assigned_pack_id.is_some() {
        return Err(RtsmError::Conflict("Patient is already randomized".into()));
    }
    let new_status = guard_transition(sm, patient, &PatientEvent::Randomize)?;
    if pack.status != PackStatus::Available {
        return Err(RtsmError::Conflict(format!(
            "Pack '{}' is not available (status '{}')",
            pack.pack_number,
            pack.status.as_code()
        )));
    }

    patient.status = new_status;
    patient.assigned_pack_id = Some(pack.pack_number.clone());
    patient.treatment = pack.pack_type.clone();
    patient.updated_at = Utc::now();
    pack.status = PackStatus::Allocated;
    pack.allocation_date = Some(date);
    Ok(())
}

/// 记录治疗完成
pub fn apply_treatment_completion(
    sm: &PatientStateMachine,
    patient: &mut Patient,
    date: NaiveDate,
) -> Result<()> {
    if patient.treatment_completion_date.is_some() {
        return Err(RtsmError::Conflict(
            "Treatment already completed for this patient".into(),
        ));
    }
    if patient.assigned_pack_id.is_none() {
        return Err(RtsmError::Conflict(
            "Patient has no assigned pack and cannot complete treatment".into(),
        ));
    }
    let new_status = guard_transition(sm, patient, &PatientEvent::CompleteTreatment)?;

    patient.status = new_status;
    patient.treatment_completion_date = Some(date);
    patient.updated_at = Utc::now();
    Ok(())
}

/// 记录紧急揭盲
pub fn apply_code_break(
    sm: &PatientStateMachine,
    patient: &mut Patient,
    date: NaiveDate,
) -> Result<()> {
    if patient.code_break_date.is_some() {
        return Err(RtsmError::Conflict("Patient is already code broken".into()));
    }
    let new_status = guard_transition(sm, patient, &PatientEvent::CodeBreak)?;

    patient.status = new_status;
    patient.code_break_date = Some(date);
    patient.updated_at = Utc::now();
    Ok(())
}

/// 状态机校验，失败时换成带当前状态说明的冲突错误
fn guard_transition(
    sm: &PatientStateMachine,
    patient: &Patient,
    event: &PatientEvent,
) -> Result<PatientStatus> {
    sm.transition(&patient.status, event).map_err(|_| {
        RtsmError::Conflict(format!(
            "Patient '{}' has status '{}' and cannot accept {:?}",
            patient.id, patient.status, event
        ))
    })
}
