//! 受试者状态机
//!
//! 管理受试者生命周期的状态转换，转换表之外的任何转换都会被拒绝

use rtsm_core::{PatientStatus, Result, RtsmError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 受试者状态转换事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PatientEvent {
    ScreenFail,
    Randomize,
    CompleteTreatment,
    CodeBreak,
}

/// 受试者状态机
#[derive(Debug)]
pub struct PatientStateMachine {
    transitions: HashMap<(PatientStatus, PatientEvent), PatientStatus>,
}

impl PatientStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert(
            (PatientStatus::Enrolled, PatientEvent::ScreenFail),
            PatientStatus::ScreenFailure,
        );
        transitions.insert(
            (PatientStatus::Enrolled, PatientEvent::Randomize),
            PatientStatus::Randomized,
        );
        transitions.insert(
            (PatientStatus::Randomized, PatientEvent::CompleteTreatment),
            PatientStatus::TreatmentCompleted,
        );
        // 紧急揭盲可以从除CodeBroken外的任何状态发起，揭盲后不再有后续转换
        transitions.insert(
            (PatientStatus::Enrolled, PatientEvent::CodeBreak),
            PatientStatus::CodeBroken,
        );
        transitions.insert(
            (PatientStatus::Randomized, PatientEvent::CodeBreak),
            PatientStatus::CodeBroken,
        );
        transitions.insert(
            (PatientStatus::ScreenFailure, PatientEvent::CodeBreak),
            PatientStatus::CodeBroken,
        );
        transitions.insert(
            (PatientStatus::TreatmentCompleted, PatientEvent::CodeBreak),
            PatientStatus::CodeBroken,
        );

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: &PatientStatus, event: &PatientEvent) -> bool {
        self.transitions.contains_key(&(*from, event.clone()))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &PatientStatus, event: &PatientEvent) -> Result<PatientStatus> {
        match self.transitions.get(&(*from, event.clone())) {
            Some(to) => Ok(*to),
            None => Err(RtsmError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            }),
        }
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current_state: &PatientStatus) -> Vec<PatientEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| state == current_state)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Default for PatientStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
