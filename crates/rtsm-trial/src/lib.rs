//! # RTSM Trial
//!
//! 受试者生命周期与随机化引擎：状态机、生命周期转换、随机化选包、
//! 站点作用域解析，以及统一的试验操作入口。

pub mod directory;
pub mod engine;
pub mod lifecycle;
pub mod memory;
pub mod provision;
pub mod selector;
pub mod state_machine;
pub mod store;

// 重新导出主要类型
pub use directory::{SiteDirectory, StaticSiteDirectory};
pub use engine::TrialEngine;
pub use memory::InMemoryTrialStore;
pub use selector::{FirstAvailableSelector, PackSelector, UniformSelector};
pub use state_machine::{PatientEvent, PatientStateMachine};
pub use store::TrialStore;
