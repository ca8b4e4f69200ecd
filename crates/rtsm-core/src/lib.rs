//! # RTSM Core
//!
//! 临床试验RTSM系统的核心模块，提供基础数据结构、错误定义和标识符生成工具。

pub mod error;
pub mod identifiers;
pub mod models;

pub use error::{Result, RtsmError};
pub use models::*;
