//! # RTSM数据库模块
//!
//! 负责受试者与药包库存的PostgreSQL持久化，提供连接池、表结构创建
//! 以及 `TrialStore` / `SiteDirectory` 的数据库实现。

pub mod config;
pub mod connection;
pub mod directory;
pub mod models;
pub mod schema;
pub mod store;

// 重新导出主要类型
pub use config::DatabaseConfig;
pub use connection::DatabasePool;
pub use directory::PgSiteDirectory;
pub use models::*;
pub use store::PgTrialStore;
