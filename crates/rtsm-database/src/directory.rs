//! 站点目录的数据库实现
//!
//! 账号与站点的对应关系由账号系统写入users表，这里只读取。

use async_trait::async_trait;
use rtsm_core::{Result, RtsmError};
use rtsm_trial::SiteDirectory;

use crate::connection::DatabasePool;

/// 基于users表的站点目录
#[derive(Debug, Clone)]
pub struct PgSiteDirectory {
    pool: DatabasePool,
}

impl PgSiteDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteDirectory for PgSiteDirectory {
    async fn site_for_user(&self, username: &str) -> Result<Option<String>> {
        let site: Option<Option<String>> =
            sqlx::query_scalar("SELECT sites FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| RtsmError::Database(e.to_string()))?;

        // 用户不存在、站点列为NULL或空串都视为未关联站点
        Ok(site.flatten().filter(|s| !s.trim().is_empty()))
    }
}
