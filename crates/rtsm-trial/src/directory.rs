//! 站点目录
//!
//! 账号与站点的对应关系由外部账号系统维护，核心逻辑只通过
//! 该接口在每次操作时解析一次调用者的站点。

use async_trait::async_trait;
use rtsm_core::Result;
use std::collections::HashMap;

/// 站点目录接口：按用户名解析其关联站点
#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// 用户不存在或未关联站点时返回None
    async fn site_for_user(&self, username: &str) -> Result<Option<String>>;
}

/// 静态站点目录（测试与单机场景）
#[derive(Debug, Default)]
pub struct StaticSiteDirectory {
    sites: HashMap<String, String>,
}

impl StaticSiteDirectory {
    pub fn new() -> Self {
        Self {
            sites: HashMap::new(),
        }
    }

    /// 绑定用户与站点
    pub fn with_user(mut self, username: &str, site: &str) -> Self {
        self.sites.insert(username.to_string(), site.to_string());
        self
    }
}

#[async_trait]
impl SiteDirectory for StaticSiteDirectory {
    async fn site_for_user(&self, username: &str) -> Result<Option<String>> {
        Ok(self.sites.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let directory = StaticSiteDirectory::new()
            .with_user("coordinator_s1", "S1")
            .with_user("coordinator_s2", "S2");

        assert_eq!(
            directory.site_for_user("coordinator_s1").await.unwrap(),
            Some("S1".to_string())
        );
        assert_eq!(directory.site_for_user("nobody").await.unwrap(), None);
    }
}
