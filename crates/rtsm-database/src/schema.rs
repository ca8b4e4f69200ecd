//! 数据库表结构

use rtsm_core::{Result, RtsmError};

use crate::connection::DatabasePool;

/// 创建数据库表
pub async fn create_tables(pool: &DatabasePool) -> Result<()> {
    let pool = pool.pool();

    // 创建受试者表
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS patients (
            id VARCHAR(50) PRIMARY KEY,
            display_name VARCHAR(50) NOT NULL,
            status VARCHAR(50) NOT NULL,
            site VARCHAR(50) NOT NULL,
            enrollment_date DATE NOT NULL,
            informed_consent_date DATE NOT NULL,
            date_of_birth DATE NOT NULL,
            gender VARCHAR(10) NOT NULL,
            treatment VARCHAR(50) NOT NULL,
            screen_failure_date DATE,
            assigned_pack_id VARCHAR(50),
            treatment_completion_date DATE,
            code_break_date DATE,
            is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            UNIQUE (site, display_name)
        )
    "#).execute(pool).await.map_err(|e| RtsmError::Database(e.to_string()))?;

    // 创建药包表
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS packs (
            pack_number VARCHAR(50) PRIMARY KEY,
            pack_type VARCHAR(50) NOT NULL,
            status VARCHAR(50) NOT NULL,
            location VARCHAR(50) NOT NULL,
            allocation_date DATE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
    "#).execute(pool).await.map_err(|e| RtsmError::Database(e.to_string()))?;

    // 创建发货单表（物流模块写入，这里只负责编号分配所需的结构）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS consignments (
            consignment_id VARCHAR(50) PRIMARY KEY,
            pack_id VARCHAR(50),
            center_id VARCHAR(50),
            status VARCHAR(50),
            raise_date DATE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
    "#).execute(pool).await.map_err(|e| RtsmError::Database(e.to_string()))?;

    // 创建用户表（账号系统维护，这里只读取站点关联）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS users (
            id SERIAL PRIMARY KEY,
            username VARCHAR(50) UNIQUE NOT NULL,
            name VARCHAR(50),
            role VARCHAR(50),
            sites VARCHAR(50)
        )
    "#).execute(pool).await.map_err(|e| RtsmError::Database(e.to_string()))?;

    // 创建序号计数器表
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS trial_counters (
            name VARCHAR(80) PRIMARY KEY,
            value BIGINT NOT NULL
        )
    "#).execute(pool).await.map_err(|e| RtsmError::Database(e.to_string()))?;

    // 创建索引以优化查询性能
    create_indexes(pool).await?;

    tracing::info!("Database tables created successfully");
    Ok(())
}

/// 创建数据库索引
async fn create_indexes(pool: &sqlx::PgPool) -> Result<()> {
    let indexes = vec![
        "CREATE INDEX IF NOT EXISTS idx_patients_site ON patients(site)",
        "CREATE INDEX IF NOT EXISTS idx_patients_status ON patients(status)",
        "CREATE INDEX IF NOT EXISTS idx_packs_location_status ON packs(location, status)",
        "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql)
            .execute(pool)
            .await
            .map_err(|e| RtsmError::Database(e.to_string()))?;
    }

    tracing::info!("Database indexes created successfully");
    Ok(())
}
