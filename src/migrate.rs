use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the project tables if they do not exist. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            exam_name TEXT NOT NULL,
            total_days INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            daily_plan_json TEXT NOT NULL DEFAULT '{}',
            unassigned_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Topics belong to exactly one project; sources are stored as JSON.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            day INTEGER,
            order_in_day INTEGER,
            priority TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            estimated_hours REAL NOT NULL,
            key_concepts_json TEXT NOT NULL DEFAULT '[]',
            is_review INTEGER NOT NULL DEFAULT 0,
            sources_json TEXT NOT NULL DEFAULT '[]',
            UNIQUE(project_id, position),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_topics_project_id ON topics(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_topics_day ON topics(project_id, day)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_projects_created_at ON projects(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
