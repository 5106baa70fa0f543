//! SQLite-backed [`DocumentStore`].
//!
//! A project is one `projects` row plus one `topics` row per topic.
//! Saving replaces the project's topics inside a single transaction, so a
//! reader never sees a project with half its topics. Deleting removes the
//! topics explicitly and through `ON DELETE CASCADE`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use study_planner_core::assembly::{Project, Topic, TopicSource};
use study_planner_core::store::{DocumentStore, ProjectSummary};
use study_planner_core::{Difficulty, Level};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic> {
    let id: String = row.get("id");
    let key_concepts: Vec<String> = serde_json::from_str(row.get("key_concepts_json"))
        .with_context(|| format!("corrupt key concepts for topic {}", id))?;
    let sources: Vec<TopicSource> = serde_json::from_str(row.get("sources_json"))
        .with_context(|| format!("corrupt sources for topic {}", id))?;
    let day: Option<i64> = row.get("day");
    let order_in_day: Option<i64> = row.get("order_in_day");
    let is_review: i64 = row.get("is_review");

    Ok(Topic {
        id,
        title: row.get("title"),
        description: row.get("description"),
        day: day.map(|d| d as u32),
        order_in_day: order_in_day.map(|o| o as u32),
        priority: Level::from(row.get::<String, _>("priority")),
        difficulty: Difficulty::from(row.get::<String, _>("difficulty")),
        estimated_hours: row.get("estimated_hours"),
        key_concepts,
        is_review: is_review != 0,
        sources,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn save_project_with_topics(&self, project: &Project) -> Result<String> {
        let daily_plan_json = serde_json::to_string(&project.daily_plan)?;
        let unassigned_json = serde_json::to_string(&project.unassigned)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO projects (id, name, exam_name, total_days, created_at,
                                  daily_plan_json, unassigned_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                exam_name = excluded.exam_name,
                total_days = excluded.total_days,
                daily_plan_json = excluded.daily_plan_json,
                unassigned_json = excluded.unassigned_json
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.exam_name)
        .bind(project.total_days as i64)
        .bind(format_ts(&project.created_at))
        .bind(&daily_plan_json)
        .bind(&unassigned_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM topics WHERE project_id = ?")
            .bind(&project.id)
            .execute(&mut *tx)
            .await?;

        for (position, topic) in project.topics.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO topics (id, project_id, position, title, description, day,
                                    order_in_day, priority, difficulty, estimated_hours,
                                    key_concepts_json, is_review, sources_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&topic.id)
            .bind(&project.id)
            .bind(position as i64)
            .bind(&topic.title)
            .bind(&topic.description)
            .bind(topic.day.map(i64::from))
            .bind(topic.order_in_day.map(i64::from))
            .bind(topic.priority.as_str())
            .bind(topic.difficulty.as_str())
            .bind(topic.estimated_hours)
            .bind(serde_json::to_string(&topic.key_concepts)?)
            .bind(topic.is_review as i64)
            .bind(serde_json::to_string(&topic.sources)?)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store topic '{}'", topic.title))?;
        }

        tx.commit().await?;
        debug!(project = %project.id, topics = project.topics.len(), "project saved");
        Ok(project.id.clone())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let Some(row) = sqlx::query(
            "SELECT id, name, exam_name, total_days, created_at, daily_plan_json, unassigned_json \
             FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let topic_rows = sqlx::query(
            "SELECT id, title, description, day, order_in_day, priority, difficulty, \
                    estimated_hours, key_concepts_json, is_review, sources_json \
             FROM topics WHERE project_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let topics = topic_rows
            .iter()
            .map(topic_from_row)
            .collect::<Result<Vec<_>>>()?;

        let daily_plan: BTreeMap<u32, Vec<String>> =
            serde_json::from_str(row.get("daily_plan_json")).context("corrupt daily plan")?;
        let unassigned: Vec<String> =
            serde_json::from_str(row.get("unassigned_json")).context("corrupt unassigned list")?;
        let total_days: i64 = row.get("total_days");

        Ok(Some(Project {
            id: row.get("id"),
            name: row.get("name"),
            exam_name: row.get("exam_name"),
            total_days: total_days as u32,
            created_at: parse_ts(row.get("created_at"))?,
            topics,
            daily_plan,
            unassigned,
        }))
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, p.exam_name, p.total_days, p.created_at,
                   (SELECT COUNT(*) FROM topics t WHERE t.project_id = p.id) AS topic_count
            FROM projects p
            ORDER BY p.created_at DESC, p.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let total_days: i64 = row.get("total_days");
                let topic_count: i64 = row.get("topic_count");
                Ok(ProjectSummary {
                    id: row.get("id"),
                    name: row.get("name"),
                    exam_name: row.get("exam_name"),
                    total_days: total_days as u32,
                    topic_count: topic_count as usize,
                    created_at: parse_ts(row.get("created_at"))?,
                })
            })
            .collect()
    }

    async fn delete_project(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM topics WHERE project_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }
}
