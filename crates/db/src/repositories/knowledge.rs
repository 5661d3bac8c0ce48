use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::{AgentId, OrganizationId};
use frontdesk_core::domain::knowledge::KnowledgeEntry;

use super::{format_timestamp, KnowledgeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn list_for_agent(
        &self,
        organization_id: &OrganizationId,
        agent_id: &AgentId,
    ) -> Result<Vec<KnowledgeEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, organization_id, agent_id, title, content, category, is_active
             FROM knowledge_entry
             WHERE organization_id = ?
               AND is_active = 1
               AND (agent_id IS NULL OR agent_id = ?)
             ORDER BY category, title, id",
        )
        .bind(&organization_id.0)
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn save(&self, entry: KnowledgeEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO knowledge_entry (
                id,
                organization_id,
                agent_id,
                title,
                content,
                category,
                is_active,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                title = excluded.title,
                content = excluded.content,
                category = excluded.category,
                is_active = excluded.is_active",
        )
        .bind(&entry.id)
        .bind(&entry.organization_id.0)
        .bind(entry.agent_id.as_ref().map(|agent_id| agent_id.0.as_str()))
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.category)
        .bind(entry.is_active)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn entry_from_row(row: SqliteRow) -> Result<KnowledgeEntry, RepositoryError> {
    let agent_id: Option<String> = row.try_get("agent_id")?;
    Ok(KnowledgeEntry {
        id: row.try_get("id")?,
        organization_id: OrganizationId(row.try_get("organization_id")?),
        agent_id: agent_id.map(AgentId),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        category: row.try_get("category")?,
        is_active: row.try_get("is_active")?,
    })
}
