use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::AgentId;
use frontdesk_core::domain::agent_log::AgentLogEntry;

use super::{
    count_to_u32, format_timestamp, parse_json, parse_timestamp, to_json, AgentLogRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlAgentLogRepository {
    pool: DbPool,
}

impl SqlAgentLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentLogRepository for SqlAgentLogRepository {
    async fn append(&self, entry: AgentLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agent_log (agent_id, action, details_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.agent_id.0)
        .bind(&entry.action)
        .bind(to_json("details_json", &entry.details)?)
        .bind(format_timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_actions_since(
        &self,
        agent_id: &AgentId,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agent_log WHERE agent_id = ? AND action = ? AND created_at >= ?",
        )
        .bind(&agent_id.0)
        .bind(action)
        .bind(format_timestamp(since))
        .fetch_one(&self.pool)
        .await?;

        Ok(count_to_u32(count))
    }

    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<AgentLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT agent_id, action, details_json, created_at
             FROM agent_log
             WHERE agent_id = ?
             ORDER BY id",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<AgentLogEntry, RepositoryError> {
    let details: String = row.try_get("details_json")?;
    Ok(AgentLogEntry {
        agent_id: AgentId(row.try_get("agent_id")?),
        action: row.try_get("action")?,
        details: parse_json("details_json", &details)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use frontdesk_core::domain::agent::AgentId;
    use frontdesk_core::domain::agent_log::{AgentLogEntry, ACTION_RATE_LIMITED, ACTION_REPLIED};

    use super::SqlAgentLogRepository;
    use crate::repositories::test_support::setup_pool;
    use crate::repositories::AgentLogRepository;

    #[tokio::test]
    async fn counts_only_matching_actions_inside_the_window() {
        let pool = setup_pool().await;
        let repo = SqlAgentLogRepository::new(pool.clone());
        let agent = AgentId("agent-1".to_string());

        let mut stale = AgentLogEntry::new(agent.clone(), ACTION_REPLIED, json!({}));
        stale.created_at = Utc::now() - Duration::hours(30);
        repo.append(stale).await.expect("append stale");
        for _ in 0..2 {
            repo.append(AgentLogEntry::new(agent.clone(), ACTION_REPLIED, json!({})))
                .await
                .expect("append reply");
        }
        repo.append(AgentLogEntry::new(
            agent.clone(),
            ACTION_RATE_LIMITED,
            json!({"reason": "contact_hourly"}),
        ))
        .await
        .expect("append limit");
        repo.append(AgentLogEntry::new(AgentId("agent-2".to_string()), ACTION_REPLIED, json!({})))
            .await
            .expect("append other agent");

        let since = Utc::now() - Duration::hours(24);
        let replies = repo.count_actions_since(&agent, ACTION_REPLIED, since).await.expect("count");
        assert_eq!(replies, 2);

        let entries = repo.list_for_agent(&agent).await.expect("list");
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].action, ACTION_RATE_LIMITED);
        assert_eq!(entries[3].details, json!({"reason": "contact_hourly"}));

        pool.close().await;
    }
}
