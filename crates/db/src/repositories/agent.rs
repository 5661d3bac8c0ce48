use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::{
    Agent, AgentId, AgentStatus, Channel, EmployeeTypeId, OrganizationId,
};

use super::{format_timestamp, parse_json, to_json, AgentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                a.id,
                a.organization_id,
                o.name AS organization_name,
                a.employee_type_id,
                a.name,
                a.custom_system_prompt,
                a.status,
                a.channels_json
             FROM agent a
             JOIN organization o ON o.id = a.organization_id
             WHERE a.id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(agent_from_row).transpose()
    }

    /// Upserts the agent along with the organization and employee type rows it points at.
    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        let channels = to_json("channels_json", &agent.channels)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO organization (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&agent.organization_id.0)
        .bind(&agent.organization_name)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO employee_type (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&agent.employee_type_id.0)
        .bind(&agent.employee_type_id.0)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO agent (
                id,
                organization_id,
                employee_type_id,
                name,
                custom_system_prompt,
                status,
                channels_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                employee_type_id = excluded.employee_type_id,
                name = excluded.name,
                custom_system_prompt = excluded.custom_system_prompt,
                status = excluded.status,
                channels_json = excluded.channels_json,
                updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.organization_id.0)
        .bind(&agent.employee_type_id.0)
        .bind(&agent.name)
        .bind(&agent.custom_prompt)
        .bind(agent.status.as_str())
        .bind(channels)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, RepositoryError> {
    let status: String = row.try_get("status")?;
    let channels: String = row.try_get("channels_json")?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        organization_name: row.try_get("organization_name")?,
        employee_type_id: EmployeeTypeId(row.try_get("employee_type_id")?),
        name: row.try_get("name")?,
        custom_prompt: row.try_get("custom_system_prompt")?,
        status: AgentStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown agent status `{status}`")))?,
        channels: parse_json::<Vec<Channel>>("channels_json", &channels)?,
    })
}
