use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::{AgentId, Channel};
use frontdesk_core::domain::conversation::{
    Contact, Conversation, ConversationId, ConversationStatus,
};
use frontdesk_core::flows::FlowState;

use super::{
    format_timestamp, new_id, parse_channel, parse_json, parse_timestamp, to_json,
    ConversationRepository, RepositoryError,
};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id,
    agent_id,
    contact_phone,
    contact_email,
    contact_name,
    channel,
    status,
    flow_state_json,
    flow_type,
    flow_version,
    created_at,
    updated_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_or_create_open(
        &self,
        agent_id: &AgentId,
        channel: Channel,
        contact: &Contact,
    ) -> Result<Conversation, RepositoryError> {
        let contact_key = contact.key();
        let now = format_timestamp(Utc::now());

        // The partial unique index turns a racing second insert into a no-op.
        sqlx::query(
            "INSERT INTO conversation (
                id,
                agent_id,
                contact_phone,
                contact_email,
                contact_name,
                contact_key,
                channel,
                status,
                flow_version,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, 'open', 0, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(new_id())
        .bind(&agent_id.0)
        .bind(&contact.phone)
        .bind(&contact.email)
        .bind(&contact.name)
        .bind(&contact_key)
        .bind(channel.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS}
             FROM conversation
             WHERE agent_id = ? AND channel = ? AND contact_key = ? AND status = 'open'"
        ))
        .bind(&agent_id.0)
        .bind(channel.as_str())
        .bind(&contact_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => conversation_from_row(row),
            None => Err(RepositoryError::Conflict(format!(
                "open conversation for `{contact_key}` was closed while it was being resolved"
            ))),
        }
    }

    async fn compare_and_set_flow_state(
        &self,
        id: &ConversationId,
        expected_version: i64,
        state: &FlowState,
    ) -> Result<bool, RepositoryError> {
        let state_json = to_json("flow_state_json", state)?;
        let result = sqlx::query(
            "UPDATE conversation
             SET flow_state_json = ?,
                 flow_type = ?,
                 flow_version = flow_version + 1,
                 updated_at = ?
             WHERE id = ? AND flow_version = ?",
        )
        .bind(state_json)
        .bind(&state.flow_name)
        .bind(format_timestamp(Utc::now()))
        .bind(&id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversation SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_timestamp(Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch(&self, id: &ConversationId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversation SET updated_at = ? WHERE id = ?")
            .bind(format_timestamp(Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let flow_state_json: Option<String> = row.try_get("flow_state_json")?;
    let flow_state = flow_state_json
        .as_deref()
        .map(|raw| parse_json::<FlowState>("flow_state_json", raw))
        .transpose()?
        .filter(|state| !state.is_blank());

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        contact: Contact {
            phone: row.try_get("contact_phone")?,
            email: row.try_get("contact_email")?,
            name: row.try_get("contact_name")?,
        },
        channel: parse_channel(&channel)?,
        status: ConversationStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown conversation status `{status}`"))
        })?,
        flow_state,
        flow_type: row.try_get("flow_type")?,
        flow_version: row.try_get("flow_version")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
