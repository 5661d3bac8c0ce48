use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::conversation::ConversationId;
use frontdesk_core::domain::message::{Message, MessageId, MessageRole, NewMessage};

use super::{
    count_to_u32, format_timestamp, new_id, parse_channel, parse_json, parse_timestamp, to_json,
    MessageRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let id = new_id();
        let created_at = Utc::now();
        let metadata = message
            .metadata
            .as_ref()
            .map(|metadata| to_json("metadata_json", metadata))
            .transpose()?;

        let result = sqlx::query(
            "INSERT INTO message (id, conversation_id, role, content, channel, metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.channel.as_str())
        .bind(metadata)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: MessageId(id),
            seq: result.last_insert_rowid(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            channel: message.channel,
            metadata: message.metadata,
            created_at,
        })
    }

    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT seq, id, conversation_id, role, content, channel, metadata_json, created_at
             FROM message
             WHERE conversation_id = ?
             ORDER BY created_at DESC, seq DESC
             LIMIT ?",
        )
        .bind(&conversation_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages =
            rows.into_iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn count_by_role_since(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32, RepositoryError> {
        let count: i64 = match since {
            Some(since) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM message
                     WHERE conversation_id = ? AND role = ? AND created_at >= ?",
                )
                .bind(&conversation_id.0)
                .bind(role.as_str())
                .bind(format_timestamp(since))
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM message WHERE conversation_id = ? AND role = ?",
                )
                .bind(&conversation_id.0)
                .bind(role.as_str())
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(count_to_u32(count))
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role: String = row.try_get("role")?;
    let channel: String = row.try_get("channel")?;
    let metadata: Option<String> = row.try_get("metadata_json")?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        seq: row.try_get("seq")?,
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        role: MessageRole::parse(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role}`")))?,
        content: row.try_get("content")?,
        channel: parse_channel(&channel)?,
        metadata: metadata.as_deref().map(|raw| parse_json("metadata_json", raw)).transpose()?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
