use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::{AgentId, OrganizationId};
use frontdesk_core::domain::conversation::ConversationId;
use frontdesk_core::domain::lead::{Booking, BookingId, BookingStatus, Lead, LeadId};

use super::{
    format_timestamp, parse_channel, parse_json, parse_timestamp, to_json, BookingRepository,
    LeadRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn insert(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (
                id,
                organization_id,
                agent_id,
                conversation_id,
                name,
                phone,
                email,
                notes,
                service_type,
                service_data_json,
                urgency,
                source_channel,
                lead_score,
                is_hot,
                status,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lead.id.0)
        .bind(&lead.organization_id.0)
        .bind(&lead.agent_id.0)
        .bind(&lead.conversation_id.0)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(&lead.notes)
        .bind(&lead.service_type)
        .bind(to_json("service_data_json", &lead.service_data)?)
        .bind(&lead.urgency)
        .bind(lead.source_channel.as_str())
        .bind(i64::from(lead.score))
        .bind(lead.is_hot)
        .bind(&lead.status)
        .bind(format_timestamp(lead.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                organization_id,
                agent_id,
                conversation_id,
                name,
                phone,
                email,
                notes,
                service_type,
                service_data_json,
                urgency,
                source_channel,
                lead_score,
                is_hot,
                status,
                created_at
             FROM lead
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let service_data: String = row.try_get("service_data_json")?;
    let source_channel: String = row.try_get("source_channel")?;
    let score: i64 = row.try_get("lead_score")?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        notes: row.try_get("notes")?,
        service_type: row.try_get("service_type")?,
        service_data: parse_json("service_data_json", &service_data)?,
        urgency: row.try_get("urgency")?,
        source_channel: parse_channel(&source_channel)?,
        score: u8::try_from(score)
            .map_err(|_| RepositoryError::Decode(format!("lead score `{score}` out of range")))?,
        is_hot: row.try_get("is_hot")?,
        status: row.try_get("status")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn insert(&self, booking: Booking) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO booking (
                id,
                organization_id,
                agent_id,
                conversation_id,
                attendee_name,
                attendee_email,
                attendee_phone,
                preferred_date,
                reason,
                status,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking.id.0)
        .bind(&booking.organization_id.0)
        .bind(&booking.agent_id.0)
        .bind(&booking.conversation_id.0)
        .bind(&booking.attendee_name)
        .bind(&booking.attendee_email)
        .bind(&booking.attendee_phone)
        .bind(&booking.preferred_date)
        .bind(&booking.reason)
        .bind(booking.status.as_str())
        .bind(format_timestamp(booking.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                organization_id,
                agent_id,
                conversation_id,
                attendee_name,
                attendee_email,
                attendee_phone,
                preferred_date,
                reason,
                status,
                created_at
             FROM booking
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(booking_from_row).transpose()
    }
}

fn booking_from_row(row: SqliteRow) -> Result<Booking, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(Booking {
        id: BookingId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        attendee_name: row.try_get("attendee_name")?,
        attendee_email: row.try_get("attendee_email")?,
        attendee_phone: row.try_get("attendee_phone")?,
        preferred_date: row.try_get("preferred_date")?,
        reason: row.try_get("reason")?,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status}`")))?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
