use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::EmployeeTypeId;
use frontdesk_core::scoring::ScoringRule;

use super::{
    format_timestamp, new_id, parse_json, to_json, RepositoryError, ScoringRuleRepository,
};
use crate::DbPool;

pub struct SqlScoringRuleRepository {
    pool: DbPool,
}

impl SqlScoringRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_all(&self) -> Result<Vec<ScoringRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT employee_type_id, rule_name, conditions_json, score_adjustment
             FROM lead_scoring_rule
             ORDER BY employee_type_id, created_at, rule_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(rule_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ScoringRuleRepository for SqlScoringRuleRepository {
    async fn list_for_employee_type(
        &self,
        employee_type_id: &EmployeeTypeId,
    ) -> Result<Vec<ScoringRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT employee_type_id, rule_name, conditions_json, score_adjustment
             FROM lead_scoring_rule
             WHERE employee_type_id = ?
             ORDER BY created_at, rule_name",
        )
        .bind(&employee_type_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(rule_from_row).collect()
    }

    async fn save(&self, rule: ScoringRule) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO employee_type (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&rule.employee_type_id.0)
        .bind(&rule.employee_type_id.0)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO lead_scoring_rule (
                id,
                employee_type_id,
                rule_name,
                conditions_json,
                score_adjustment,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(&rule.employee_type_id.0)
        .bind(&rule.rule_name)
        .bind(to_json("conditions_json", &rule.conditions)?)
        .bind(rule.score_adjustment)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn rule_from_row(row: SqliteRow) -> Result<ScoringRule, RepositoryError> {
    let conditions: String = row.try_get("conditions_json")?;
    Ok(ScoringRule {
        employee_type_id: EmployeeTypeId(row.try_get("employee_type_id")?),
        rule_name: row.try_get("rule_name")?,
        conditions: parse_json("conditions_json", &conditions)?,
        score_adjustment: row.try_get("score_adjustment")?,
    })
}
