use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use frontdesk_core::domain::agent::EmployeeTypeId;
use frontdesk_core::flows::{FlowDefinition, FlowDocument};

use super::{
    format_timestamp, parse_json, parse_timestamp, to_json, FlowDefinitionRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlFlowDefinitionRepository {
    pool: DbPool,
}

impl SqlFlowDefinitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Every active definition across employee types.
    pub async fn list_active(&self) -> Result<Vec<FlowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, employee_type_id, flow_name, version, is_active, definition_json, updated_at
             FROM conversation_flow
             WHERE is_active = 1
             ORDER BY employee_type_id, flow_name, version",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(definition_from_row).collect()
    }
}

#[async_trait::async_trait]
impl FlowDefinitionRepository for SqlFlowDefinitionRepository {
    async fn find_active(
        &self,
        employee_type_id: &EmployeeTypeId,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, employee_type_id, flow_name, version, is_active, definition_json, updated_at
             FROM conversation_flow
             WHERE employee_type_id = ? AND is_active = 1
             ORDER BY updated_at DESC, version DESC, id
             LIMIT 1",
        )
        .bind(&employee_type_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(definition_from_row).transpose()
    }

    async fn save(&self, definition: FlowDefinition) -> Result<(), RepositoryError> {
        let document = FlowDocument { steps: definition.steps.clone() };
        let now = format_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO employee_type (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&definition.employee_type_id.0)
        .bind(&definition.employee_type_id.0)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_flow (
                id,
                employee_type_id,
                flow_name,
                version,
                is_active,
                definition_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                employee_type_id = excluded.employee_type_id,
                flow_name = excluded.flow_name,
                version = excluded.version,
                is_active = excluded.is_active,
                definition_json = excluded.definition_json,
                updated_at = excluded.updated_at",
        )
        .bind(&definition.id)
        .bind(&definition.employee_type_id.0)
        .bind(&definition.flow_name)
        .bind(definition.version)
        .bind(definition.is_active)
        .bind(to_json("definition_json", &document)?)
        .bind(&now)
        .bind(format_timestamp(definition.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn definition_from_row(row: SqliteRow) -> Result<FlowDefinition, RepositoryError> {
    let document: String = row.try_get("definition_json")?;
    let document: FlowDocument = parse_json("definition_json", &document)?;

    Ok(FlowDefinition {
        id: row.try_get("id")?,
        employee_type_id: EmployeeTypeId(row.try_get("employee_type_id")?),
        flow_name: row.try_get("flow_name")?,
        version: row.try_get("version")?,
        is_active: row.try_get("is_active")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        steps: document.steps,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SubsecRound, Utc};

    use frontdesk_core::domain::agent::EmployeeTypeId;
    use frontdesk_core::flows::{FlowBranch, FlowDefinition, FlowStep};

    use super::SqlFlowDefinitionRepository;
    use crate::repositories::test_support::setup_pool;
    use crate::repositories::FlowDefinitionRepository;

    fn definition(id: &str, version: i64, age_minutes: i64, active: bool) -> FlowDefinition {
        FlowDefinition {
            id: id.to_string(),
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            flow_name: "office_cleaning".to_string(),
            version,
            is_active: active,
            updated_at: (Utc::now() - Duration::minutes(age_minutes)).trunc_subsecs(6),
            steps: vec![FlowStep {
                id: "greeting".to_string(),
                kind: "question".to_string(),
                question: Some("Is this for an office or a home?".to_string()),
                data_field: None,
                data_fields: Vec::new(),
                branches: vec![FlowBranch {
                    condition: "office".to_string(),
                    next_step: Some("complete".to_string()),
                }],
                next: None,
            }],
        }
    }

    #[tokio::test]
    async fn find_active_prefers_latest_update_then_version() {
        let pool = setup_pool().await;
        let repo = SqlFlowDefinitionRepository::new(pool.clone());
        let employee_type = EmployeeTypeId("receptionist".to_string());

        assert_eq!(repo.find_active(&employee_type).await.expect("find"), None);

        repo.save(definition("flow-old", 5, 60, true)).await.expect("save old");
        repo.save(definition("flow-new", 2, 1, true)).await.expect("save new");
        repo.save(definition("flow-draft", 9, 0, false)).await.expect("save draft");

        let active = repo.find_active(&employee_type).await.expect("find").expect("active flow");
        assert_eq!(active.id, "flow-new");
        assert_eq!(active.steps.len(), 1);
        assert_eq!(active.steps[0].branches[0].next_step.as_deref(), Some("complete"));

        pool.close().await;
    }

    #[tokio::test]
    async fn list_active_skips_drafts() {
        let pool = setup_pool().await;
        let repo = SqlFlowDefinitionRepository::new(pool.clone());
        repo.save(definition("flow-live", 1, 5, true)).await.expect("save live");
        repo.save(definition("flow-draft", 2, 0, false)).await.expect("save draft");

        let ids: Vec<String> =
            repo.list_active().await.expect("list").into_iter().map(|flow| flow.id).collect();
        assert_eq!(ids, vec!["flow-live".to_string()]);

        pool.close().await;
    }

    #[tokio::test]
    async fn equal_update_times_fall_back_to_highest_version() {
        let pool = setup_pool().await;
        let repo = SqlFlowDefinitionRepository::new(pool.clone());

        let mut first = definition("flow-a", 1, 0, true);
        let mut second = definition("flow-b", 3, 0, true);
        second.updated_at = first.updated_at;
        first.flow_name = "first".to_string();
        repo.save(first).await.expect("save a");
        repo.save(second).await.expect("save b");

        let active = repo
            .find_active(&EmployeeTypeId("receptionist".to_string()))
            .await
            .expect("find")
            .expect("active flow");
        assert_eq!(active.id, "flow-b");
        assert_eq!(active.version, 3);

        pool.close().await;
    }
}
