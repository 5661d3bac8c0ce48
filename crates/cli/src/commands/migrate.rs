use crate::commands::CommandResult;
use frontdesk_core::config::{AppConfig, LoadOptions};
use frontdesk_db::{connect, migrations};
use serde_json::json;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let migrated = migrations::run_pending(&pool).await;
        pool.close().await;
        migrated.map_err(|error| ("migration", error.to_string(), 5u8))
    });

    match result {
        Ok(applied) => {
            let message = if applied.is_empty() {
                format!("`{}` is already up to date", config.database.url)
            } else {
                format!("applied {} migration(s) to `{}`", applied.len(), config.database.url)
            };
            CommandResult::success_with_details(
                "migrate",
                message,
                json!({ "applied_versions": applied }),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
