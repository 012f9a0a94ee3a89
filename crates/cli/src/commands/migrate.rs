use tracing::info;

use crate::commands::{load_config, open_store, runtime, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    match apply() {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(failure) => CommandResult::failure("migrate", failure),
    }
}

fn apply() -> Result<(), CommandFailure> {
    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = open_store(&config).await?;
        info!(
            event_name = "cli.migrate.applied",
            correlation_id = "cli",
            database_url = %config.database.url,
            "pending migrations applied"
        );
        pool.close().await;
        Ok(())
    })
}
