use booru_sync::db;
use booru_sync::migration::{Migrator, MigratorTrait};
use console::style;

use crate::MigrateAction;

pub(crate) async fn handle_migrate(
    action: MigrateAction,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect(database_url).await?;

    match action {
        MigrateAction::Up => {
            let pending = Migrator::get_pending_migrations(&db).await?.len();
            if pending == 0 {
                println!("{} Schema is up to date.", style("✓").green().bold());
                return Ok(());
            }
            tracing::info!(pending, "Applying migrations");
            Migrator::up(&db, None).await?;
            println!(
                "{} Applied {} migration(s).",
                style("✓").green().bold(),
                pending
            );
        }
        MigrateAction::Down => {
            tracing::info!("Rolling back last migration");
            Migrator::down(&db, Some(1)).await?;
            println!("Rolled back the last migration.");
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(&db).await?;
            let pending = Migrator::get_pending_migrations(&db).await?;
            println!("Migration status:");
            for migration in &applied {
                println!("  {} {}", style("applied").green(), migration.name());
            }
            for migration in &pending {
                println!("  {} {}", style("pending").yellow(), migration.name());
            }
        }
        MigrateAction::Fresh => {
            tracing::warn!("Dropping all tables");
            Migrator::fresh(&db).await?;
            println!("Dropped all tables and reapplied migrations.");
        }
    }

    Ok(())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_up_and_status_on_empty_database() {
        handle_migrate(MigrateAction::Up, "sqlite::memory:")
            .await
            .expect("migrations should apply");
        handle_migrate(MigrateAction::Status, "sqlite::memory:")
            .await
            .expect("status should report");
    }
}
