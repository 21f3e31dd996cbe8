//! `crumb migrate`: schema setup and optional seeding.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crumb_core::{ContentDb, Error};

#[derive(Debug, Clone, Serialize)]
pub struct MigrateOutput {
    pub database: PathBuf,
    pub seeded: Option<PathBuf>,
}

/// Migrations run when the database is opened; `seed` is executed afterwards.
pub async fn migrate_impl(db: &ContentDb, database: &Path, seed: Option<&Path>) -> Result<MigrateOutput, Error> {
    if let Some(seed) = seed {
        let sql = tokio::fs::read_to_string(seed).await?;
        db.execute_batch(sql).await?;
        tracing::info!(seed = %seed.display(), "seed applied");
    }
    Ok(MigrateOutput { database: database.to_path_buf(), seeded: seed.map(Path::to_path_buf) })
}
