//! PostgreSQL flag storage.
//!
//! Keeps one row per flagged chunk, keyed by the canonical chunk key.
//! The sweeper core is synchronous, so a private tokio runtime bridges
//! into the async connection pool.

use std::sync::Arc;

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime as PoolRuntime};
use tokio::runtime::Runtime;
use tokio_postgres::NoTls;

use super::FlagStorage;
use crate::error::{Error, Result};
use crate::flags::{ChunkKey, DEFAULT_FLAG, GENERATED_FLAG};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS chunk_flags (
    chunk_key TEXT PRIMARY KEY,
    last_visit BIGINT NOT NULL
)";

// Mirrors the in-process overwrite rule: only a greater value wins, a
// stored generated marker yields to any real timestamp, and an
// incoming generated marker never touches an existing row (the
// sentinel is numerically i64::MAX, so the plain comparison must not
// see it).
const UPSERT: &str = "INSERT INTO chunk_flags (chunk_key, last_visit) VALUES ($1, $2)
    ON CONFLICT (chunk_key) DO UPDATE SET last_visit = EXCLUDED.last_visit
    WHERE (chunk_flags.last_visit = $3 AND EXCLUDED.last_visit <> $3)
       OR (chunk_flags.last_visit <> $3 AND EXCLUDED.last_visit <> $3
           AND EXCLUDED.last_visit > chunk_flags.last_visit)";

const DELETE: &str = "DELETE FROM chunk_flags WHERE chunk_key = $1";

const SELECT: &str = "SELECT last_visit FROM chunk_flags WHERE chunk_key = $1";

pub struct PostgresFlagStorage {
    pool: Pool,
    rt: Arc<Runtime>,
}

impl PostgresFlagStorage {
    /// Connect, set up the pool and create the table if needed.
    pub fn connect(database_url: &str) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(PoolRuntime::Tokio1), NoTls)
            .map_err(|e| Error::Storage(format!("failed to create pool: {}", e)))?;

        let rt = Runtime::new()?;

        rt.block_on(async {
            let client = pool
                .get()
                .await
                .map_err(|e| Error::Storage(format!("failed to connect: {}", e)))?;
            client
                .execute(SCHEMA, &[])
                .await
                .map_err(|e| Error::Storage(format!("failed to init schema: {}", e)))?;
            Ok::<(), Error>(())
        })?;

        Ok(Self {
            pool,
            rt: Arc::new(rt),
        })
    }
}

impl FlagStorage for PostgresFlagStorage {
    fn update(&self, batch: &[(ChunkKey, i64)]) -> Result<()> {
        self.rt.block_on(async {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| Error::Storage(format!("failed to get connection: {}", e)))?;

            for (key, value) in batch {
                let chunk_key = key.to_string();
                let result = if *value == DEFAULT_FLAG {
                    client.execute(DELETE, &[&chunk_key]).await
                } else {
                    client.execute(UPSERT, &[&chunk_key, value, &GENERATED_FLAG]).await
                };
                result.map_err(|e| Error::Storage(format!("write failed for {}: {}", chunk_key, e)))?;
            }
            Ok(())
        })
    }

    fn get(&self, key: &ChunkKey) -> Result<Option<i64>> {
        self.rt.block_on(async {
            let client = self
                .pool
                .get()
                .await
                .map_err(|e| Error::Storage(format!("failed to get connection: {}", e)))?;

            let row = client
                .query_opt(SELECT, &[&key.to_string()])
                .await
                .map_err(|e| Error::Storage(format!("read failed for {}: {}", key, e)))?;

            Ok(row.map(|row| row.get(0)))
        })
    }
}
