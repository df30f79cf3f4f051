use anyhow::Result;
use tracing_subscriber::EnvFilter;

use lineage_core::{Coordinator, IdentityService, SearchEngine, TreeEngine};
use lineage_store::{SqliteEmbeddingStore, SqlitePersonStore, SqliteTreeStore, VaultKey};

mod config;
mod dbus_interface;

use config::Config;
use dbus_interface::{LineageService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("lineaged starting");

    let config = Config::from_env();

    // Open storage and build the engines once, fail-fast; request
    // handlers receive these handles rather than reaching for globals.
    let conn = lineage_store::open_database(&config.db_path).await?;

    let key = if config.encrypt_embeddings {
        let key = VaultKey::load_or_create(&config.key_path)?;
        tracing::info!(fingerprint = %key.fingerprint(), "vault key loaded");
        Some(key)
    } else {
        tracing::warn!("embedding encryption disabled via LINEAGE_ENCRYPT_EMBEDDINGS=0");
        None
    };

    let embeddings = SqliteEmbeddingStore::new(conn.clone(), key);
    let persons = SqlitePersonStore::new(conn.clone());
    let trees = SqliteTreeStore::new(conn);

    let identity = IdentityService::new(embeddings.clone(), persons.clone());
    let search = SearchEngine::new(embeddings.clone());
    let tree_engine = TreeEngine::new(trees, persons);
    let coordinator = Coordinator::new(search.clone(), tree_engine.clone());

    let service = LineageService::new(
        identity,
        search,
        tree_engine,
        coordinator,
        None, // no face embedder wired; callers supply embeddings
        config.default_top_k,
        config.default_min_score,
    );

    let builder = if config.use_system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, "lineaged ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("lineaged shutting down");

    Ok(())
}
