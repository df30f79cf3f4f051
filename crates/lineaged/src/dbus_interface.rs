use std::sync::Arc;

use zbus::interface;

use lineage_core::{
    Coordinator, Embedding, Error, FaceEmbedder, IdentityService, SearchEngine, TreeEngine,
};
use lineage_store::{SqliteEmbeddingStore, SqlitePersonStore, SqliteTreeStore};

pub const BUS_NAME: &str = "org.freedesktop.Lineage1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Lineage1";

type Identity = IdentityService<SqliteEmbeddingStore, SqlitePersonStore>;
type Search = SearchEngine<SqliteEmbeddingStore>;
type Trees = TreeEngine<SqliteTreeStore, SqlitePersonStore>;
type Enricher = Coordinator<SqliteEmbeddingStore, SqliteTreeStore, SqlitePersonStore>;

/// D-Bus interface for the Lineage daemon.
///
/// Bus name: org.freedesktop.Lineage1
/// Object path: /org/freedesktop/Lineage1
///
/// Embeddings cross the wire as arrays of doubles; structured results
/// come back as JSON strings.
pub struct LineageService {
    identity: Identity,
    search: Search,
    trees: Trees,
    coordinator: Enricher,
    /// Optional face-model collaborator. When absent, image-based
    /// registration reports NotSupported.
    embedder: Option<Arc<dyn FaceEmbedder>>,
    default_top_k: usize,
    default_min_score: f32,
}

impl LineageService {
    pub fn new(
        identity: Identity,
        search: Search,
        trees: Trees,
        coordinator: Enricher,
        embedder: Option<Arc<dyn FaceEmbedder>>,
        default_top_k: usize,
        default_min_score: f32,
    ) -> Self {
        Self {
            identity,
            search,
            trees,
            coordinator,
            embedder,
            default_top_k,
            default_min_score,
        }
    }

    fn effective_top_k(&self, top_k: u32) -> usize {
        if top_k == 0 {
            self.default_top_k
        } else {
            top_k as usize
        }
    }

    fn effective_min_score(&self, min_score: f64) -> f32 {
        if min_score.is_finite() {
            min_score as f32
        } else {
            self.default_min_score
        }
    }
}

fn to_fdo(err: Error) -> zbus::fdo::Error {
    match err {
        Error::InvalidVector(_) | Error::InvalidQuery(_) | Error::NoFaceDetected => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        _ => zbus::fdo::Error::Failed(err.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|err| zbus::fdo::Error::Failed(err.to_string()))
}

fn embedding_from_wire(values: Vec<f64>) -> Embedding {
    Embedding::new(values.into_iter().map(|v| v as f32).collect())
}

fn opt(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[interface(name = "org.freedesktop.Lineage1")]
impl LineageService {
    /// Register a new identity from a pre-extracted embedding.
    /// An empty `profile_ref` means none. Returns the person id.
    async fn register(
        &self,
        display_name: &str,
        contact_key: &str,
        profile_ref: &str,
        embedding: Vec<f64>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(contact_key, "register requested");
        let person = self
            .identity
            .register(
                display_name,
                contact_key,
                opt(profile_ref),
                embedding_from_wire(embedding),
            )
            .await
            .map_err(to_fdo)?;
        Ok(person.person_id)
    }

    /// Register a new identity from raw image bytes. Requires a face
    /// embedder to be wired into the daemon.
    async fn register_from_image(
        &self,
        display_name: &str,
        contact_key: &str,
        profile_ref: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(contact_key, bytes = image.len(), "register from image requested");
        let Some(embedder) = &self.embedder else {
            return Err(zbus::fdo::Error::NotSupported(
                "no face embedder configured".into(),
            ));
        };
        let embedding = embedder.extract(&image).map_err(to_fdo)?;
        let person = self
            .identity
            .register(display_name, contact_key, opt(profile_ref), embedding)
            .await
            .map_err(to_fdo)?;
        Ok(person.person_id)
    }

    /// Replace the stored embedding for an existing identity.
    async fn re_enroll(&self, person_id: &str, embedding: Vec<f64>) -> zbus::fdo::Result<()> {
        tracing::info!(person_id, "re-enroll requested");
        self.identity
            .re_enroll(person_id, embedding_from_wire(embedding))
            .await
            .map_err(to_fdo)
    }

    /// Delete an identity: embedding, tree membership, person record.
    async fn remove_identity(&self, person_id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(person_id, "remove identity requested");
        self.identity.delete_identity(person_id).await.map_err(to_fdo)
    }

    /// Fetch a person document as JSON.
    async fn person(&self, person_id: &str) -> zbus::fdo::Result<String> {
        let person = self.identity.get_person(person_id).await.map_err(to_fdo)?;
        to_json(&person)
    }

    /// Rank the embedding store against a query embedding. Returns a
    /// JSON array of {person_id, score}, best first.
    ///
    /// `top_k` of 0 selects the configured default; a non-finite
    /// `min_score` (NaN) selects the configured default threshold.
    async fn search(
        &self,
        embedding: Vec<f64>,
        top_k: u32,
        min_score: f64,
    ) -> zbus::fdo::Result<String> {
        let hits = self
            .search
            .search(
                &embedding_from_wire(embedding),
                self.effective_top_k(top_k),
                self.effective_min_score(min_score),
            )
            .await
            .map_err(to_fdo)?;
        to_json(&hits)
    }

    /// Like `search`, with each hit enriched with the tree ids the
    /// matched identity created.
    async fn search_with_trees(
        &self,
        embedding: Vec<f64>,
        top_k: u32,
        min_score: f64,
    ) -> zbus::fdo::Result<String> {
        let hits = self
            .coordinator
            .search_and_enrich(
                &embedding_from_wire(embedding),
                self.effective_top_k(top_k),
                self.effective_min_score(min_score),
            )
            .await
            .map_err(to_fdo)?;
        to_json(&hits)
    }

    /// Create a family tree with the given person as its root member.
    /// Returns the tree id.
    async fn create_tree(&self, name: &str, creator_person_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, creator_person_id, "create tree requested");
        let creator = self
            .identity
            .get_person(creator_person_id)
            .await
            .map_err(to_fdo)?;
        self.trees.create_tree(name, &creator).await.map_err(to_fdo)
    }

    /// Create a person record (no embedding yet) and append them under
    /// the given parent, wherever that parent sits in the tree. Returns
    /// the new person id.
    async fn add_member(
        &self,
        tree_id: &str,
        parent_person_id: &str,
        display_name: &str,
        contact_key: &str,
        relation_label: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(tree_id, parent_person_id, relation_label, "add member requested");
        let person = self
            .identity
            .create_person(display_name, contact_key, None)
            .await
            .map_err(to_fdo)?;

        if let Err(err) = self
            .trees
            .add_member(tree_id, parent_person_id, &person, relation_label)
            .await
        {
            // The person record was created for this insertion only.
            let _ = self.identity.delete_identity(&person.person_id).await;
            return Err(to_fdo(err));
        }
        Ok(person.person_id)
    }

    /// Record a symmetric link between two trees.
    async fn link_trees(&self, tree_a: &str, tree_b: &str) -> zbus::fdo::Result<()> {
        tracing::info!(tree_a, tree_b, "link trees requested");
        self.trees.link_trees(tree_a, tree_b).await.map_err(to_fdo)
    }

    /// Fetch a full tree document as JSON.
    async fn tree(&self, tree_id: &str) -> zbus::fdo::Result<String> {
        let tree = self.trees.get_tree(tree_id).await.map_err(to_fdo)?;
        to_json(&tree)
    }

    /// Ids of every tree the given person created.
    async fn trees_created_by(&self, person_id: &str) -> zbus::fdo::Result<Vec<String>> {
        let ids = self
            .trees
            .find_trees_created_by(person_id)
            .await
            .map_err(to_fdo)?;
        Ok(ids.into_iter().collect())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "embedder": self.embedder.is_some(),
            "default_top_k": self.default_top_k,
            "default_min_score": self.default_min_score,
        })
        .to_string())
    }
}
