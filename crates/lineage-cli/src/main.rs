use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// D-Bus proxy for the lineaged daemon. `#[zbus::proxy]` generates the
// async `LineageProxy` used below.
#[zbus::proxy(
    interface = "org.freedesktop.Lineage1",
    default_service = "org.freedesktop.Lineage1",
    default_path = "/org/freedesktop/Lineage1"
)]
trait Lineage {
    async fn register(
        &self,
        display_name: &str,
        contact_key: &str,
        profile_ref: &str,
        embedding: Vec<f64>,
    ) -> zbus::Result<String>;
    async fn re_enroll(&self, person_id: &str, embedding: Vec<f64>) -> zbus::Result<()>;
    async fn remove_identity(&self, person_id: &str) -> zbus::Result<()>;
    async fn person(&self, person_id: &str) -> zbus::Result<String>;
    async fn search(
        &self,
        embedding: Vec<f64>,
        top_k: u32,
        min_score: f64,
    ) -> zbus::Result<String>;
    async fn search_with_trees(
        &self,
        embedding: Vec<f64>,
        top_k: u32,
        min_score: f64,
    ) -> zbus::Result<String>;
    async fn create_tree(&self, name: &str, creator_person_id: &str) -> zbus::Result<String>;
    async fn add_member(
        &self,
        tree_id: &str,
        parent_person_id: &str,
        display_name: &str,
        contact_key: &str,
        relation_label: &str,
    ) -> zbus::Result<String>;
    async fn link_trees(&self, tree_a: &str, tree_b: &str) -> zbus::Result<()>;
    async fn tree(&self, tree_id: &str) -> zbus::Result<String>;
    async fn trees_created_by(&self, person_id: &str) -> zbus::Result<Vec<String>>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "lineage", about = "Lineage face-matching and family-tree CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity from an embedding file
    Register {
        #[arg(short, long)]
        name: String,
        /// Unique contact handle (e.g., an email address)
        #[arg(short, long)]
        contact: String,
        /// Opaque profile image reference
        #[arg(long)]
        profile_ref: Option<String>,
        /// JSON file holding a 512-element embedding array
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Replace the stored embedding for an identity
    ReEnroll {
        person_id: String,
        #[arg(short, long)]
        embedding: PathBuf,
    },
    /// Delete an identity and everything attached to it
    Remove { person_id: String },
    /// Show a person document
    Person { person_id: String },
    /// Rank the store against a query embedding
    Search {
        #[arg(short, long)]
        embedding: PathBuf,
        /// Result limit (0 = daemon default)
        #[arg(short, long, default_value_t = 0)]
        top_k: u32,
        /// Similarity threshold in [-1, 1] (omit for daemon default)
        #[arg(short, long)]
        min_score: Option<f64>,
        /// Attach the trees each matched identity created
        #[arg(long)]
        with_trees: bool,
    },
    /// Create a family tree rooted at an existing person
    CreateTree {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        creator: String,
    },
    /// Add a member under a parent anywhere in a tree
    AddMember {
        #[arg(short, long)]
        tree: String,
        #[arg(short, long)]
        parent: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        contact: String,
        /// Relation to the parent (e.g., "child", "spouse")
        #[arg(short, long)]
        relation: String,
    },
    /// Link two family trees symmetrically
    LinkTrees { tree_a: String, tree_b: String },
    /// Show a full tree document
    Tree { tree_id: String },
    /// List trees created by a person
    TreesCreatedBy { person_id: String },
    /// Show daemon status
    Status,
}

/// Read a JSON array of numbers from disk.
fn load_embedding(path: &Path) -> Result<Vec<f64>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding file {}", path.display()))?;
    let values: Vec<f64> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing embedding file {}", path.display()))?;
    Ok(values)
}

/// Re-indent a JSON payload from the daemon for terminal output.
fn print_json(payload: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn connect() -> Result<LineageProxy<'static>> {
    let use_system_bus = std::env::var("LINEAGE_BUS")
        .map(|v| v == "system")
        .unwrap_or(false);
    let conn = if use_system_bus {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to the bus — is lineaged running?")?;
    Ok(LineageProxy::new(&conn).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let proxy = connect().await?;

    match cli.command {
        Commands::Register {
            name,
            contact,
            profile_ref,
            embedding,
        } => {
            let values = load_embedding(&embedding)?;
            let person_id = proxy
                .register(&name, &contact, profile_ref.as_deref().unwrap_or(""), values)
                .await?;
            println!("registered: {person_id}");
        }
        Commands::ReEnroll {
            person_id,
            embedding,
        } => {
            let values = load_embedding(&embedding)?;
            proxy.re_enroll(&person_id, values).await?;
            println!("re-enrolled: {person_id}");
        }
        Commands::Remove { person_id } => {
            proxy.remove_identity(&person_id).await?;
            println!("removed: {person_id}");
        }
        Commands::Person { person_id } => {
            print_json(&proxy.person(&person_id).await?)?;
        }
        Commands::Search {
            embedding,
            top_k,
            min_score,
            with_trees,
        } => {
            let values = load_embedding(&embedding)?;
            let min_score = min_score.unwrap_or(f64::NAN);
            let payload = if with_trees {
                proxy.search_with_trees(values, top_k, min_score).await?
            } else {
                proxy.search(values, top_k, min_score).await?
            };
            print_json(&payload)?;
        }
        Commands::CreateTree { name, creator } => {
            let tree_id = proxy.create_tree(&name, &creator).await?;
            println!("created tree: {tree_id}");
        }
        Commands::AddMember {
            tree,
            parent,
            name,
            contact,
            relation,
        } => {
            let person_id = proxy
                .add_member(&tree, &parent, &name, &contact, &relation)
                .await?;
            println!("added member: {person_id}");
        }
        Commands::LinkTrees { tree_a, tree_b } => {
            proxy.link_trees(&tree_a, &tree_b).await?;
            println!("linked: {tree_a} <-> {tree_b}");
        }
        Commands::Tree { tree_id } => {
            print_json(&proxy.tree(&tree_id).await?)?;
        }
        Commands::TreesCreatedBy { person_id } => {
            for tree_id in proxy.trees_created_by(&person_id).await? {
                println!("{tree_id}");
            }
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}
