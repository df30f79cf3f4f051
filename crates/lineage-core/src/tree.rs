//! Family-tree node model and engine.
//!
//! A tree is a rooted, ordered structure owned by exactly one
//! [`FamilyTree`] document. Parent lookup is an explicit depth-first
//! traversal returning a child-index path, so insertion mutates the
//! located node in place instead of rebuilding the structure.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{PersonStore, TreeStore};
use crate::types::Person;

/// Relation label carried by every tree root.
pub const ROOT_RELATION: &str = "self";

/// One member node: a person reference, their relation to the parent
/// node, and an ordered sequence of child nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMember {
    pub person_id: String,
    pub relation_label: String,
    #[serde(default)]
    pub children: Vec<TreeMember>,
}

impl TreeMember {
    pub fn new(person_id: impl Into<String>, relation_label: impl Into<String>) -> Self {
        Self {
            person_id: person_id.into(),
            relation_label: relation_label.into(),
            children: Vec::new(),
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn member_count(&self) -> usize {
        1 + self.children.iter().map(TreeMember::member_count).sum::<usize>()
    }
}

/// A family tree document: the root node plus symmetric links to peer
/// trees. Linking is a separate relation from containment — linked trees
/// never merge node structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyTree {
    pub tree_id: String,
    pub name: String,
    pub created_by: String,
    pub root: TreeMember,
    #[serde(default)]
    pub linked_trees: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl FamilyTree {
    /// Depth-first search over the whole node graph for the node owning
    /// `person_id`. Returns the child-index path from the root (empty
    /// path = the root itself), or `None` if the person is nowhere in the
    /// tree.
    pub fn find_path(&self, person_id: &str) -> Option<Vec<usize>> {
        fn walk(node: &TreeMember, person_id: &str, path: &mut Vec<usize>) -> bool {
            if node.person_id == person_id {
                return true;
            }
            for (idx, child) in node.children.iter().enumerate() {
                path.push(idx);
                if walk(child, person_id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        walk(&self.root, person_id, &mut path).then_some(path)
    }

    /// Resolve a path produced by [`find_path`](Self::find_path) to a
    /// mutable node reference.
    pub fn node_at_path_mut(&mut self, path: &[usize]) -> Option<&mut TreeMember> {
        let mut node = &mut self.root;
        for &idx in path {
            node = node.children.get_mut(idx)?;
        }
        Some(node)
    }

    pub fn member_count(&self) -> usize {
        self.root.member_count()
    }
}

/// Creates trees, inserts members at a located parent, and links peer
/// trees. Single-tree membership is enforced through the person store
/// before any tree mutation.
pub struct TreeEngine<T, P> {
    trees: T,
    persons: P,
    /// Per-tree mutexes serializing find-then-append against the same
    /// tree. The map itself is touched only briefly to hand out a lock.
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl<T: Clone, P: Clone> Clone for TreeEngine<T, P> {
    fn clone(&self) -> Self {
        Self {
            trees: self.trees.clone(),
            persons: self.persons.clone(),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<T: TreeStore, P: PersonStore> TreeEngine<T, P> {
    pub fn new(trees: T, persons: P) -> Self {
        Self {
            trees,
            persons,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn tree_lock(&self, tree_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut map = self
            .locks
            .lock()
            .map_err(|_| Error::StorageUnavailable("tree lock map poisoned".to_string()))?;
        Ok(Arc::clone(
            map.entry(tree_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    /// Create a tree with `creator` as its root member, labeled
    /// [`ROOT_RELATION`]. Fails with `AlreadyMember` if the creator
    /// already belongs to a tree.
    pub async fn create_tree(&self, name: &str, creator: &Person) -> Result<String> {
        let tree_id = Uuid::new_v4().to_string();

        // The claim is the atomic membership gate; it also covers the
        // case where `creator.tree_memberships` is stale.
        self.persons
            .claim_membership(&creator.person_id, &tree_id)
            .await?;

        let tree = FamilyTree {
            tree_id: tree_id.clone(),
            name: name.to_string(),
            created_by: creator.person_id.clone(),
            root: TreeMember::new(creator.person_id.clone(), ROOT_RELATION),
            linked_trees: BTreeSet::new(),
            created_at: Utc::now(),
        };

        if let Err(err) = self.trees.insert(tree).await {
            tracing::warn!(%tree_id, error = %err, "tree insert failed; rolling back membership claim");
            let _ = self
                .persons
                .release_membership(&creator.person_id, &tree_id)
                .await;
            return Err(err);
        }

        tracing::info!(%tree_id, creator = %creator.person_id, "family tree created");
        Ok(tree_id)
    }

    /// Append `new_person` as a child of the node owning
    /// `parent_person_id`, wherever that node sits in the tree.
    ///
    /// The parent search and the append run under the tree's mutex, so a
    /// concurrent `add_member` against the same tree cannot append under
    /// a stale snapshot.
    pub async fn add_member(
        &self,
        tree_id: &str,
        parent_person_id: &str,
        new_person: &Person,
        relation_label: &str,
    ) -> Result<()> {
        let lock = self.tree_lock(tree_id)?;
        let _guard = lock.lock().await;

        let mut tree = self
            .trees
            .get(tree_id)
            .await?
            .ok_or_else(|| Error::TreeNotFound(tree_id.to_string()))?;

        let path = tree
            .find_path(parent_person_id)
            .ok_or_else(|| Error::ParentNotFound {
                tree_id: tree_id.to_string(),
                person_id: parent_person_id.to_string(),
            })?;

        self.persons
            .claim_membership(&new_person.person_id, tree_id)
            .await?;

        let Some(parent) = tree.node_at_path_mut(&path) else {
            // find_path and node_at_path_mut disagree only if the tree
            // changed under the lock, which the lock rules out.
            return Err(Error::ParentNotFound {
                tree_id: tree_id.to_string(),
                person_id: parent_person_id.to_string(),
            });
        };
        parent
            .children
            .push(TreeMember::new(new_person.person_id.clone(), relation_label));

        if let Err(err) = self.trees.update(&tree).await {
            tracing::warn!(tree_id, error = %err, "tree update failed; rolling back membership claim");
            let _ = self
                .persons
                .release_membership(&new_person.person_id, tree_id)
                .await;
            return Err(err);
        }

        tracing::info!(
            tree_id,
            parent = parent_person_id,
            member = %new_person.person_id,
            relation = relation_label,
            "member added"
        );
        Ok(())
    }

    /// Record a symmetric link between two trees. Idempotent: re-linking
    /// already-linked trees is a no-op success. Linking a tree to itself
    /// is also a no-op (the tree must still exist).
    pub async fn link_trees(&self, tree_a: &str, tree_b: &str) -> Result<()> {
        if tree_a == tree_b {
            return match self.trees.get(tree_a).await? {
                Some(_) => Ok(()),
                None => Err(Error::TreeNotFound(tree_a.to_string())),
            };
        }

        // Always take the two tree locks in sorted order.
        let (first, second) = if tree_a < tree_b {
            (tree_a, tree_b)
        } else {
            (tree_b, tree_a)
        };
        let lock_first = self.tree_lock(first)?;
        let lock_second = self.tree_lock(second)?;
        let _guard_first = lock_first.lock().await;
        let _guard_second = lock_second.lock().await;

        let mut a = self
            .trees
            .get(tree_a)
            .await?
            .ok_or_else(|| Error::TreeNotFound(tree_a.to_string()))?;
        let mut b = self
            .trees
            .get(tree_b)
            .await?
            .ok_or_else(|| Error::TreeNotFound(tree_b.to_string()))?;

        if a.linked_trees.insert(tree_b.to_string()) {
            self.trees.update(&a).await?;
        }
        if b.linked_trees.insert(tree_a.to_string()) {
            self.trees.update(&b).await?;
        }

        tracing::info!(tree_a, tree_b, "trees linked");
        Ok(())
    }

    /// Ids of every tree created by `person_id`.
    pub async fn find_trees_created_by(&self, person_id: &str) -> Result<BTreeSet<String>> {
        self.trees.find_created_by(person_id).await
    }

    /// Fetch the full tree document.
    pub async fn get_tree(&self, tree_id: &str) -> Result<FamilyTree> {
        self.trees
            .get(tree_id)
            .await?
            .ok_or_else(|| Error::TreeNotFound(tree_id.to_string()))
    }
}
