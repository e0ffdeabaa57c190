//! Tree operations for collection management.
//!
//! In git a tree is a directory. In the document store:
//! - the root tree holds one directory per collection
//! - each collection directory holds one `<key>.json` blob per document

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use git2::{FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder};

use crate::backend::document::error::{DocumentStoreError, DocumentStoreResult};
use crate::backend::document::types::{BlobId, CollectionName, DocumentKey, TreeId};

/// A read-only snapshot of the tree at one commit.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// list all collections (top-level directories)
    pub fn list_collections(&self) -> Vec<CollectionName> {
        self.tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| CollectionName::new(entry.name()?).ok())
            .collect()
    }

    pub fn collection_exists(&self, collection: &CollectionName) -> bool {
        self.tree
            .get_name(collection.as_str())
            .map(|entry| entry.kind() == Some(ObjectType::Tree))
            .unwrap_or(false)
    }

    fn collection_tree(&self, repo: &'repo Repository, collection: &CollectionName) -> DocumentStoreResult<Tree<'repo>> {
        let entry = self
            .tree
            .get_name(collection.as_str())
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.clone()))?;

        if entry.kind() != Some(ObjectType::Tree) {
            return Err(DocumentStoreError::UnexpectedEntryType {
                path: collection.as_str().into(),
                expected: "directory",
                found: format!("{:?}", entry.kind()),
            });
        }
        Ok(repo.find_tree(entry.id())?)
    }

    /// list all documents of a collection, in key order
    pub fn list_documents(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
    ) -> DocumentStoreResult<Vec<(DocumentKey, BlobId)>> {
        let tree = self.collection_tree(repo, collection)?;
        let documents = tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .filter_map(|entry| {
                let key = DocumentKey::from_file_name(entry.name()?)?;
                Some((key, BlobId::new(entry.id())))
            })
            .collect();
        Ok(documents)
    }

    /// get the blob ID for a specific document
    pub fn document_blob_id(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> DocumentStoreResult<Option<BlobId>> {
        let tree = self.collection_tree(repo, collection)?;
        let blob = tree.get_name(&key.file_name()).map(|entry| BlobId::new(entry.id()));
        Ok(blob)
    }

    pub fn document_exists(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> DocumentStoreResult<bool> {
        Ok(self.document_blob_id(repo, collection, key)?.is_some())
    }
}

/// Accumulates changes against a tree and writes a new one.
///
/// The tree it started from is never modified.
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree)?;
/// mutator.upsert_document(&players, &key, blob_id)?;
/// mutator.delete_document(&players, &old_key)?;
/// let new_tree_id = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: TreeBuilder<'repo>,
    /// builders for collections touched so far
    modified: HashMap<String, TreeBuilder<'repo>>,
    /// tree ids of collections as found in the original tree
    original: HashMap<String, Oid>,
    dirty: bool,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> DocumentStoreResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let original = tree
            .inner()
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| Some((entry.name()?.to_string(), entry.id())))
            .collect();

        Ok(Self {
            repo,
            root_builder,
            modified: HashMap::new(),
            original,
            dirty: false,
        })
    }

    /// a mutator over an empty tree
    pub fn empty(repo: &'repo Repository) -> DocumentStoreResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified: HashMap::new(),
            original: HashMap::new(),
            dirty: false,
        })
    }

    /// whether anything was changed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn has_collection(&self, name: &str) -> bool {
        self.modified.contains_key(name) || self.original.contains_key(name)
    }

    fn collection_builder(&mut self, collection: &CollectionName) -> DocumentStoreResult<&mut TreeBuilder<'repo>> {
        let name = collection.as_str();
        if !self.has_collection(name) {
            return Err(DocumentStoreError::CollectionNotFound(collection.clone()));
        }

        match self.modified.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let builder = match self.original.get(name) {
                    Some(id) => {
                        let tree = self.repo.find_tree(*id)?;
                        self.repo.treebuilder(Some(&tree))?
                    }
                    None => self.repo.treebuilder(None)?,
                };
                Ok(entry.insert(builder))
            }
        }
    }

    /// create an empty collection; existing collections are left alone
    pub fn create_collection(&mut self, collection: &CollectionName) -> DocumentStoreResult<bool> {
        let name = collection.as_str();
        if self.has_collection(name) {
            return Ok(false);
        }

        let empty = self.repo.treebuilder(None)?.write()?;
        self.root_builder.insert(name, empty, FileMode::Tree.into())?;
        self.original.insert(name.to_string(), empty);
        self.dirty = true;
        Ok(true)
    }

    /// remove every document of a collection, returning how many there were
    pub fn clear_collection(&mut self, collection: &CollectionName) -> DocumentStoreResult<usize> {
        let builder = self.collection_builder(collection)?;
        let removed = builder.len();
        if removed > 0 {
            builder.clear()?;
            self.dirty = true;
        }
        Ok(removed)
    }

    /// insert or replace a document blob
    pub fn upsert_document(
        &mut self,
        collection: &CollectionName,
        key: &DocumentKey,
        blob_id: BlobId,
    ) -> DocumentStoreResult<()> {
        let builder = self.collection_builder(collection)?;
        builder.insert(key.file_name(), blob_id.raw(), FileMode::Blob.into())?;
        self.dirty = true;
        Ok(())
    }

    /// remove a document, returning whether it was there
    pub fn delete_document(&mut self, collection: &CollectionName, key: &DocumentKey) -> DocumentStoreResult<bool> {
        let builder = self.collection_builder(collection)?;
        let file_name = key.file_name();
        if builder.get(&file_name)?.is_none() {
            return Ok(false);
        }
        builder.remove(&file_name)?;
        self.dirty = true;
        Ok(true)
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> DocumentStoreResult<TreeId> {
        for (name, builder) in self.modified {
            let tree_id = builder.write()?;
            self.root_builder.insert(&name, tree_id, FileMode::Tree.into())?;
        }
        Ok(TreeId::new(self.root_builder.write()?))
    }
}

/// the root tree of a fresh store
pub fn create_initial_tree(repo: &Repository) -> DocumentStoreResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}
