use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::recognition::domain::face_encoder::Embedding;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to create reference directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read reference directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reference source unavailable: {0}")]
    Unavailable(String),
}

/// Capability that enumerates enrolled identities and their embeddings.
pub trait ReferenceSource: Send + Sync {
    fn list_reference_embeddings(&self) -> Result<Vec<(String, Embedding)>, ReferenceError>;
}

/// An enrolled person: display name plus one reference embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    name: String,
    embedding: Embedding,
}

impl Identity {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

/// Ordered, read-only collection of enrolled identities.
///
/// Order is load order and decides ties between equidistant references.
/// An empty set is valid; callers check [`ReferenceSet::is_empty`] to
/// report "no references" separately from "no match".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceSet {
    identities: Vec<Identity>,
}

impl ReferenceSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a set from `(name, embedding)` pairs, enforcing non-empty
    /// names and embeddings and unique names (first occurrence wins).
    ///
    /// The first accepted entry fixes the embedding length; entries of
    /// any other length are skipped.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Embedding)>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut identities: Vec<Identity> = Vec::new();

        for (name, embedding) in entries {
            if name.trim().is_empty() {
                log::warn!("Skipping reference with empty name");
                continue;
            }
            if embedding.is_empty() {
                log::warn!("Skipping reference {name}: empty embedding");
                continue;
            }
            if let Some(dim) = identities.first().map(|i| i.embedding.len()) {
                if embedding.len() != dim {
                    log::warn!(
                        "Skipping reference {name}: embedding length {} differs from {dim}",
                        embedding.len()
                    );
                    continue;
                }
            }
            if !seen.insert(name.clone()) {
                log::warn!("Skipping duplicate reference {name}: first entry wins");
                continue;
            }
            identities.push(Identity { name, embedding });
        }

        Self { identities }
    }

    /// Loads every identity the source yields.
    pub fn load(source: &dyn ReferenceSource) -> Result<Self, ReferenceError> {
        let entries = source.list_reference_embeddings()?;
        let set = Self::from_entries(entries);
        log::info!("Loaded {} reference faces", set.len());
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.identities.iter().map(Identity::name).collect()
    }

    /// Embedding length shared by the set, from its first identity.
    pub fn embedding_dim(&self) -> Option<usize> {
        self.identities.first().map(|i| i.embedding.len())
    }
}
