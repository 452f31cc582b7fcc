//! # Knowledge Graph Mirror
//!
//! Mirrors post relationships into a property graph for retrieval-time
//! context: `User-[POSTED_IN]->Channel`, `Channel-[CONTAINS]->Post`,
//! `Post-[HAS_TAG]->Tag`. Writes use create-or-match semantics, so mirroring
//! the same post twice is a no-op. The graph is best-effort from the
//! indexer's point of view: a failure here never fails the vector upsert.
//!
//! Built on `indradb`; the in-memory datastore backs tests and the reference
//! deployment, RocksDB is available for persistence.

pub mod types;

use self::types::{GraphError, MemoryTagGraph, TagGraph};
use indradb::{
    Datastore, Edge, Identifier, Json, MemoryDatastore, QueryExt, RocksdbDatastore,
    SpecificVertexQuery, Transaction, Vertex,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use uuid::Uuid;

const NAME_PROPERTY_NAME: &str = "name";
const EDGE_POSTED_IN: &str = "POSTED_IN";
const EDGE_CONTAINS: &str = "CONTAINS";
const EDGE_HAS_TAG: &str = "HAS_TAG";

/// Deterministic vertex id for a labelled entity key.
fn vertex_id(label: &str, key: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, format!("{label}:{key}").as_bytes())
}

impl MemoryTagGraph {
    /// Creates a new in-memory tag graph.
    pub fn new_memory() -> Self {
        Self {
            db: MemoryDatastore::new_db(),
            entity_map: HashMap::new(),
        }
    }
}

impl TagGraph<RocksdbDatastore> {
    /// Creates a tag graph backed by a RocksDB datastore at the given path.
    pub fn new_rocksdb<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let datastore = RocksdbDatastore::new_db(path)?;
        Ok(Self {
            db: datastore,
            entity_map: HashMap::new(),
        })
    }
}

impl<D: Datastore> TagGraph<D> {
    /// Retrieves or creates a vertex for a labelled key, caching it locally.
    /// The key is stored in a `name` property so traversals can map vertex
    /// ids back to domain identifiers.
    fn get_or_create_vertex(&mut self, label: &str, key: &str) -> Result<Uuid, GraphError> {
        let cache_key = format!("{label}:{key}");
        if let Some(id) = self.entity_map.get(&cache_key) {
            return Ok(*id);
        }

        let vertex_type = Identifier::new(label)?;
        let id = vertex_id(label, key);
        let vertex = Vertex::with_id(id, vertex_type);
        let mut transaction = self.db.datastore.transaction();
        transaction.create_vertex(&vertex)?;

        let name_prop = Identifier::new(NAME_PROPERTY_NAME)?;
        transaction.set_vertex_properties(vec![vertex.id], name_prop, &Json::new(json!(key)))?;

        self.entity_map.insert(cache_key, id);
        Ok(id)
    }

    fn create_edge(&mut self, from: Uuid, predicate: &str, to: Uuid) -> Result<(), GraphError> {
        let predicate_id = Identifier::new(predicate)?;
        let edge = Edge::new(from, predicate_id, to);
        let mut transaction = self.db.datastore.transaction();
        transaction.create_edge(&edge)?;
        Ok(())
    }

    /// Mirrors one post: ensures all four node kinds exist and the three
    /// edge kinds connect them. Idempotent.
    pub fn merge_post(
        &mut self,
        user_telegram_id: i64,
        channel_id: i64,
        post_id: i64,
        tags: &[String],
    ) -> Result<(), GraphError> {
        let user_v = self.get_or_create_vertex("User", &user_telegram_id.to_string())?;
        let channel_v = self.get_or_create_vertex("Channel", &channel_id.to_string())?;
        let post_v = self.get_or_create_vertex("Post", &post_id.to_string())?;

        self.create_edge(user_v, EDGE_POSTED_IN, channel_v)?;
        self.create_edge(channel_v, EDGE_CONTAINS, post_v)?;

        for tag in tags {
            let tag_v = self.get_or_create_vertex("Tag", tag)?;
            self.create_edge(post_v, EDGE_HAS_TAG, tag_v)?;
        }
        Ok(())
    }

    /// Reads the `name` property of the given vertices.
    fn names_of(&self, ids: Vec<Uuid>) -> Result<Vec<String>, GraphError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let name_prop = Identifier::new(NAME_PROPERTY_NAME)?;
        let query = SpecificVertexQuery::new(ids).properties()?.name(name_prop);
        let results = self.db.get(query)?;
        let vertex_props =
            indradb::util::extract_vertex_properties(results).ok_or(GraphError::NotFound)?;

        let mut names = Vec::new();
        for v_prop in vertex_props {
            for named_prop in v_prop.props {
                if let serde_json::Value::String(s) = named_prop.value.0.as_ref() {
                    names.push(s.clone());
                }
            }
        }
        Ok(names)
    }

    /// Tag vertex ids attached to a post vertex.
    fn tag_vertices_of_post(&self, post_vertex: Uuid) -> Result<Vec<Uuid>, GraphError> {
        let has_tag = Identifier::new(EDGE_HAS_TAG)?;
        let query = SpecificVertexQuery::single(post_vertex).outbound()?.t(has_tag);
        let results = self.db.get(query)?;
        let edges = indradb::util::extract_edges(results).unwrap_or_default();
        Ok(edges.into_iter().map(|e| e.inbound_id).collect())
    }

    /// Post vertex ids carrying the given tag vertex.
    fn post_vertices_of_tag(&self, tag_vertex: Uuid) -> Result<Vec<Uuid>, GraphError> {
        let has_tag = Identifier::new(EDGE_HAS_TAG)?;
        let query = SpecificVertexQuery::single(tag_vertex).inbound()?.t(has_tag);
        let results = self.db.get(query)?;
        let edges = indradb::util::extract_edges(results).unwrap_or_default();
        Ok(edges.into_iter().map(|e| e.outbound_id).collect())
    }

    /// The tags of a post, by domain name.
    pub fn tags_of_post(&self, post_id: i64) -> Result<Vec<String>, GraphError> {
        let post_v = vertex_id("Post", &post_id.to_string());
        let tag_ids = self.tag_vertices_of_post(post_v)?;
        self.names_of(tag_ids)
    }

    /// Tags co-occurring with `tag` on at least one post, most frequent
    /// first, excluding the tag itself.
    pub fn related_tags(&self, tag: &str, limit: usize) -> Result<Vec<String>, GraphError> {
        let tag_v = vertex_id("Tag", tag);
        let mut counts: HashMap<String, usize> = HashMap::new();

        for post_v in self.post_vertices_of_tag(tag_v)? {
            let neighbour_ids = self.tag_vertices_of_post(post_v)?;
            for name in self.names_of(neighbour_ids)? {
                if name != tag {
                    *counts.entry(name).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(limit).map(|(name, _)| name).collect())
    }

    /// Posts sharing at least one tag with the given post, with the number
    /// of shared tags. Excludes the post itself.
    pub fn posts_sharing_tags(&self, post_id: i64) -> Result<Vec<(i64, usize)>, GraphError> {
        let post_v = vertex_id("Post", &post_id.to_string());
        let mut overlap: HashMap<i64, usize> = HashMap::new();

        for tag_v in self.tag_vertices_of_post(post_v)? {
            for neighbour_v in self.post_vertices_of_tag(tag_v)? {
                if neighbour_v == post_v {
                    continue;
                }
                for name in self.names_of(vec![neighbour_v])? {
                    if let Ok(id) = name.parse::<i64>() {
                        *overlap.entry(id).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut ranked: Vec<(i64, usize)> = overlap.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked)
    }

    /// Removes a post vertex and all its edges.
    pub fn detach_post(&mut self, post_id: i64) -> Result<(), GraphError> {
        let post_v = vertex_id("Post", &post_id.to_string());
        self.db.delete(SpecificVertexQuery::single(post_v))?;
        self.entity_map.remove(&format!("Post:{post_id}"));
        Ok(())
    }

    /// Cheap liveness probe: a lookup of a vertex that cannot exist.
    pub fn health_check(&self) -> Result<(), GraphError> {
        let probe = SpecificVertexQuery::single(Uuid::nil());
        self.db.get(probe)?;
        Ok(())
    }
}

/// Object-safe, thread-safe seam over a [`TagGraph`]. Components hold
/// `Arc<dyn GraphStore>` so the datastore choice stays a wiring concern.
pub trait GraphStore: Send + Sync {
    fn merge_post(
        &self,
        user_telegram_id: i64,
        channel_id: i64,
        post_id: i64,
        tags: &[String],
    ) -> Result<(), GraphError>;
    fn tags_of_post(&self, post_id: i64) -> Result<Vec<String>, GraphError>;
    fn related_tags(&self, tag: &str, limit: usize) -> Result<Vec<String>, GraphError>;
    fn posts_sharing_tags(&self, post_id: i64) -> Result<Vec<(i64, usize)>, GraphError>;
    fn detach_post(&self, post_id: i64) -> Result<(), GraphError>;
    fn health_check(&self) -> Result<(), GraphError>;
}

/// [`GraphStore`] over any datastore, serializing access with an `RwLock`.
pub struct SharedTagGraph<D: Datastore> {
    inner: RwLock<TagGraph<D>>,
}

impl<D: Datastore> SharedTagGraph<D> {
    pub fn new(graph: TagGraph<D>) -> Self {
        Self {
            inner: RwLock::new(graph),
        }
    }
}

impl<D: Datastore + Send + Sync> GraphStore for SharedTagGraph<D> {
    fn merge_post(
        &self,
        user_telegram_id: i64,
        channel_id: i64,
        post_id: i64,
        tags: &[String],
    ) -> Result<(), GraphError> {
        self.inner
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .merge_post(user_telegram_id, channel_id, post_id, tags)
    }

    fn tags_of_post(&self, post_id: i64) -> Result<Vec<String>, GraphError> {
        self.inner
            .read()
            .map_err(|_| GraphError::LockPoisoned)?
            .tags_of_post(post_id)
    }

    fn related_tags(&self, tag: &str, limit: usize) -> Result<Vec<String>, GraphError> {
        self.inner
            .read()
            .map_err(|_| GraphError::LockPoisoned)?
            .related_tags(tag, limit)
    }

    fn posts_sharing_tags(&self, post_id: i64) -> Result<Vec<(i64, usize)>, GraphError> {
        self.inner
            .read()
            .map_err(|_| GraphError::LockPoisoned)?
            .posts_sharing_tags(post_id)
    }

    fn detach_post(&self, post_id: i64) -> Result<(), GraphError> {
        self.inner
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .detach_post(post_id)
    }

    fn health_check(&self) -> Result<(), GraphError> {
        self.inner
            .read()
            .map_err(|_| GraphError::LockPoisoned)?
            .health_check()
    }
}
