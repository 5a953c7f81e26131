//! In-memory knowledge graph of entities and typed relationships.
//!
//! Relationship records keep their direction (`from_entity → to_entity`),
//! but the adjacency index used for traversal is undirected: every
//! relationship links both endpoints. All traversals are breadth-first over
//! an explicit queue, so stack usage does not grow with `depth`.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add_entity`](KnowledgeGraph::add_entity) | Insert or update an entity |
//! | [`add_relationship`](KnowledgeGraph::add_relationship) | Link two existing entities |
//! | [`find_path`](KnowledgeGraph::find_path) | All simple paths up to a hop bound |
//! | [`get_neighbors`](KnowledgeGraph::get_neighbors) | Entities within `depth` hops |
//! | [`calculate_centrality`](KnowledgeGraph::calculate_centrality) | Degree centrality |
//! | [`subgraph`](KnowledgeGraph::subgraph) | Neighbourhood plus its internal edges |
//! | [`query_graph`](KnowledgeGraph::query_graph) | Dispatch a serialized [`GraphQuery`] |

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};
use crate::models::{Entity, Path, Relationship, Subgraph};

/// Hop bound used by [`find_path`](KnowledgeGraph::find_path) when the
/// caller passes a non-positive depth.
pub const DEFAULT_MAX_DEPTH: usize = 5;

// ============ Queries ============

/// A serialized graph request, e.g. `{"type": "find_path", "from": "a", "to": "b"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQuery {
    /// `find_path`, `neighbors` or `subgraph`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub depth: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum GraphQueryResult {
    Paths(Vec<Path>),
    Neighbors(Vec<Entity>),
    Subgraph(Subgraph),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
    /// Mean number of distinct neighbours per entity.
    pub average_degree: f32,
}

// ============ Storage ============

#[derive(Default)]
struct GraphInner {
    entities: HashMap<String, Entity>,
    entity_order: Vec<String>,
    relationships: HashMap<String, Relationship>,
    relationship_order: Vec<String>,
    /// Undirected, de-duplicated neighbour ids.
    adjacency: HashMap<String, Vec<String>>,
    /// Relationship ids touching each entity, in insertion order.
    incident: HashMap<String, Vec<String>>,
}

impl GraphInner {
    fn require(&self, id: &str) -> Result<()> {
        if self.entities.contains_key(id) {
            Ok(())
        } else {
            Err(RagError::not_found("entity", id))
        }
    }

    fn neighbors_of(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First relationship (by insertion) joining `a` and `b` in either direction.
    fn edge_between(&self, a: &str, b: &str) -> Option<&Relationship> {
        self.incident
            .get(a)?
            .iter()
            .filter_map(|rid| self.relationships.get(rid))
            .find(|r| r.other_end(a) == Some(b))
    }

    /// BFS from `start`, excluding it, visiting each entity at most once.
    fn reachable(&self, start: &str, depth: usize) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
        let mut found = Vec::new();

        while let Some((current, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for next in self.neighbors_of(current) {
                if visited.insert(next.as_str()) {
                    found.push(next.clone());
                    queue.push_back((next.as_str(), hops + 1));
                }
            }
        }
        found
    }

    fn entities_for(&self, ids: &[String]) -> Vec<Entity> {
        ids.iter()
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    fn build_path(&self, ids: &[String]) -> Path {
        let relationships: Vec<Relationship> = ids
            .windows(2)
            .filter_map(|pair| self.edge_between(&pair[0], &pair[1]).cloned())
            .collect();
        let weight = if relationships.is_empty() {
            0.0
        } else {
            relationships.iter().map(|r| r.confidence).sum::<f32>() / relationships.len() as f32
        };
        Path {
            entities: self.entities_for(ids),
            length: ids.len().saturating_sub(1),
            relationships,
            weight,
        }
    }
}

fn check_confidence(value: f32, what: &str) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RagError::Validation(format!(
            "{} confidence must be within [0, 1], got {}",
            what, value
        )))
    }
}

// ============ Graph ============

/// Thread-safe entity/relationship store with traversal queries.
///
/// Entities and relationships keep insertion order; traversal walks an
/// undirected, de-duplicated adjacency index.
#[derive(Default)]
pub struct KnowledgeGraph {
    inner: RwLock<GraphInner>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entity`, or replace the existing entity with the same id.
    ///
    /// `updated_at` is always set to now; replacing keeps the original
    /// `created_at`.
    pub fn add_entity(&self, mut entity: Entity) -> Result<()> {
        if entity.id.trim().is_empty() {
            return Err(RagError::Validation("entity id must not be empty".into()));
        }
        check_confidence(entity.confidence, "entity")?;

        entity.updated_at = Utc::now();
        let mut inner = self.inner.write();
        match inner.entities.get(&entity.id) {
            Some(existing) => entity.created_at = existing.created_at,
            None => {
                inner.entity_order.push(entity.id.clone());
                inner.adjacency.insert(entity.id.clone(), Vec::new());
            }
        }
        debug!(id = %entity.id, entity_type = %entity.entity_type, "entity stored");
        inner.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Store a relationship between two existing entities.
    ///
    /// Self-loops are recorded but do not appear in the adjacency index.
    pub fn add_relationship(&self, rel: Relationship) -> Result<()> {
        if rel.id.trim().is_empty() {
            return Err(RagError::Validation("relationship id must not be empty".into()));
        }
        check_confidence(rel.confidence, "relationship")?;

        let mut inner = self.inner.write();
        if inner.relationships.contains_key(&rel.id) {
            return Err(RagError::Validation(format!(
                "relationship already exists: {}",
                rel.id
            )));
        }
        inner.require(&rel.from_entity)?;
        inner.require(&rel.to_entity)?;

        let (from, to) = (rel.from_entity.clone(), rel.to_entity.clone());
        if from != to {
            for (a, b) in [(&from, &to), (&to, &from)] {
                let list = inner.adjacency.entry(a.clone()).or_default();
                if !list.contains(b) {
                    list.push(b.clone());
                }
            }
        }
        inner.incident.entry(from.clone()).or_default().push(rel.id.clone());
        if from != to {
            inner.incident.entry(to.clone()).or_default().push(rel.id.clone());
        }

        debug!(id = %rel.id, from = %from, to = %to, relation = %rel.relation_type, "relationship stored");
        inner.relationship_order.push(rel.id.clone());
        inner.relationships.insert(rel.id.clone(), rel);
        Ok(())
    }

    pub fn get_entity(&self, id: &str) -> Option<Entity> {
        self.inner.read().entities.get(id).cloned()
    }

    pub fn get_relationship(&self, id: &str) -> Option<Relationship> {
        self.inner.read().relationships.get(id).cloned()
    }

    /// Relationships with `id` at either end, in insertion order.
    pub fn relationships_of(&self, id: &str) -> Result<Vec<Relationship>> {
        let inner = self.inner.read();
        inner.require(id)?;
        Ok(inner
            .incident
            .get(id)
            .map(|rids| {
                rids.iter()
                    .filter_map(|rid| inner.relationships.get(rid).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn find_entities_by_type(&self, entity_type: &str) -> Vec<Entity> {
        let inner = self.inner.read();
        inner
            .entity_order
            .iter()
            .filter_map(|id| inner.entities.get(id))
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Case-insensitive match against names and aliases.
    pub fn find_entities_by_name(&self, name: &str) -> Vec<Entity> {
        let needle = name.to_lowercase();
        let inner = self.inner.read();
        inner
            .entity_order
            .iter()
            .filter_map(|id| inner.entities.get(id))
            .filter(|e| {
                e.name.to_lowercase() == needle
                    || e.aliases.iter().any(|a| a.to_lowercase() == needle)
            })
            .cloned()
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.inner.read().entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.read().relationships.len()
    }

    /// Every simple path from `from` to `to` of at most `max_depth` hops,
    /// shortest first. `max_depth <= 0` means [`DEFAULT_MAX_DEPTH`].
    ///
    /// Returns an empty list when `from == to` or nothing is reachable.
    pub fn find_path(&self, from: &str, to: &str, max_depth: i64) -> Result<Vec<Path>> {
        let max_depth = usize::try_from(max_depth)
            .ok()
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_MAX_DEPTH);

        let inner = self.inner.read();
        inner.require(from)?;
        inner.require(to)?;
        if from == to {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut queue: VecDeque<Vec<String>> = VecDeque::from([vec![from.to_string()]]);

        while let Some(trail) = queue.pop_front() {
            let Some(last) = trail.last() else { continue };
            if last == to {
                paths.push(inner.build_path(&trail));
                continue;
            }
            if trail.len() > max_depth {
                continue;
            }
            for next in inner.neighbors_of(last) {
                if trail.contains(next) {
                    continue;
                }
                let mut extended = trail.clone();
                extended.push(next.clone());
                queue.push_back(extended);
            }
        }

        debug!(from, to, max_depth, found = paths.len(), "path search");
        Ok(paths)
    }

    /// Entities reachable within `depth` hops, excluding `id` itself.
    pub fn get_neighbors(&self, id: &str, depth: usize) -> Result<Vec<Entity>> {
        let inner = self.inner.read();
        inner.require(id)?;
        let ids = inner.reachable(id, depth);
        Ok(inner.entities_for(&ids))
    }

    /// `|neighbours(id)| / (|entities| - 1)`, clamped to `[0, 1]`.
    pub fn calculate_centrality(&self, id: &str) -> Result<f32> {
        let inner = self.inner.read();
        inner.require(id)?;
        let total = inner.entities.len();
        if total <= 1 {
            return Ok(0.0);
        }
        let degree = inner.neighbors_of(id).len() as f32;
        Ok((degree / (total - 1) as f32).clamp(0.0, 1.0))
    }

    /// `id`, everything within `depth` hops of it, and every relationship
    /// whose endpoints are both in that set.
    pub fn subgraph(&self, id: &str, depth: usize) -> Result<Subgraph> {
        let inner = self.inner.read();
        inner.require(id)?;

        let mut ids = vec![id.to_string()];
        ids.extend(inner.reachable(id, depth));
        let members: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let relationships = inner
            .relationship_order
            .iter()
            .filter_map(|rid| inner.relationships.get(rid))
            .filter(|r| {
                members.contains(r.from_entity.as_str()) && members.contains(r.to_entity.as_str())
            })
            .cloned()
            .collect();

        Ok(Subgraph {
            entities: inner.entities_for(&ids),
            relationships,
        })
    }

    pub fn query_graph(&self, query: &GraphQuery) -> Result<GraphQueryResult> {
        fn required<'a>(value: &'a Option<String>, field: &str, kind: &str) -> Result<&'a str> {
            value.as_deref().ok_or_else(|| {
                RagError::Validation(format!("{} query requires `{}`", kind, field))
            })
        }
        let depth = |fallback: i64| usize::try_from(query.depth.unwrap_or(fallback)).unwrap_or(0);

        match query.kind.as_str() {
            "find_path" => {
                let from = required(&query.from, "from", "find_path")?;
                let to = required(&query.to, "to", "find_path")?;
                let paths = self.find_path(from, to, query.depth.unwrap_or(0))?;
                Ok(GraphQueryResult::Paths(paths))
            }
            "neighbors" => {
                let id = required(&query.entity_id, "entity_id", "neighbors")?;
                Ok(GraphQueryResult::Neighbors(self.get_neighbors(id, depth(1))?))
            }
            "subgraph" => {
                let id = required(&query.entity_id, "entity_id", "subgraph")?;
                Ok(GraphQueryResult::Subgraph(self.subgraph(id, depth(1))?))
            }
            other => Err(RagError::Validation(format!(
                "unknown graph query type: {}. Use find_path, neighbors, or subgraph.",
                other
            ))),
        }
    }

    pub fn stats(&self) -> GraphStats {
        let inner = self.inner.read();
        let mut entity_types = BTreeMap::new();
        for e in inner.entities.values() {
            *entity_types.entry(e.entity_type.clone()).or_insert(0) += 1;
        }
        let mut relation_types = BTreeMap::new();
        for r in inner.relationships.values() {
            *relation_types.entry(r.relation_type.clone()).or_insert(0) += 1;
        }
        let degree_sum: usize = inner.adjacency.values().map(Vec::len).sum();
        let average_degree = if inner.entities.is_empty() {
            0.0
        } else {
            degree_sum as f32 / inner.entities.len() as f32
        };
        GraphStats {
            entity_count: inner.entities.len(),
            relationship_count: inner.relationships.len(),
            entity_types,
            relation_types,
            average_degree,
        }
    }
}
