use crate::chunk_spec::ChunkSpec;
use common::{ChunkId, SubChunkId};
use std::collections::{BTreeMap, BTreeSet};

/// Placeholder for the chunk id in query templates.
pub const CHUNK_TOKEN: &str = "%CC%";
/// Placeholder for the subchunk id in query templates.
pub const SUBCHUNK_TOKEN: &str = "%SS%";

/// What a template token is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Chunk,
    SubChunk,
}

/// Records which tokens a set of query templates uses, and how to bind them
/// for a concrete chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMapping {
    subs: BTreeMap<String, Parameter>,
    sub_chunk_tables: BTreeSet<String>,
}

impl QueryMapping {
    pub fn new() -> Self {
        QueryMapping {
            subs: BTreeMap::new(),
            sub_chunk_tables: BTreeSet::new(),
        }
    }

    /// Binds `token` to `param`.
    ///
    /// # Panics
    ///
    /// Panics if `token` is already bound to a different parameter.
    pub fn insert_entry(&mut self, token: &str, param: Parameter) {
        match self.subs.get(token) {
            Some(existing) if *existing != param => panic!(
                "Conflicting query mapping for {}: {:?} vs {:?}",
                token, existing, param
            ),
            Some(_) => {}
            None => {
                self.subs.insert(token.to_string(), param);
            }
        }
    }

    pub fn insert_chunk_entry(&mut self, token: &str) {
        self.insert_entry(token, Parameter::Chunk);
    }

    pub fn insert_subchunk_entry(&mut self, token: &str) {
        self.insert_entry(token, Parameter::SubChunk);
    }

    /// Notes a table that must be available at subchunk granularity.
    pub fn insert_sub_chunk_table(&mut self, table: &str) {
        self.sub_chunk_tables.insert(table.to_string());
    }

    pub fn sub_chunk_tables(&self) -> impl Iterator<Item = &String> {
        self.sub_chunk_tables.iter()
    }

    /// Merges another mapping into this one.
    ///
    /// # Panics
    ///
    /// Panics if both mappings bind the same token differently.
    pub fn update(&mut self, other: &QueryMapping) {
        for (token, param) in other.subs.iter() {
            self.insert_entry(token, *param);
        }
        self.sub_chunk_tables
            .extend(other.sub_chunk_tables.iter().cloned());
    }

    pub fn has_parameter(&self, param: Parameter) -> bool {
        self.subs.values().any(|p| *p == param)
    }

    pub fn has_chunks(&self) -> bool {
        self.has_parameter(Parameter::Chunk)
    }

    pub fn has_sub_chunks(&self) -> bool {
        self.has_parameter(Parameter::SubChunk)
    }

    /// Binds a template to a chunk spec, using its first subchunk.
    ///
    /// # Arguments
    ///
    /// * `spec` - Chunk to bind.
    /// * `template` - Query text with placeholders.
    pub fn apply(&self, spec: &ChunkSpec, template: &str) -> String {
        self.bind(spec.chunk_id, spec.subchunks.first().copied(), template)
    }

    /// Binds a template to a chunk and, optionally, a subchunk.
    ///
    /// Subchunk tokens are left in place when no subchunk is given.
    ///
    /// # Arguments
    ///
    /// * `chunk` - Chunk id.
    /// * `subchunk` - Subchunk id, if any.
    /// * `template` - Query text with placeholders.
    pub fn bind(&self, chunk: ChunkId, subchunk: Option<SubChunkId>, template: &str) -> String {
        let mut text = template.to_string();
        for (token, param) in self.subs.iter() {
            let value = match (param, subchunk) {
                (Parameter::Chunk, _) => chunk.to_string(),
                (Parameter::SubChunk, Some(sc)) => sc.to_string(),
                (Parameter::SubChunk, None) => continue,
            };
            text = text.replace(token.as_str(), &value);
        }
        text
    }
}
