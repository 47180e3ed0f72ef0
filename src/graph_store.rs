//! Gateway de lectura sobre el grafo de conocimiento.
//!
//! `GraphStore` es todo lo que el explorador necesita del almacenamiento:
//! búsqueda vectorial y léxica de key elements, hechos atómicos, vecinos por
//! co-ocurrencia y navegación de chunks. `Neo4jGraphStore` lo implementa con
//! Cypher; los tests usan un grafo en memoria.

use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{query, Graph, Row};
use tracing::debug;

use crate::bm25;
use crate::error::{ExplorerError, Result};
use crate::llm::LlmManager;
use crate::models::{AtomicFactRow, ChunkText, Direction, DocumentRef, ScoredKeyElement};
use crate::vector_store;

/// Máximo de vecinos que se proponen al oráculo.
pub const NEIGHBOR_LIMIT: usize = 50;

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Key elements más parecidos (embedding) al texto dado.
    async fn similarity_search(&self, text: &str, k: usize) -> Result<Vec<ScoredKeyElement>>;

    /// Todos los ids de `:KeyElement`.
    async fn key_element_ids(&self) -> Result<Vec<String>>;

    /// Ranking BM25 de todos los key elements frente a la consulta.
    async fn lexical_search(&self, query: &str, k: usize) -> Result<Vec<ScoredKeyElement>> {
        let ids = self.key_element_ids().await?;
        Ok(bm25::rank(query, &ids, k))
    }

    /// Pares distintos chunk/hecho alcanzables desde los key elements.
    async fn atomic_facts(&self, key_elements: &[String]) -> Result<Vec<AtomicFactRow>>;

    /// Key elements que comparten hechos con los dados, por nº de hechos
    /// compartidos (desc), sin incluir los de entrada. Como mucho `NEIGHBOR_LIMIT`.
    async fn neighbors(&self, key_elements: &[String]) -> Result<Vec<String>>;

    async fn chunk(&self, chunk_id: &str) -> Result<Option<ChunkText>>;

    /// Chunk anterior o siguiente según la relación `NEXT`.
    async fn adjacent_chunk(&self, chunk_id: &str, direction: Direction) -> Result<Option<String>>;

    async fn chunk_document(&self, chunk_id: &str) -> Result<Option<DocumentRef>>;
}

/// Implementación sobre Neo4j. Sólo lanza consultas de lectura.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    graph: Arc<Graph>,
    llm: LlmManager,
}

impl Neo4jGraphStore {
    pub fn new(graph: Arc<Graph>, llm: LlmManager) -> Self {
        Self { graph, llm }
    }
}

fn missing(field: &str) -> ExplorerError {
    ExplorerError::GraphQuery(format!("falta campo '{field}' en resultado de Neo4j"))
}

fn string_field(row: &Row, field: &str) -> Result<String> {
    row.get::<String>(field).ok_or_else(|| missing(field))
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn similarity_search(&self, text: &str, k: usize) -> Result<Vec<ScoredKeyElement>> {
        let mut vectors = self
            .llm
            .embed_texts(vec![text.to_string()])
            .await
            .map_err(|e| ExplorerError::OracleUnavailable(format!("embedding de la consulta: {e}")))?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| ExplorerError::OracleUnavailable("no se pudo generar embedding de la consulta".into()))?;

        vector_store::search_key_elements(&self.graph, &query_vec, k).await
    }

    async fn key_element_ids(&self) -> Result<Vec<String>> {
        let mut cursor = self
            .graph
            .execute(query("MATCH (k:KeyElement) RETURN k.id AS id"))
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = cursor.next().await? {
            ids.push(string_field(&row, "id")?);
        }
        Ok(ids)
    }

    async fn atomic_facts(&self, key_elements: &[String]) -> Result<Vec<AtomicFactRow>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (k:KeyElement)<-[:HAS_KEY_ELEMENT]-(fact)<-[:HAS_ATOMIC_FACT]-(chunk)
                     WHERE k.id IN $key_elements
                     RETURN DISTINCT chunk.id AS chunk_id, fact.text AS text",
                )
                .param("key_elements", key_elements.to_vec()),
            )
            .await?;

        let mut facts = Vec::new();
        while let Some(row) = cursor.next().await? {
            facts.push(AtomicFactRow {
                chunk_id: string_field(&row, "chunk_id")?,
                text: string_field(&row, "text")?,
            });
        }
        debug!("{} hechos atómicos para {:?}", facts.len(), key_elements);
        Ok(facts)
    }

    async fn neighbors(&self, key_elements: &[String]) -> Result<Vec<String>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (k:KeyElement)<-[:HAS_KEY_ELEMENT]-()-[:HAS_KEY_ELEMENT]->(neighbor)
                     WHERE k.id IN $key_elements AND NOT neighbor.id IN $key_elements
                     WITH neighbor, count(*) AS count
                     ORDER BY count DESC, neighbor.id ASC LIMIT $limit
                     RETURN neighbor.id AS id",
                )
                .param("key_elements", key_elements.to_vec())
                .param("limit", NEIGHBOR_LIMIT as i64),
            )
            .await?;

        let mut neighbors = Vec::new();
        while let Some(row) = cursor.next().await? {
            neighbors.push(string_field(&row, "id")?);
        }
        Ok(neighbors)
    }

    async fn chunk(&self, chunk_id: &str) -> Result<Option<ChunkText>> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (c:Chunk {id: $chunk_id}) RETURN c.id AS chunk_id, c.text AS text")
                    .param("chunk_id", chunk_id),
            )
            .await?;

        match cursor.next().await? {
            Some(row) => Ok(Some(ChunkText {
                chunk_id: string_field(&row, "chunk_id")?,
                text: string_field(&row, "text")?,
            })),
            None => Ok(None),
        }
    }

    async fn adjacent_chunk(&self, chunk_id: &str, direction: Direction) -> Result<Option<String>> {
        let cypher = match direction {
            Direction::Subsequent => "MATCH (c:Chunk {id: $id})-[:NEXT]->(other) RETURN other.id AS id LIMIT 1",
            Direction::Previous => "MATCH (c:Chunk {id: $id})<-[:NEXT]-(other) RETURN other.id AS id LIMIT 1",
        };
        let mut cursor = self
            .graph
            .execute(query(cypher).param("id", chunk_id))
            .await?;

        match cursor.next().await? {
            Some(row) => Ok(Some(string_field(&row, "id")?)),
            None => Ok(None),
        }
    }

    async fn chunk_document(&self, chunk_id: &str) -> Result<Option<DocumentRef>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (d:Document)-[:HAS_CHUNK]->(c:Chunk {id: $id})
                     RETURN d.id AS name, coalesce(d.address, '') AS address LIMIT 1",
                )
                .param("id", chunk_id),
            )
            .await?;

        match cursor.next().await? {
            Some(row) => Ok(Some(DocumentRef {
                name: string_field(&row, "name")?,
                address: string_field(&row, "address")?,
            })),
            None => Ok(None),
        }
    }
}
