//! Modelos de dominio (nodos del grafo Neo4j y filas devueltas por las consultas).

use serde::{Deserialize, Serialize};

/// Representa un nodo (:Document) en Neo4j.
/// `id` es el nombre del documento y `address` su URL de origen.
#[derive(Debug, Clone)]
pub struct DocumentNode {
    pub id: String,
    pub address: String,
}

/// Representa un nodo (:Chunk) en Neo4j.
/// El id es el hash del contenido, así que reingerir el mismo texto es un MERGE sin efecto.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub id: String,
    pub document_id: String,
    pub index: i64,
    pub text: String,
    pub chunk_type: String,
    pub page: Option<i64>,
}

/// Representa un nodo (:AtomicFact) junto con los key elements que menciona.
#[derive(Debug, Clone)]
pub struct AtomicFactNode {
    pub id: String,
    pub chunk_id: String,
    pub text: String,
    pub key_elements: Vec<String>,
}

/// Par chunk/hecho devuelto al explorar desde un conjunto de key elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomicFactRow {
    pub chunk_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkText {
    pub chunk_id: String,
    pub text: String,
}

/// Documento propietario de un chunk, usado para las citas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub address: String,
}

/// Key element con la puntuación de la búsqueda que lo recuperó.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredKeyElement {
    pub id: String,
    pub score: f64,
}

/// Sentido del recorrido por la relación `NEXT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Subsequent,
}
