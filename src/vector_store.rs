//! Integración con Neo4j como vector store para los `:KeyElement`.
//!
//! API pública:
//!   - `ensure_key_element_vector_index(&Graph, dimensions)`
//!   - `search_key_elements(&Graph, &[f64], usize)`.

use neo4rs::{query, Graph};
use tracing::info;

use crate::error::{ExplorerError, Result};
use crate::models::ScoredKeyElement;

pub const KEY_ELEMENT_INDEX: &str = "keyelements";

/// Un índice existente con otra dimensión no sirve para el modelo configurado.
fn check_index_dimensions(existing: Option<i64>, expected: usize) -> Result<()> {
    match existing {
        Some(dims) if dims != expected as i64 => Err(ExplorerError::GraphQuery(format!(
            "el índice '{KEY_ELEMENT_INDEX}' tiene dimensión {dims} y el modelo de embeddings produce {expected}; \
             elimine el índice y los embeddings o cambie de modelo"
        ))),
        _ => Ok(()),
    }
}

/// Garantiza que el índice vectorial sobre `:KeyElement(embedding)` exista
/// con la dimensión `dimensions`.
pub async fn ensure_key_element_vector_index(graph: &Graph, dimensions: usize) -> Result<()> {
    // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query(
                "SHOW VECTOR INDEXES YIELD name, options WHERE name = $name
                 RETURN options.indexConfig['vector.dimensions'] AS dims",
            )
            .param("name", KEY_ELEMENT_INDEX),
        )
        .await?;

    if let Some(row) = cursor.next().await? {
        check_index_dimensions(row.get::<i64>("dims"), dimensions)?;
        info!("Índice vectorial '{KEY_ELEMENT_INDEX}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {KEY_ELEMENT_INDEX}
FOR (k:KeyElement)
ON (k.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{KEY_ELEMENT_INDEX}' creado ({dimensions} dimensiones).");

    Ok(())
}

/// Búsqueda vectorial sobre `:KeyElement(embedding)` a partir de un embedding
/// ya calculado. Devuelve `(id, score)` ordenados por score descendente.
pub async fn search_key_elements(
    graph: &Graph,
    query_vec: &[f64],
    top_k: usize,
) -> Result<Vec<ScoredKeyElement>> {
    let mut cursor = graph
        .execute(
            query(
                "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                 YIELD node, score
                 RETURN node.id AS id, score
                 ORDER BY score DESC",
            )
            .param("index_name", KEY_ELEMENT_INDEX)
            .param("k", top_k as i64)
            .param("embedding", query_vec.to_vec()),
        )
        .await?;

    let mut output = Vec::new();
    while let Some(row) = cursor.next().await? {
        let id: String = row
            .get("id")
            .ok_or_else(|| ExplorerError::GraphQuery("falta campo 'id' en resultado de Neo4j".into()))?;
        let score: f64 = row.get("score").ok_or_else(|| {
            ExplorerError::GraphQuery("falta campo 'score' en resultado de Neo4j".into())
        })?;
        output.push(ScoredKeyElement { id, score });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_with_other_dimension_is_rejected() {
        assert!(check_index_dimensions(Some(1536), 1536).is_ok());
        assert!(check_index_dimensions(None, 3072).is_ok());

        let err = check_index_dimensions(Some(1536), 3072).unwrap_err();
        assert_eq!(err.kind(), "graph_query_error");
        assert!(err.to_string().contains("3072"));
    }
}
