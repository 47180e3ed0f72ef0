//! Conexión a Neo4j y esquema del grafo de conocimiento.

use crate::config::AppConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let addr = bolt_address(&cfg.neo4j_uri)?;

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints de unicidad para las etiquetas del grafo:
/// :Document, :Chunk, :AtomicFact y :KeyElement.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT document_id IF NOT EXISTS
         FOR (d:Document)
         REQUIRE d.id IS UNIQUE",
        "CREATE CONSTRAINT chunk_id IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.id IS UNIQUE",
        "CREATE CONSTRAINT atomic_fact_id IF NOT EXISTS
         FOR (a:AtomicFact)
         REQUIRE a.id IS UNIQUE",
        "CREATE CONSTRAINT key_element_id IF NOT EXISTS
         FOR (k:KeyElement)
         REQUIRE k.id IS UNIQUE",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints de unicidad creados).");
    Ok(())
}

/// Conteo de nodos por etiqueta, para `/api/neo4j-info`.
pub async fn graph_counts(graph: &Graph) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::new();
    for label in ["Document", "Chunk", "AtomicFact", "KeyElement"] {
        let cypher = format!("MATCH (n:{label}) RETURN count(n) AS total");
        let mut cursor = graph.execute(query(&cypher)).await?;
        let total = match cursor.next().await? {
            Some(row) => row.get::<i64>("total").unwrap_or(0),
            None => 0,
        };
        counts.push((label.to_string(), total));
    }
    Ok(counts)
}

/// Dirección `host:port` a partir de `NEO4J_URI` (bolt://, neo4j://...).
fn bolt_address(uri: &str) -> Result<String> {
    let url = Url::parse(uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    Ok(format!("{host}:{port}"))
}
