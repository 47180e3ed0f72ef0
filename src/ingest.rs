//! Ingesta de un directorio del sistema de archivos en Neo4j, generando el
//! grafo Document → Chunk → AtomicFact → KeyElement que recorre el explorador.
//!
//! Por cada fichero `.txt`/`.md`:
//!   1. trocear en chunks por párrafos,
//!   2. extraer hechos atómicos y key elements con el LLM (en paralelo),
//!   3. normalizar key elements parecidos (opcional),
//!   4. importar con MERGE en una transacción y encadenar los chunks con `NEXT`.
//! Al final se calculan los embeddings de los key elements que no lo tengan.

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use futures::future::try_join_all;
use neo4rs::{query, Graph, Txn};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use url::Url;
use walkdir::WalkDir;

use crate::{
    app_state::Status,
    llm::{Extraction, LlmManager},
    models::{AtomicFactNode, ChunkNode, DocumentNode},
};

/// Tamaño de lote al pedir embeddings de key elements.
const EMBEDDING_BATCH: usize = 100;

/// Extensiones que se ingieren (texto plano UTF-8).
const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_max_chars: usize,
    /// Umbral de similitud coseno para fusionar key elements; `None` desactiva la normalización.
    pub similarity_threshold: Option<f64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 2000,
            similarity_threshold: None,
        }
    }
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
    pub atomic_facts_created: usize,
    pub key_elements_embedded: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} chunks, {} hechos atómicos y {} key elements con embedding nuevo.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.chunks_created, self.atomic_facts_created, self.key_elements_embedded
        )
    }
}

fn set_status(status: &Mutex<Status>, message: String, progress: Option<f32>) {
    if let Ok(mut status) = status.lock() {
        status.message = message;
        if let Some(progress) = progress {
            status.progress = progress;
        }
    }
}

/// Recorre recursivamente un directorio e ingiere cada fichero de texto.
pub async fn ingest_directory(
    graph: &Graph,
    llm: &LlmManager,
    root: &Path,
    status_arc: Arc<Mutex<Status>>,
    opts: &IngestOptions,
) -> Result<IngestionSummary> {
    if !root.is_dir() {
        return Err(anyhow!(
            "La ruta no es un directorio: {}",
            root.display()
        ));
    }

    let mut summary = IngestionSummary::default();
    let file_entries: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();

    let total_files = file_entries.len().max(1) as f32;

    for (index, entry) in file_entries.iter().enumerate() {
        summary.files_scanned += 1;
        let path = entry.path();
        let filename_str = path.file_name().unwrap_or_default().to_string_lossy();
        let progress = (index + 1) as f32 / total_files;

        set_status(
            &status_arc,
            format!("[{}/{}] Procesando: {}...", index + 1, file_entries.len(), filename_str),
            Some(progress),
        );

        match ingest_file(graph, llm, path, &status_arc, opts).await {
            Ok(Some((chunks_count, facts_count))) => {
                summary.files_ingested += 1;
                summary.chunks_created += chunks_count;
                summary.atomic_facts_created += facts_count;
            }
            Ok(None) => {
                summary.files_skipped += 1;
                set_status(
                    &status_arc,
                    format!("[{}/{}] Omitido: {}", index + 1, file_entries.len(), filename_str),
                    Some(progress),
                );
            }
            Err(err) => {
                summary.files_skipped += 1;
                error!("Error ingiriendo {}: {err}", path.display());
                set_status(
                    &status_arc,
                    format!("ERROR en {}: {}", path.display(), err),
                    Some(progress),
                );
            }
        }
    }

    set_status(&status_arc, "Calculando embeddings de key elements...".to_string(), None);
    summary.key_elements_embedded = embed_missing_key_elements(graph, llm).await?;

    Ok(summary)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Dirección de origen de un fichero como URL `file://`.
fn document_address(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| absolute.to_string_lossy().to_string())
}

/// Devuelve `(chunks, hechos atómicos)` importados, o `None` si se omite.
async fn ingest_file(
    graph: &Graph,
    llm: &LlmManager,
    path: &Path,
    status_arc: &Mutex<Status>,
    opts: &IngestOptions,
) -> Result<Option<(usize, usize)>> {
    if !is_supported(path) {
        info!("Saltando fichero con extensión no soportada: {}", path.display());
        return Ok(None);
    }

    let text = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            warn!("Saltando fichero no-texto o no-UTF8: {}", path.display());
            return Ok(None);
        }
    };

    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let doc_node = DocumentNode {
        id: filename.clone(),
        address: document_address(path),
    };

    let raw_chunks = split_into_chunks(&text, opts.chunk_max_chars);
    if raw_chunks.is_empty() {
        warn!("Fichero vacío o sin texto útil: {}", path.display());
        return Ok(None);
    }

    let chunk_nodes = build_chunk_nodes(&doc_node.id, raw_chunks);
    let chunks_count = chunk_nodes.len();

    // --- Fase 1: extracción de hechos atómicos, todos los chunks a la vez ---
    set_status(
        status_arc,
        format!("Fichero '{}': extrayendo conocimiento de {} chunks...", filename, chunks_count),
        None,
    );
    let extractions: Vec<Extraction> = try_join_all(
        chunk_nodes
            .iter()
            .map(|chunk| llm.extract_atomic_facts(&chunk.text)),
    )
    .await?;

    let mut facts = collect_atomic_facts(&chunk_nodes, extractions);

    // --- Fase 2: normalización de key elements ---
    if let Some(threshold) = opts.similarity_threshold {
        normalize_key_elements(graph, llm, &mut facts, threshold).await?;
    }

    // --- Fase 3: importación ---
    let tx = graph.start_txn().await?;
    import_document(&tx, &doc_node, &chunk_nodes, &facts).await?;
    tx.commit().await?;

    info!(
        "Ingerido {} con {} chunks y {} hechos atómicos.",
        path.display(),
        chunks_count,
        facts.len()
    );
    Ok(Some((chunks_count, facts.len())))
}

/// Identificador de un chunk: depende del documento y de la posición, así dos
/// párrafos iguales nunca comparten nodo ni cadena `NEXT`.
pub fn chunk_id(document_id: &str, index: usize, text: &str) -> String {
    content_hash(&format!("{document_id}\u{0}{index}\u{0}{text}"))
}

fn build_chunk_nodes(document_id: &str, raw_chunks: Vec<String>) -> Vec<ChunkNode> {
    raw_chunks
        .into_iter()
        .enumerate()
        .map(|(idx, text)| ChunkNode {
            id: chunk_id(document_id, idx, &text),
            document_id: document_id.to_string(),
            index: idx as i64,
            text,
            chunk_type: "Text".to_string(),
            page: None,
        })
        .collect()
}

/// Convierte las extracciones del LLM en nodos, descartando hechos vacíos y
/// key elements en blanco.
fn collect_atomic_facts(chunks: &[ChunkNode], extractions: Vec<Extraction>) -> Vec<AtomicFactNode> {
    chunks
        .iter()
        .zip(extractions)
        .flat_map(|(chunk, extraction)| {
            extraction
                .atomic_facts
                .into_iter()
                .filter(|af| !af.atomic_fact.trim().is_empty())
                .map(move |af| AtomicFactNode {
                    id: content_hash(&af.atomic_fact),
                    chunk_id: chunk.id.clone(),
                    text: af.atomic_fact,
                    key_elements: af
                        .key_elements
                        .into_iter()
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect(),
                })
        })
        .collect()
}

/// Desengancha del documento los chunks que ya no forman parte de él.
const UNLINK_STALE_CHUNKS: &str = "MATCH (d:Document {id: $id})-[r:HAS_CHUNK]->(c:Chunk)
     WHERE NOT c.id IN $chunk_ids
     DELETE r";

/// Borra los chunks que se han quedado sin documento.
const DELETE_ORPHAN_CHUNKS: &str = "MATCH (c:Chunk)
     WHERE NOT EXISTS { (:Document)-[:HAS_CHUNK]->(c) }
     DETACH DELETE c";

/// Sólo los `NEXT` salientes entre chunks del propio documento.
const DELETE_DOCUMENT_NEXT: &str =
    "MATCH (d:Document {id: $id})-[:HAS_CHUNK]->(:Chunk)-[r:NEXT]->(:Chunk)<-[:HAS_CHUNK]-(d)
     DELETE r";

/// Persiste un documento completo. Los chunks que ya no forman parte del
/// documento se eliminan para que la cadena `NEXT` refleje el texto actual;
/// nada de otro documento se toca.
async fn import_document(
    tx: &Txn,
    doc: &DocumentNode,
    chunks: &[ChunkNode],
    facts: &[AtomicFactNode],
) -> Result<()> {
    // 1) Document
    tx.run(
        query("MERGE (d:Document {id: $id}) SET d.address = $address")
            .param("id", doc.id.clone())
            .param("address", doc.address.clone()),
    )
    .await?;

    let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    tx.run(
        query(UNLINK_STALE_CHUNKS)
            .param("id", doc.id.clone())
            .param("chunk_ids", chunk_ids),
    )
    .await?;
    tx.run(query(DELETE_ORPHAN_CHUNKS)).await?;

    // 2) Chunks
    for chunk in chunks {
        let set_page = if chunk.page.is_some() {
            "c.page = $page"
        } else {
            "c.page = null"
        };
        let cypher = format!(
            "MERGE (c:Chunk {{id: $id}})
             SET c.text = $text, c.index = $index, c.type = $type, {set_page}
             WITH c MATCH (d:Document {{id: $doc_id}}) MERGE (d)-[:HAS_CHUNK]->(c)"
        );
        let mut q = query(&cypher)
            .param("id", chunk.id.clone())
            .param("text", chunk.text.clone())
            .param("index", chunk.index)
            .param("type", chunk.chunk_type.clone())
            .param("doc_id", chunk.document_id.clone());
        if let Some(page) = chunk.page {
            q = q.param("page", page);
        }
        tx.run(q).await?;
    }

    // 3) Relaciones NEXT
    tx.run(query(DELETE_DOCUMENT_NEXT).param("id", doc.id.clone()))
        .await?;
    for (from, to) in next_links(chunks) {
        tx.run(
            query("MATCH (a:Chunk {id: $from}), (b:Chunk {id: $to}) MERGE (a)-[:NEXT]->(b)")
                .param("from", from)
                .param("to", to),
        )
        .await?;
    }

    // 4) Hechos atómicos y key elements
    for fact in facts {
        tx.run(
            query(
                "MERGE (a:AtomicFact {id: $id})
                 SET a.text = $text
                 WITH a MATCH (c:Chunk {id: $chunk_id}) MERGE (c)-[:HAS_ATOMIC_FACT]->(a)
                 WITH a UNWIND $key_elements AS ke
                 MERGE (k:KeyElement {id: ke})
                 MERGE (a)-[:HAS_KEY_ELEMENT]->(k)",
            )
            .param("id", fact.id.clone())
            .param("text", fact.text.clone())
            .param("chunk_id", fact.chunk_id.clone())
            .param("key_elements", fact.key_elements.clone()),
        )
        .await?;
    }

    Ok(())
}

/// Pares `(chunk, siguiente)` en orden de documento: uno por chunk salvo el último.
pub fn next_links(chunks: &[ChunkNode]) -> Vec<(String, String)> {
    let mut ordered: Vec<&ChunkNode> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);
    ordered
        .windows(2)
        .map(|pair| (pair[0].id.clone(), pair[1].id.clone()))
        .collect()
}

/// SHA-256 del texto en hexadecimal; identifica hechos atómicos y es la base
/// de `chunk_id`.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Agrupa párrafos (separados por línea en blanco) hasta `max_chars`.
/// Un párrafo más largo que el límite forma un chunk propio.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if current.len() + paragraph.len() + 2 > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Agrupación voraz: cada elemento aún libre abre un grupo y arrastra a los
/// libres con similitud ≥ `threshold`. Devuelve elemento → representante
/// (el primero del grupo).
pub fn cluster_key_elements(
    elements: &[String],
    embeddings: &[Vec<f64>],
    threshold: f64,
) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    let mut used = vec![false; elements.len()];

    for i in 0..elements.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        mapping.insert(elements[i].clone(), elements[i].clone());
        for j in (i + 1)..elements.len() {
            if !used[j] && cosine_similarity(&embeddings[i], &embeddings[j]) >= threshold {
                used[j] = true;
                mapping.insert(elements[j].clone(), elements[i].clone());
            }
        }
    }
    mapping
}

/// Reescribe los key elements de `facts` a su representante, considerando
/// primero los que ya existen en el grafo.
async fn normalize_key_elements(
    graph: &Graph,
    llm: &LlmManager,
    facts: &mut [AtomicFactNode],
    threshold: f64,
) -> Result<()> {
    let mut elements = Vec::new();
    let mut cursor = graph
        .execute(query("MATCH (k:KeyElement) RETURN k.id AS id ORDER BY id"))
        .await?;
    while let Some(row) = cursor.next().await? {
        if let Some(id) = row.get::<String>("id") {
            elements.push(id);
        }
    }
    for fact in facts.iter() {
        for key in &fact.key_elements {
            if !elements.contains(key) {
                elements.push(key.clone());
            }
        }
    }
    if elements.len() < 2 {
        return Ok(());
    }

    let mut embeddings = Vec::with_capacity(elements.len());
    for batch in elements.chunks(EMBEDDING_BATCH) {
        embeddings.extend(llm.embed_texts(batch.to_vec()).await?);
    }
    let mapping = cluster_key_elements(&elements, &embeddings, threshold);

    let mut merged = 0;
    for fact in facts.iter_mut() {
        let mut normalized: Vec<String> = Vec::with_capacity(fact.key_elements.len());
        for key in &fact.key_elements {
            let representative = mapping.get(key).unwrap_or(key);
            if representative != key {
                merged += 1;
            }
            if !normalized.contains(representative) {
                normalized.push(representative.clone());
            }
        }
        fact.key_elements = normalized;
    }
    info!("Normalización de key elements: {merged} menciones fusionadas (umbral {threshold}).");
    Ok(())
}

/// Calcula y guarda el embedding de los key elements que no lo tienen.
pub async fn embed_missing_key_elements(graph: &Graph, llm: &LlmManager) -> Result<usize> {
    let mut missing = Vec::new();
    let mut cursor = graph
        .execute(query(
            "MATCH (k:KeyElement) WHERE k.embedding IS NULL RETURN k.id AS id",
        ))
        .await?;
    while let Some(row) = cursor.next().await? {
        if let Some(id) = row.get::<String>("id") {
            missing.push(id);
        }
    }

    for batch in missing.chunks(EMBEDDING_BATCH) {
        let vectors = llm.embed_texts(batch.to_vec()).await?;
        let tx = graph.start_txn().await?;
        for (id, vector) in batch.iter().zip(vectors) {
            tx.run(
                query("MATCH (k:KeyElement {id: $id}) SET k.embedding = $embedding")
                    .param("id", id.clone())
                    .param("embedding", vector),
            )
            .await?;
        }
        tx.commit().await?;
    }

    if !missing.is_empty() {
        info!("Embeddings calculados para {} key elements.", missing.len());
    }
    Ok(missing.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ExtractedFact;
    use std::collections::HashSet;

    fn chunk(id: &str, index: i64) -> ChunkNode {
        ChunkNode {
            id: id.to_string(),
            document_id: "doc".to_string(),
            index,
            text: format!("texto {id}"),
            chunk_type: "Text".to_string(),
            page: None,
        }
    }

    #[test]
    fn every_chunk_but_the_last_links_to_its_successor() {
        let chunks = vec![chunk("c", 2), chunk("a", 0), chunk("d", 3), chunk("b", 1)];

        let links = next_links(&chunks);

        assert_eq!(
            links,
            vec![
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "c".to_string()),
                ("c".to_string(), "d".to_string()),
            ]
        );
        for c in &chunks {
            let outgoing = links.iter().filter(|(from, _)| from == &c.id).count();
            let expected = if c.id == "d" { 0 } else { 1 };
            assert_eq!(outgoing, expected, "chunk {}", c.id);
        }
    }

    #[test]
    fn single_chunk_has_no_links() {
        assert!(next_links(&[chunk("a", 0)]).is_empty());
        assert!(next_links(&[]).is_empty());
    }

    #[test]
    fn repeated_paragraphs_keep_a_linear_chain() {
        let raw = split_into_chunks("Intro A\n\nRepetido X\n\nMedio B\n\nRepetido X", 5);
        assert_eq!(raw.len(), 4);

        let chunks = build_chunk_nodes("doc.txt", raw);
        let links = next_links(&chunks);

        let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(links.len(), 3);
        let last = &chunks[3].id;
        assert_eq!(links.iter().filter(|(from, _)| from == last).count(), 0);
        for c in &chunks[..3] {
            assert_eq!(links.iter().filter(|(from, _)| from == &c.id).count(), 1);
        }
    }

    #[test]
    fn shared_paragraph_gets_one_chunk_per_document() {
        let a = build_chunk_nodes("a.txt", vec!["P".into(), "S".into()]);
        let b = build_chunk_nodes("b.txt", vec!["S".into(), "Q".into()]);

        assert_ne!(a[1].id, b[0].id);
        let a_ids: HashSet<&str> = a.iter().map(|c| c.id.as_str()).collect();
        assert!(b.iter().all(|c| !a_ids.contains(c.id.as_str())));
        assert_eq!(chunk_id("a.txt", 1, "S"), a[1].id);
    }

    #[test]
    fn reimport_cleanup_is_scoped_to_the_document() {
        assert!(DELETE_DOCUMENT_NEXT.contains("-[r:NEXT]->(:Chunk)<-[:HAS_CHUNK]-(d)"));
        assert!(UNLINK_STALE_CHUNKS.contains("DELETE r"));
        assert!(!UNLINK_STALE_CHUNKS.contains("DETACH"));
        assert!(DELETE_ORPHAN_CHUNKS.contains("NOT EXISTS { (:Document)-[:HAS_CHUNK]->(c) }"));
    }

    #[test]
    fn paragraphs_are_packed_up_to_the_limit() {
        let text = "uno uno\n\ndos dos\n\n\n\ntres tres tres tres tres";
        let chunks = split_into_chunks(text, 20);
        assert_eq!(chunks, vec!["uno uno\n\ndos dos", "tres tres tres tres tres"]);
        assert!(split_into_chunks("  \n\n ", 20).is_empty());
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash("Danny se retiró en 1990.");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("Danny se retiró en 1990."));
        assert_ne!(h, content_hash("Alice se retiró en 1990."));
    }

    #[test]
    fn similar_key_elements_share_a_representative() {
        let elements: Vec<String> = ["tenis", "tennis", "parís", "paris", "1990"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.95, 0.05, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.1, 0.9, 0.0],
            vec![0.0, 0.0, 1.0],
        ];

        let mapping = cluster_key_elements(&elements, &embeddings, 0.7);

        assert_eq!(mapping["tennis"], "tenis");
        assert_eq!(mapping["paris"], "parís");
        assert_eq!(mapping["1990"], "1990");
        assert_eq!(mapping["tenis"], "tenis");
    }

    #[test]
    fn extractions_become_fact_nodes_of_their_chunk() {
        let chunks = vec![chunk("a", 0), chunk("b", 1)];
        let extractions = vec![
            Extraction {
                atomic_facts: vec![ExtractedFact {
                    key_elements: vec![" danny ".into(), "".into()],
                    atomic_fact: "Danny empezó en 1972.".into(),
                }],
            },
            Extraction {
                atomic_facts: vec![ExtractedFact {
                    key_elements: vec!["alice".into()],
                    atomic_fact: "   ".into(),
                }],
            },
        ];

        let facts = collect_atomic_facts(&chunks, extractions);

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].chunk_id, "a");
        assert_eq!(facts[0].key_elements, vec!["danny"]);
        assert_eq!(facts[0].id, content_hash("Danny empezó en 1972."));
    }

    #[test]
    fn only_plain_text_files_are_supported() {
        assert!(is_supported(Path::new("notas.md")));
        assert!(is_supported(Path::new("NOTAS.TXT")));
        assert!(!is_supported(Path::new("informe.pdf")));
        assert!(!is_supported(Path::new("sin_extension")));
    }

    #[test]
    fn address_is_a_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, "hola").unwrap();
        assert!(document_address(&path).starts_with("file://"));
    }
}
