//! Dobles de prueba: grafo en memoria y oráculo con guion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::bm25;
use crate::error::{ExplorerError, Result};
use crate::graph_store::{GraphStore, NEIGHBOR_LIMIT};
use crate::models::{AtomicFactRow, ChunkText, Direction, DocumentRef, ScoredKeyElement};
use crate::oracle::{
    AnswerDecision, AtomicFactDecision, ChunkDecision, DecisionOracle, ExplorationContext,
    NeighborDecision, ScoredNode,
};

struct StoredChunk {
    document: DocumentRef,
    position: usize,
    chunk: ChunkText,
}

struct StoredFact {
    chunk_id: String,
    text: String,
    key_elements: Vec<String>,
}

/// Grafo mínimo con la misma semántica que las consultas Cypher.
#[derive(Default)]
pub struct InMemoryGraph {
    chunks: Vec<StoredChunk>,
    facts: Vec<StoredFact>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Añade un documento con sus chunks en orden (NEXT implícito).
    pub fn with_document(mut self, name: &str, address: &str, chunks: &[(&str, &str)]) -> Self {
        for (position, (id, text)) in chunks.iter().enumerate() {
            self.chunks.push(StoredChunk {
                document: DocumentRef {
                    name: name.to_string(),
                    address: address.to_string(),
                },
                position,
                chunk: ChunkText {
                    chunk_id: id.to_string(),
                    text: text.to_string(),
                },
            });
        }
        self
    }

    pub fn with_fact(mut self, chunk_id: &str, text: &str, key_elements: &[&str]) -> Self {
        self.facts.push(StoredFact {
            chunk_id: chunk_id.to_string(),
            text: text.to_string(),
            key_elements: key_elements.iter().map(|k| k.to_string()).collect(),
        });
        self
    }

    fn find_chunk(&self, chunk_id: &str) -> Option<&StoredChunk> {
        self.chunks.iter().find(|c| c.chunk.chunk_id == chunk_id)
    }

    fn all_key_elements(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .facts
            .iter()
            .flat_map(|f| f.key_elements.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    /// Sustituto del embedding: nº de tokens compartidos con el texto.
    async fn similarity_search(&self, text: &str, k: usize) -> Result<Vec<ScoredKeyElement>> {
        let query: HashSet<String> = bm25::tokenize(text).into_iter().collect();
        let mut scored: Vec<ScoredKeyElement> = self
            .all_key_elements()
            .into_iter()
            .map(|id| {
                let overlap = bm25::tokenize(&id).iter().filter(|t| query.contains(*t)).count();
                ScoredKeyElement {
                    id,
                    score: overlap as f64,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap().then(a.id.cmp(&b.id)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn key_element_ids(&self) -> Result<Vec<String>> {
        Ok(self.all_key_elements())
    }

    async fn atomic_facts(&self, key_elements: &[String]) -> Result<Vec<AtomicFactRow>> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for fact in &self.facts {
            if fact.key_elements.iter().any(|k| key_elements.contains(k)) {
                let row = AtomicFactRow {
                    chunk_id: fact.chunk_id.clone(),
                    text: fact.text.clone(),
                };
                if seen.insert(row.clone()) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    async fn neighbors(&self, key_elements: &[String]) -> Result<Vec<String>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for fact in &self.facts {
            // Un camino por cada key element de entrada presente en el hecho, como count(*) en Cypher.
            let hits = fact.key_elements.iter().filter(|k| key_elements.contains(*k)).count();
            if hits == 0 {
                continue;
            }
            for other in fact.key_elements.iter().filter(|k| !key_elements.contains(*k)) {
                *counts.entry(other.clone()).or_insert(0) += hits;
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked
            .into_iter()
            .take(NEIGHBOR_LIMIT)
            .map(|(id, _)| id)
            .collect())
    }

    async fn chunk(&self, chunk_id: &str) -> Result<Option<ChunkText>> {
        Ok(self.find_chunk(chunk_id).map(|c| c.chunk.clone()))
    }

    async fn adjacent_chunk(&self, chunk_id: &str, direction: Direction) -> Result<Option<String>> {
        let Some(current) = self.find_chunk(chunk_id) else {
            return Ok(None);
        };
        let target = match direction {
            Direction::Subsequent => current.position + 1,
            Direction::Previous => match current.position.checked_sub(1) {
                Some(p) => p,
                None => return Ok(None),
            },
        };
        Ok(self
            .chunks
            .iter()
            .find(|c| c.document == current.document && c.position == target)
            .map(|c| c.chunk.chunk_id.clone()))
    }

    async fn chunk_document(&self, chunk_id: &str) -> Result<Option<DocumentRef>> {
        Ok(self.find_chunk(chunk_id).map(|c| c.document.clone()))
    }
}

/// Devuelve respuestas en orden; la última de cada cola se repite indefinidamente.
fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>, what: &str) -> Result<T> {
    let mut queue = queue.lock().unwrap();
    match queue.len() {
        0 => Err(ExplorerError::OracleUnavailable(format!("guion agotado para {what}"))),
        1 => Ok(queue[0].clone()),
        _ => Ok(queue.pop_front().unwrap()),
    }
}

/// Oráculo de pruebas. Cada decisión intermedia añade una línea al notebook
/// recibido, de modo que el notebook sólo crece.
pub struct ScriptedOracle {
    initial_nodes: Vec<ScoredNode>,
    atomic: Mutex<VecDeque<String>>,
    chunk: Mutex<VecDeque<(String, String)>>,
    neighbor: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<&'static str>>,
    pub notebooks: Mutex<Vec<String>>,
    pub initial_candidates: Mutex<Vec<String>>,
    pub neighbor_candidates: Mutex<Vec<Vec<String>>>,
    pub chunk_texts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            initial_nodes: Vec::new(),
            atomic: Mutex::new(VecDeque::new()),
            chunk: Mutex::new(VecDeque::new()),
            neighbor: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            notebooks: Mutex::new(Vec::new()),
            initial_candidates: Mutex::new(Vec::new()),
            neighbor_candidates: Mutex::new(Vec::new()),
            chunk_texts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_initial_nodes(mut self, nodes: &[(&str, i64)]) -> Self {
        self.initial_nodes = nodes
            .iter()
            .map(|(key, score)| ScoredNode {
                key_element: key.to_string(),
                score: *score,
            })
            .collect();
        self
    }

    pub fn on_atomic_facts(self, action: &str) -> Self {
        self.atomic.lock().unwrap().push_back(action.to_string());
        self
    }

    pub fn on_chunk(self, action: &str) -> Self {
        self.on_chunk_with_rationale(action, "")
    }

    pub fn on_chunk_with_rationale(self, action: &str, rationale: &str) -> Self {
        self.chunk
            .lock()
            .unwrap()
            .push_back((action.to_string(), rationale.to_string()));
        self
    }

    pub fn on_neighbor(self, action: &str) -> Self {
        self.neighbor.lock().unwrap().push_back(action.to_string());
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str, notebook: &str) -> String {
        self.calls.lock().unwrap().push(call);
        let mut notebooks = self.notebooks.lock().unwrap();
        notebooks.push(notebook.to_string());
        format!("{notebook}[nota {}]", notebooks.len())
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn plan(&self, question: &str) -> Result<String> {
        self.calls.lock().unwrap().push("plan");
        Ok(format!("Plan para: {question}"))
    }

    async fn select_initial_nodes(
        &self,
        _question: &str,
        _rational_plan: &str,
        candidates: &[String],
    ) -> Result<Vec<ScoredNode>> {
        self.calls.lock().unwrap().push("select_initial_nodes");
        *self.initial_candidates.lock().unwrap() = candidates.to_vec();
        Ok(self.initial_nodes.clone())
    }

    async fn check_atomic_facts(
        &self,
        ctx: ExplorationContext<'_>,
        _atomic_facts: &[AtomicFactRow],
    ) -> Result<AtomicFactDecision> {
        let action = next_scripted(&self.atomic, "check_atomic_facts")?;
        let updated_notebook = self.record("check_atomic_facts", ctx.notebook);
        Ok(AtomicFactDecision {
            updated_notebook,
            rational_next_action: String::new(),
            chosen_action: action,
        })
    }

    async fn read_chunk(&self, ctx: ExplorationContext<'_>, chunk: &ChunkText) -> Result<ChunkDecision> {
        let (action, rationale) = next_scripted(&self.chunk, "read_chunk")?;
        self.chunk_texts.lock().unwrap().push(chunk.text.clone());
        let updated_notebook = self.record("read_chunk", ctx.notebook);
        Ok(ChunkDecision {
            updated_notebook,
            rational_next_move: rationale,
            chosen_action: action,
        })
    }

    async fn select_neighbor(
        &self,
        ctx: ExplorationContext<'_>,
        candidates: &[String],
    ) -> Result<NeighborDecision> {
        let action = next_scripted(&self.neighbor, "select_neighbor")?;
        self.neighbor_candidates.lock().unwrap().push(candidates.to_vec());
        self.record("select_neighbor", ctx.notebook);
        Ok(NeighborDecision {
            rational_next_move: String::new(),
            chosen_action: action,
        })
    }

    async fn reason_answer(&self, question: &str, notebook: &str) -> Result<AnswerDecision> {
        self.calls.lock().unwrap().push("reason_answer");
        self.notebooks.lock().unwrap().push(notebook.to_string());
        Ok(AnswerDecision {
            analyze: format!("Análisis de '{question}'"),
            final_answer: format!("Respuesta basada en: {notebook}"),
        })
    }
}
