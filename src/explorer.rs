//! Máquina de estados de exploración del grafo (GraphReader).
//!
//! Flujo:
//!   1. `RationalPlan`: el LLM escribe un plan para la pregunta.
//!   2. `InitialNodeSelection`: candidatos por búsqueda vectorial + BM25, el LLM
//!      puntúa y los 5 mejores entran en la cola de hechos atómicos.
//!   3. `AtomicFactCheck`: se leen los hechos de esos key elements y se decide
//!      entre leer chunks o saltar a vecinos.
//!   4. `ChunkCheck`: se lee un chunk por paso (FIFO) y se decide si seguir,
//!      moverse por `NEXT`, buscar vecinos o terminar.
//!   5. `NeighborSelect`: el LLM elige un vecino o termina.
//!   6. `AnswerReasoning`: respuesta final a partir del notebook + citas.
//!
//! Cada handler recibe el estado por `&mut`, hace como mucho una llamada al
//! oráculo y devuelve la transición. No hay reintentos ni acciones por defecto:
//! cualquier error aborta la sesión.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::action::{ActionTag, AtomicFactAction, ChunkAction, NeighborAction};
use crate::error::{ExplorerError, Result};
use crate::graph_store::GraphStore;
use crate::models::{ChunkText, Direction, ScoredKeyElement};
use crate::oracle::{DecisionOracle, ExplorationContext, ScoredNode};
use crate::state::{AnswerRecord, SessionState, Step};

/// Nodos iniciales con los que arranca la exploración.
pub const INITIAL_NODE_COUNT: usize = 5;

/// Resultado de ejecutar un paso.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Next(Step),
    Done(AnswerRecord),
}

#[derive(Clone)]
pub struct GraphExplorer {
    graph: Arc<dyn GraphStore>,
    oracle: Arc<dyn DecisionOracle>,
    candidate_k: usize,
}

impl GraphExplorer {
    /// `candidate_k` es el nº de candidatos pedidos a cada estrategia de
    /// búsqueda (vectorial y léxica) en la selección inicial.
    pub fn new(graph: Arc<dyn GraphStore>, oracle: Arc<dyn DecisionOracle>, candidate_k: usize) -> Self {
        Self {
            graph,
            oracle,
            candidate_k,
        }
    }

    /// Ejecuta el handler de `step` sobre el estado.
    pub async fn step(&self, step: Step, state: &mut SessionState) -> Result<Transition> {
        match step {
            Step::RationalPlan => self.rational_plan(state).await,
            Step::InitialNodeSelection => self.initial_node_selection(state).await,
            Step::AtomicFactCheck => self.atomic_fact_check(state).await,
            Step::ChunkCheck => self.chunk_check(state).await,
            Step::NeighborSelect => self.neighbor_select(state).await,
            Step::AnswerReasoning => self.answer_reasoning(state).await,
        }
    }

    async fn rational_plan(&self, state: &mut SessionState) -> Result<Transition> {
        info!("Paso: rational_plan");
        let plan = self.oracle.plan(&state.question).await?;
        debug!("Plan: {plan}");

        state.rational_plan = plan;
        state.previous_actions.push(Step::RationalPlan.to_string());
        Ok(Transition::Next(Step::InitialNodeSelection))
    }

    async fn initial_node_selection(&self, state: &mut SessionState) -> Result<Transition> {
        info!("Paso: initial_node_selection");
        let by_vector = self
            .graph
            .similarity_search(&state.question, self.candidate_k)
            .await?;
        let by_lexical = self
            .graph
            .lexical_search(&state.question, self.candidate_k)
            .await?;
        let candidates = union_candidates(by_vector, by_lexical);
        debug!("{} key elements candidatos", candidates.len());

        let scored = self
            .oracle
            .select_initial_nodes(&state.question, &state.rational_plan, &candidates)
            .await?;

        state.check_atomic_facts_queue = top_initial_nodes(scored, INITIAL_NODE_COUNT);
        info!("Nodos iniciales: {:?}", state.check_atomic_facts_queue);
        state.previous_actions.push(Step::InitialNodeSelection.to_string());
        Ok(Transition::Next(Step::AtomicFactCheck))
    }

    async fn atomic_fact_check(&self, state: &mut SessionState) -> Result<Transition> {
        // La cola se procesa una sola vez, elija lo que elija el oráculo.
        let key_elements = std::mem::take(&mut state.check_atomic_facts_queue);
        info!("Paso: atomic_fact_check, leyendo hechos de {:?}", key_elements);

        let atomic_facts = self.graph.atomic_facts(&key_elements).await?;
        let decision = self
            .oracle
            .check_atomic_facts(context_of(state), &atomic_facts)
            .await?;
        debug!("Razonamiento: {}", decision.rational_next_action);

        let action: AtomicFactAction = decision.chosen_action.parse()?;
        info!("Acción elegida: {}", decision.chosen_action);

        state.update_notebook(decision.updated_notebook);
        state.chosen_action = Some(action.tag());
        state
            .previous_actions
            .push(format!("atomic_fact_check({})", format_list(&key_elements)));

        match action {
            AtomicFactAction::ReadChunk { ids } => {
                state.check_chunks_queue = ids.into();
                Ok(Transition::Next(Step::ChunkCheck))
            }
            AtomicFactAction::StopAndReadNeighbor => {
                state.neighbor_check_queue = self.graph.neighbors(&key_elements).await?;
                Ok(Transition::Next(Step::NeighborSelect))
            }
        }
    }

    async fn chunk_check(&self, state: &mut SessionState) -> Result<Transition> {
        let chunk_id = state
            .check_chunks_queue
            .pop_front()
            .ok_or(ExplorerError::EmptyQueueUnderflow {
                queue: "check_chunks_queue",
            })?;
        info!("Paso: read_chunk({chunk_id})");

        let chunk = match self.graph.chunk(&chunk_id).await? {
            Some(chunk) => chunk,
            None => {
                warn!("El chunk '{chunk_id}' no existe en el grafo; se presenta vacío al oráculo.");
                ChunkText {
                    chunk_id: chunk_id.clone(),
                    text: String::new(),
                }
            }
        };

        let decision = self.oracle.read_chunk(context_of(state), &chunk).await?;
        debug!("Razonamiento: {}", decision.rational_next_move);

        let action: ChunkAction = decision.chosen_action.parse()?;
        info!("Acción elegida: {}", decision.chosen_action);

        state.update_notebook(decision.updated_notebook);
        state.context.push(chunk_id.clone());
        state.previous_actions.push(format!("read_chunks({chunk_id})"));
        state.chosen_action = Some(action.tag());

        match action {
            ChunkAction::Termination => Ok(Transition::Next(Step::AnswerReasoning)),
            ChunkAction::ReadPreviousChunk | ChunkAction::ReadSubsequentChunk => {
                let direction = if action == ChunkAction::ReadPreviousChunk {
                    Direction::Previous
                } else {
                    Direction::Subsequent
                };
                match self.graph.adjacent_chunk(&chunk_id, direction).await? {
                    Some(adjacent) => {
                        state.check_chunks_queue.push_back(adjacent);
                        Ok(Transition::Next(Step::ChunkCheck))
                    }
                    None => {
                        warn!("'{chunk_id}' no tiene chunk {direction:?}; se continúa como search_more.");
                        self.continue_or_search_neighbor(state, &decision.rational_next_move)
                            .await
                    }
                }
            }
            ChunkAction::SearchMore => {
                self.continue_or_search_neighbor(state, &decision.rational_next_move)
                    .await
            }
        }
    }

    /// Sigue con la cola de chunks si quedan; si no, pasa a `search_neighbor`
    /// con una búsqueda por similitud sembrada con el razonamiento del oráculo.
    async fn continue_or_search_neighbor(
        &self,
        state: &mut SessionState,
        rationale: &str,
    ) -> Result<Transition> {
        if !state.check_chunks_queue.is_empty() {
            return Ok(Transition::Next(Step::ChunkCheck));
        }

        info!("Cola de chunks agotada, buscando vecinos a partir de: {rationale}");
        state.chosen_action = Some(ActionTag::SearchNeighbor);
        state.neighbor_check_queue = self
            .graph
            .similarity_search(rationale, self.candidate_k)
            .await?
            .into_iter()
            .map(|k| k.id)
            .collect();
        Ok(Transition::Next(Step::NeighborSelect))
    }

    async fn neighbor_select(&self, state: &mut SessionState) -> Result<Transition> {
        // Una sola pasada por visita: la cola se vacía siempre.
        let candidates = std::mem::take(&mut state.neighbor_check_queue);
        info!("Paso: neighbor_select, {} candidatos", candidates.len());

        let decision = self
            .oracle
            .select_neighbor(context_of(state), &candidates)
            .await?;
        debug!("Razonamiento: {}", decision.rational_next_move);

        let action: NeighborAction = decision.chosen_action.parse()?;
        info!("Acción elegida: {}", decision.chosen_action);
        state.chosen_action = Some(action.tag());

        match action {
            NeighborAction::ReadNeighborNode { key } => {
                state.previous_actions.push(format!("neighbor_select({key})"));
                state.check_atomic_facts_queue = vec![key];
                Ok(Transition::Next(Step::AtomicFactCheck))
            }
            NeighborAction::Termination => {
                state.previous_actions.push("neighbor_select()".to_string());
                Ok(Transition::Next(Step::AnswerReasoning))
            }
        }
    }

    async fn answer_reasoning(&self, state: &mut SessionState) -> Result<Transition> {
        info!("Paso: answer_reasoning");
        let decision = self
            .oracle
            .reason_answer(&state.question, &state.notebook)
            .await?;

        state.previous_actions.push(Step::AnswerReasoning.to_string());
        let citations = self.resolve_citations(&state.context).await?;
        info!("Respuesta final con {} citas", citations.len());

        Ok(Transition::Done(AnswerRecord {
            answer: decision.final_answer,
            analysis: decision.analyze,
            citations,
            previous_actions: state.previous_actions.clone(),
        }))
    }

    /// Documento → dirección para cada chunk distinto visitado.
    async fn resolve_citations(&self, context: &[String]) -> Result<BTreeMap<String, String>> {
        let mut seen = HashSet::new();
        let mut citations = BTreeMap::new();
        for chunk_id in context {
            if !seen.insert(chunk_id.as_str()) {
                continue;
            }
            match self.graph.chunk_document(chunk_id).await? {
                Some(doc) => {
                    citations.insert(doc.name, doc.address);
                }
                None => warn!("El chunk '{chunk_id}' no pertenece a ningún documento; sin cita."),
            }
        }
        Ok(citations)
    }
}

fn context_of(state: &SessionState) -> ExplorationContext<'_> {
    ExplorationContext {
        question: &state.question,
        rational_plan: &state.rational_plan,
        notebook: &state.notebook,
        previous_actions: &state.previous_actions,
    }
}

/// Une los candidatos de ambas búsquedas sin duplicados (vectoriales primero).
fn union_candidates(by_vector: Vec<ScoredKeyElement>, by_lexical: Vec<ScoredKeyElement>) -> Vec<String> {
    let mut seen = HashSet::new();
    by_vector
        .into_iter()
        .chain(by_lexical)
        .filter_map(|k| seen.insert(k.id.clone()).then_some(k.id))
        .collect()
}

/// Los `limit` key elements mejor puntuados; a igual score manda el orden del oráculo.
fn top_initial_nodes(mut scored: Vec<ScoredNode>, limit: usize) -> Vec<String> {
    // sort_by es estable.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    let mut seen = HashSet::new();
    scored
        .into_iter()
        .filter(|node| seen.insert(node.key_element.clone()))
        .map(|node| node.key_element)
        .take(limit)
        .collect()
}

fn format_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("'{i}'")).collect();
    format!("[{}]", quoted.join(", "))
}
