//! Contrato del oráculo de decisiones.
//!
//! Un método por estado de la exploración. Las respuestas llevan el
//! descriptor de acción en bruto (`chosen_action`); su interpretación es cosa
//! de la máquina de estados (`action.rs`), así un descriptor inválido falla
//! igual venga del LLM real o de un oráculo de pruebas.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AtomicFactRow, ChunkText};

/// Contexto común que reciben las decisiones intermedias.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExplorationContext<'a> {
    pub question: &'a str,
    pub rational_plan: &'a str,
    pub notebook: &'a str,
    pub previous_actions: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredNode {
    /// Key element exactamente como aparece en la lista de candidatos.
    pub key_element: String,
    /// Relevancia de 0 a 100.
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InitialNodes {
    pub initial_nodes: Vec<ScoredNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AtomicFactDecision {
    /// Notebook actual combinado con lo aprendido de estos hechos.
    pub updated_notebook: String,
    pub rational_next_action: String,
    /// `read_chunk(List[ID])` o `stop_and_read_neighbor()`.
    pub chosen_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkDecision {
    pub updated_notebook: String,
    pub rational_next_move: String,
    /// `search_more()`, `read_previous_chunk()`, `read_subsequent_chunk()` o `termination()`.
    pub chosen_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NeighborDecision {
    pub rational_next_move: String,
    /// `read_neighbor_node(key element)` o `termination()`.
    pub chosen_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnswerDecision {
    pub analyze: String,
    pub final_answer: String,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn plan(&self, question: &str) -> Result<String>;

    async fn select_initial_nodes(
        &self,
        question: &str,
        rational_plan: &str,
        candidates: &[String],
    ) -> Result<Vec<ScoredNode>>;

    async fn check_atomic_facts(
        &self,
        ctx: ExplorationContext<'_>,
        atomic_facts: &[AtomicFactRow],
    ) -> Result<AtomicFactDecision>;

    async fn read_chunk(&self, ctx: ExplorationContext<'_>, chunk: &ChunkText) -> Result<ChunkDecision>;

    async fn select_neighbor(
        &self,
        ctx: ExplorationContext<'_>,
        candidates: &[String],
    ) -> Result<NeighborDecision>;

    async fn reason_answer(&self, question: &str, notebook: &str) -> Result<AnswerDecision>;
}
