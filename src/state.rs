//! Estado de una sesión de exploración y tipos de entrada/salida del runner.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::ActionTag;

/// Estados de la máquina de exploración.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    RationalPlan,
    InitialNodeSelection,
    AtomicFactCheck,
    ChunkCheck,
    NeighborSelect,
    AnswerReasoning,
}

impl Step {
    pub const START: Step = Step::RationalPlan;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RationalPlan => "rational_plan",
            Self::InitialNodeSelection => "initial_node_selection",
            Self::AtomicFactCheck => "atomic_fact_check",
            Self::ChunkCheck => "chunk_check",
            Self::NeighborSelect => "neighbor_select",
            Self::AnswerReasoning => "answer_reasoning",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entrada de una sesión.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputState {
    pub question: String,
}

/// Estado completo de una pregunta. Lo posee la máquina de estados y se pasa
/// por `&mut` a cada handler; el runner lo serializa en cada checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub question: String,
    pub rational_plan: String,
    pub notebook: String,
    pub previous_actions: Vec<String>,
    pub check_atomic_facts_queue: Vec<String>,
    pub check_chunks_queue: VecDeque<String>,
    pub neighbor_check_queue: Vec<String>,
    pub chosen_action: Option<ActionTag>,
    pub context: Vec<String>,
}

impl SessionState {
    pub fn new(input: InputState) -> Self {
        Self {
            question: input.question,
            ..Default::default()
        }
    }

    /// Sustituye el notebook por la versión actualizada del oráculo.
    /// Una respuesta vacía no borra lo acumulado.
    pub fn update_notebook(&mut self, updated: String) {
        if !updated.trim().is_empty() {
            self.notebook = updated;
        }
    }
}

/// Resultado final de una sesión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub answer: String,
    pub analysis: String,
    /// Nombre del documento → dirección de origen.
    pub citations: BTreeMap<String, String>,
    pub previous_actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_notebook_updates_keep_previous_notes() {
        let mut state = SessionState::new(InputState {
            question: "q".into(),
        });
        state.update_notebook("Danny: 1972-1990".into());
        state.update_notebook("   ".into());
        assert_eq!(state.notebook, "Danny: 1972-1990");
    }

    #[test]
    fn session_state_survives_json() {
        let mut state = SessionState::new(InputState {
            question: "q".into(),
        });
        state.check_chunks_queue.push_back("c1".into());
        state.chosen_action = Some(ActionTag::SearchMore);
        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
