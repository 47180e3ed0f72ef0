//! Ejecución de sesiones con checkpoint por paso.
//!
//! El runner conduce la máquina de estados de `explorer.rs` desde
//! `Step::START` hasta la respuesta, aplica el límite de pasos y guarda un
//! `Checkpoint` tras cada paso completado. Si un paso falla, el checkpoint
//! conserva el último estado bueno y la sesión puede reanudarse.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::error::{ExplorerError, Result};
use crate::explorer::{GraphExplorer, Transition};
use crate::state::{AnswerRecord, InputState, SessionState, Step};

/// Límite de pasos por defecto para una sesión.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub thread_id: String,
    pub recursion_limit: usize,
}

impl RunConfig {
    /// Configuración con un thread id nuevo.
    pub fn new(recursion_limit: usize) -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            recursion_limit,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RECURSION_LIMIT)
    }
}

#[derive(Clone)]
pub struct SessionRunner {
    explorer: GraphExplorer,
    checkpointer: Arc<dyn Checkpointer>,
}

impl SessionRunner {
    pub fn new(explorer: GraphExplorer, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            explorer,
            checkpointer,
        }
    }

    /// Responde a una pregunta desde cero. Un checkpoint previo del mismo hilo
    /// se sobrescribe.
    pub async fn run(&self, input: InputState, cfg: &RunConfig) -> Result<AnswerRecord> {
        info!("Nueva sesión '{}': {}", cfg.thread_id, input.question);
        let checkpoint = Checkpoint {
            thread_id: cfg.thread_id.clone(),
            next: Some(Step::START),
            state: SessionState::new(input),
            steps: 0,
            visited: Vec::new(),
            answer: None,
            updated_at: Utc::now(),
        };
        self.checkpointer.put(&checkpoint)?;
        self.drive(checkpoint, cfg.recursion_limit).await
    }

    /// Continúa una sesión suspendida desde su último checkpoint. Si ya había
    /// terminado, devuelve la respuesta guardada sin volver a ejecutar nada.
    pub async fn resume(&self, thread_id: &str, recursion_limit: usize) -> Result<AnswerRecord> {
        let checkpoint = self
            .checkpointer
            .get(thread_id)?
            .ok_or_else(|| ExplorerError::SessionNotFound {
                thread_id: thread_id.to_string(),
            })?;

        if checkpoint.is_finished() {
            info!("Sesión '{thread_id}' ya terminada, se devuelve la respuesta guardada.");
            return checkpoint.answer.ok_or_else(|| {
                ExplorerError::Checkpoint(format!("la sesión '{thread_id}' terminó sin respuesta"))
            });
        }

        info!(
            "Reanudando sesión '{thread_id}' en {:?} tras {} pasos",
            checkpoint.next, checkpoint.steps
        );
        self.drive(checkpoint, recursion_limit).await
    }

    /// Último checkpoint del hilo, si existe.
    pub fn checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        self.checkpointer.get(thread_id)
    }

    /// Borra el checkpoint del hilo. No falla si no existe.
    pub fn forget(&self, thread_id: &str) -> Result<()> {
        self.checkpointer.delete(thread_id)
    }

    /// Sesiones guardadas, las más recientes primero.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        self.checkpointer.list(limit)
    }

    async fn drive(&self, mut checkpoint: Checkpoint, recursion_limit: usize) -> Result<AnswerRecord> {
        while let Some(step) = checkpoint.next {
            if checkpoint.steps >= recursion_limit {
                error!(
                    "Sesión '{}' detenida: límite de {recursion_limit} pasos alcanzado antes de {step}",
                    checkpoint.thread_id
                );
                return Err(ExplorerError::StepLimitExceeded {
                    limit: recursion_limit,
                });
            }

            // El handler trabaja sobre una copia: si falla, el checkpoint no cambia.
            let mut state = checkpoint.state.clone();
            let transition = self
                .explorer
                .step(step, &mut state)
                .await
                .inspect_err(|e| error!("Sesión '{}' falló en {step}: {e}", checkpoint.thread_id))?;

            checkpoint.state = state;
            checkpoint.steps += 1;
            checkpoint.visited.push(step);
            checkpoint.updated_at = Utc::now();
            match transition {
                Transition::Next(next) => checkpoint.next = Some(next),
                Transition::Done(answer) => {
                    checkpoint.next = None;
                    checkpoint.answer = Some(answer);
                }
            }
            self.checkpointer.put(&checkpoint)?;
        }

        info!(
            "Sesión '{}' terminada en {} pasos",
            checkpoint.thread_id, checkpoint.steps
        );
        checkpoint.answer.ok_or_else(|| {
            ExplorerError::Checkpoint(format!(
                "la sesión '{}' terminó sin respuesta",
                checkpoint.thread_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointer;
    use crate::testing::{InMemoryGraph, ScriptedOracle};

    fn graph() -> InMemoryGraph {
        InMemoryGraph::new()
            .with_document(
                "Tennis history",
                "https://example.org/tennis",
                &[
                    ("c1", "Danny started his tennis career in 1972."),
                    ("c2", "Danny retired in 1990."),
                ],
            )
            .with_fact("c1", "Danny started his career in 1972", &["danny", "career"])
            .with_fact("c2", "Danny retired in 1990", &["danny", "retirement"])
    }

    fn two_chunk_oracle() -> ScriptedOracle {
        ScriptedOracle::new()
            .with_initial_nodes(&[("danny", 90), ("career", 70)])
            .on_atomic_facts("read_chunk(['c1', 'c2'])")
            .on_chunk("search_more()")
            .on_chunk("termination()")
    }

    fn runner(oracle: ScriptedOracle) -> (SessionRunner, Arc<MemoryCheckpointer>) {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let explorer = GraphExplorer::new(Arc::new(graph()), Arc::new(oracle), 50);
        (SessionRunner::new(explorer, checkpointer.clone()), checkpointer)
    }

    fn input(question: &str) -> InputState {
        InputState {
            question: question.to_string(),
        }
    }

    #[tokio::test]
    async fn two_chunk_session_visits_chunk_check_twice() {
        let (runner, _) = runner(two_chunk_oracle());
        let cfg = RunConfig::default().with_thread_id("t1");

        let answer = runner.run(input("When did Danny play?"), &cfg).await.unwrap();

        let checkpoint = runner.checkpoint("t1").unwrap().unwrap();
        assert!(checkpoint.is_finished());
        assert_eq!(checkpoint.state.context, vec!["c1", "c2"]);
        assert_eq!(
            checkpoint.visited,
            vec![
                Step::RationalPlan,
                Step::InitialNodeSelection,
                Step::AtomicFactCheck,
                Step::ChunkCheck,
                Step::ChunkCheck,
                Step::AnswerReasoning,
            ]
        );
        assert_eq!(checkpoint.steps, 6);
        assert_eq!(checkpoint.answer, Some(answer.clone()));
        assert_eq!(
            answer.citations.get("Tennis history").map(String::as_str),
            Some("https://example.org/tennis")
        );
    }

    #[tokio::test]
    async fn step_ceiling_stops_before_chunk_check() {
        let (runner, _) = runner(two_chunk_oracle());
        let cfg = RunConfig::new(3).with_thread_id("t1");

        let err = runner.run(input("q"), &cfg).await.unwrap_err();

        assert!(matches!(err, ExplorerError::StepLimitExceeded { limit: 3 }));
        assert_eq!(err.kind(), "step_limit_exceeded");
        let checkpoint = runner.checkpoint("t1").unwrap().unwrap();
        assert_eq!(checkpoint.next, Some(Step::ChunkCheck));
        assert_eq!(checkpoint.steps, 3);
        assert!(checkpoint.answer.is_none());
    }

    #[tokio::test]
    async fn step_ceiling_stops_endless_search_more() {
        let oracle = ScriptedOracle::new().on_chunk("search_more()");
        let (runner, checkpointer) = runner(oracle);
        let mut state = SessionState::new(input("q"));
        state
            .check_chunks_queue
            .extend(["c1", "c2", "c1", "c2", "c1", "c2"].map(String::from));
        checkpointer
            .put(&Checkpoint {
                thread_id: "t1".into(),
                next: Some(Step::ChunkCheck),
                state,
                steps: 0,
                visited: Vec::new(),
                answer: None,
                updated_at: Utc::now(),
            })
            .unwrap();

        let err = runner.resume("t1", 3).await.unwrap_err();

        assert!(matches!(err, ExplorerError::StepLimitExceeded { limit: 3 }));
        let checkpoint = runner.checkpoint("t1").unwrap().unwrap();
        assert_eq!(checkpoint.visited, vec![Step::ChunkCheck; 3]);
        assert_eq!(checkpoint.next, Some(Step::ChunkCheck));
        assert_eq!(checkpoint.state.check_chunks_queue.len(), 3);
        assert_eq!(checkpoint.state.context, vec!["c1", "c2", "c1"]);
    }

    #[tokio::test]
    async fn resume_with_larger_limit_completes() {
        let (runner, _) = runner(two_chunk_oracle());
        let cfg = RunConfig::new(3).with_thread_id("t1");
        assert!(runner.run(input("q"), &cfg).await.is_err());

        let answer = runner.resume("t1", 10).await.unwrap();

        assert_eq!(answer.previous_actions.last().unwrap(), "answer_reasoning");
        assert_eq!(runner.checkpoint("t1").unwrap().unwrap().steps, 6);
    }

    #[tokio::test]
    async fn resume_of_finished_session_replays_answer() {
        let (runner, _) = runner(two_chunk_oracle());
        let cfg = RunConfig::default().with_thread_id("t1");
        let first = runner.run(input("q"), &cfg).await.unwrap();

        // Con límite 0 cualquier ejecución fallaría: no se ejecuta nada.
        let replayed = runner.resume("t1", 0).await.unwrap();
        assert_eq!(replayed, first);
    }

    #[tokio::test]
    async fn unknown_thread_cannot_be_resumed() {
        let (runner, _) = runner(two_chunk_oracle());
        let err = runner.resume("nadie", 10).await.unwrap_err();
        assert!(matches!(err, ExplorerError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn forgotten_session_cannot_be_resumed() {
        let (runner, _) = runner(two_chunk_oracle());
        let cfg = RunConfig::new(3).with_thread_id("t1");
        assert!(runner.run(input("q"), &cfg).await.is_err());

        runner.forget("t1").unwrap();

        assert!(runner.checkpoint("t1").unwrap().is_none());
        let err = runner.resume("t1", 10).await.unwrap_err();
        assert_eq!(err.kind(), "session_not_found");
    }

    #[tokio::test]
    async fn threads_keep_isolated_state() {
        let (runner, checkpointer) = runner(two_chunk_oracle());
        runner
            .run(input("primera"), &RunConfig::default().with_thread_id("a"))
            .await
            .unwrap();
        runner
            .run(input("segunda"), &RunConfig::new(2).with_thread_id("b"))
            .await
            .unwrap_err();

        assert_eq!(runner.recent_sessions(10).unwrap().len(), 2);
        let a = checkpointer.get("a").unwrap().unwrap();
        let b = checkpointer.get("b").unwrap().unwrap();
        assert_eq!(a.state.question, "primera");
        assert!(a.is_finished());
        assert_eq!(b.state.question, "segunda");
        assert_eq!(b.next, Some(Step::AtomicFactCheck));
    }

    #[tokio::test]
    async fn failed_step_leaves_last_good_checkpoint() {
        let oracle = ScriptedOracle::new()
            .with_initial_nodes(&[("danny", 90)])
            .on_atomic_facts("read_chunk(['c1'])")
            .on_chunk("not an action at all");
        let (runner, _) = runner(oracle);
        let cfg = RunConfig::default().with_thread_id("t1");

        let err = runner.run(input("q"), &cfg).await.unwrap_err();

        assert_eq!(err.kind(), "oracle_parse_error");
        let checkpoint = runner.checkpoint("t1").unwrap().unwrap();
        assert_eq!(checkpoint.next, Some(Step::ChunkCheck));
        assert_eq!(Vec::from(checkpoint.state.check_chunks_queue), vec!["c1"]);
        assert!(checkpoint.state.context.is_empty());
    }

    #[test]
    fn default_config_generates_distinct_threads() {
        let a = RunConfig::default();
        let b = RunConfig::default();
        assert_ne!(a.thread_id, b.thread_id);
        assert_eq!(a.recursion_limit, DEFAULT_RECURSION_LIMIT);
    }
}
