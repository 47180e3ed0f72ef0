//! Prompts del explorador y de la extracción de conocimiento.
//!
//! Los nombres de las acciones (`read_chunk`, `termination`...) se mantienen
//! en inglés: son los que entiende `action.rs`.

use crate::models::{AtomicFactRow, ChunkText};
use crate::oracle::ExplorationContext;

const GRAPH_DESCRIPTION: &str = r#"Tu objetivo principal es responder preguntas a partir de la información contenida en un conjunto de textos.
Para ello se ha construido un grafo a partir de los textos, con estos elementos:
1. Chunks: fragmentos del texto original.
2. Hechos atómicos: las verdades más pequeñas e indivisibles extraídas de los chunks.
3. Nodos: key elements del texto (sustantivo, verbo o adjetivo) relacionados con varios hechos atómicos de distintos chunks."#;

pub const EXTRACTION_SYSTEM: &str = r#"
Eres un asistente encargado de extraer, de forma meticulosa, key elements y hechos atómicos de un texto.
1. Key elements: los sustantivos esenciales (personajes, fechas, eventos, lugares, números), verbos (acciones) y adjetivos (estados, sentimientos) clave para el contenido del texto.
2. Hechos atómicos: los hechos más pequeños e indivisibles, expresados como frases concisas. Incluyen proposiciones, teorías, existencias, conceptos y elementos implícitos como lógica, causalidad, secuencias de eventos, relaciones personales o cronologías.
Requisitos:
#####
1. Todos los key elements identificados deben aparecer en sus hechos atómicos.
2. Extrae de forma exhaustiva, sobre todo lo que sea importante y susceptible de ser preguntado; no omitas detalles.
3. Sustituye los pronombres por el nombre concreto al que se refieren siempre que sea posible.
4. Key elements y hechos atómicos deben estar en el mismo idioma que el texto original.
5. Los key elements van en minúsculas salvo que sean nombres propios.
#####
"#;

pub const RATIONAL_PLAN_SYSTEM: &str = r#"
Eres un asistente cuyo objetivo principal es responder a la pregunta reuniendo hechos que la respalden a partir de un texto.
El primer paso es elaborar un plan razonado a partir de la pregunta. El plan debe describir paso a paso cómo resolverla e indicar la información clave necesaria para una respuesta completa.
Ejemplo:
#####
Usuario: ¿Quién tuvo una carrera tenística más larga, Danny o Alice?
Asistente: Para responder a esta pregunta primero necesitamos conocer la duración de las carreras de Danny y de Alice, por ejemplo el inicio y la retirada de cada una, y después compararlas.
#####
Sigue estrictamente el formato anterior. Responde sólo con el plan.
"#;

pub fn initial_nodes_system() -> String {
    format!(
        r#"
{GRAPH_DESCRIPTION}
Tu tarea actual es revisar una lista de nodos y seleccionar los nodos iniciales más relevantes para responder a la pregunta de forma eficiente. Recibes la pregunta, el plan razonado y una lista de key elements. Estos nodos iniciales son el punto de partida de la búsqueda.
Requisitos:
#####
1. Asigna a cada nodo elegido una puntuación de relevancia entre 0 y 100: 100 indica una probabilidad alta de ser relevante para la respuesta y 0 una relevancia mínima.
2. Selecciona al menos 10 nodos iniciales, sin repetir y variados.
3. Cada línea de la entrada es un nodo. Elige sólo entre los nodos dados, sin inventar ninguno: el key element de tu respuesta debe coincidir exactamente, palabra por palabra, con el de la entrada.
#####
"#
    )
}

pub fn atomic_fact_system() -> String {
    format!(
        r#"
{GRAPH_DESCRIPTION}
Tu tarea actual es revisar un nodo y sus hechos atómicos para decidir si conviene leer los chunks correspondientes.
Recibes la pregunta, el plan razonado, las acciones previas, el notebook y los hechos atómicos del nodo actual junto con el ID de su chunk. Opciones de acción:
#####
1. read_chunk(List[ID]): elige esta acción si crees que algún chunk ligado a un hecho atómico puede contener la información necesaria. Te dará acceso a información más completa y detallada.
2. stop_and_read_neighbor(): elige esta acción si estás seguro de que ningún chunk contiene información valiosa.
#####
Estrategia:
#####
1. Revisa las acciones previas y evita volver a visitar nodos o chunks.
2. Puedes leer varios chunks a la vez.
3. Los hechos atómicos sólo cubren parte del chunk: aunque sean apenas relevantes, lee el chunk para no perder información.
#####
Elige stop_and_read_neighbor() sólo cuando estés muy seguro de que los chunks no son relevantes para la pregunta.
En `updated_notebook` escribe el notebook actual completado con lo que aportan estos hechos; nunca descartes notas anteriores.
"#
    )
}

pub fn chunk_read_system() -> String {
    format!(
        r#"
{GRAPH_DESCRIPTION}
Tu tarea actual es evaluar un chunk concreto y decidir si la información disponible basta para responder a la pregunta.
Recibes la pregunta, el plan razonado, las acciones previas, el notebook y el chunk actual. Opciones de acción:
#####
1. search_more(): si todavía falta información esencial para responder.
2. read_previous_chunk(): si crees que el chunk anterior contiene información valiosa.
3. read_subsequent_chunk(): si crees que el chunk siguiente contiene información valiosa.
4. termination(): si la información reunida basta para responder. Se resumirá lo recogido y se dará la respuesta final.
#####
Estrategia:
#####
1. Revisa las acciones previas y evita volver a visitar nodos o chunks.
2. Sólo puedes elegir una acción.
#####
En `updated_notebook` escribe el notebook actual completado con lo que aporta este chunk; nunca descartes notas anteriores.
"#
    )
}

pub fn neighbor_select_system() -> String {
    format!(
        r#"
{GRAPH_DESCRIPTION}
Tu tarea actual es evaluar los nodos vecinos del nodo actual y decidir si continuar por alguno de ellos.
Recibes la pregunta, el plan razonado, las acciones previas, el notebook y los vecinos del nodo actual. Opciones de acción:
#####
1. read_neighbor_node(key element del nodo): si crees que alguno de los vecinos puede contener información relevante. Céntrate en un solo vecino cada vez.
2. termination(): si ningún vecino tiene información que ayude a responder.
#####
Estrategia:
#####
1. Revisa las acciones previas y evita volver a visitar nodos o chunks.
2. Sólo puedes elegir una acción: leer un único vecino o terminar.
#####
"#
    )
}

pub fn answer_reasoning_system() -> String {
    format!(
        r#"
{GRAPH_DESCRIPTION}
Has explorado varios caminos desde distintos nodos iniciales y has anotado la información clave de cada uno en un notebook.
Tu tarea ahora es analizar esas notas y razonar la respuesta.
Estrategia:
#####
1. Analiza primero el contenido del notebook antes de dar la respuesta final.
2. Durante el análisis considera la información complementaria de otras notas y resuelve las incoherencias por mayoría.
3. La respuesta final debe tener en cuenta toda la información disponible.
#####
Ejemplo:
#####
Pregunta: ¿Quién tuvo una carrera tenística más larga, Danny o Alice?
Notebook de los distintos caminos:
1. Sólo sabemos que la carrera de Danny empezó en 1972 y terminó en 1990, pero no conocemos la de Alice.
2. ......
Análisis:
El camino 1 indica que la carrera de Danny duró 1990-1972=18 años. Aunque no da la de Alice, el camino 2 sí la encuentra: 15 años. Por tanto la carrera de Danny fue más larga que la de Alice.
Respuesta final:
La carrera tenística de Danny fue más larga que la de Alice.
#####
Presenta la respuesta final en Markdown bien estructurado: listas con viñetas, tablas para datos tabulares, negritas o cursivas donde aporten y cabeceras para las secciones clave.
"#
    )
}

pub fn initial_nodes_input(question: &str, rational_plan: &str, candidates: &[String]) -> String {
    format!(
        "Pregunta: {question}\nPlan: {rational_plan}\nNodos:\n{}",
        candidates.join("\n")
    )
}

fn exploration_header(ctx: &ExplorationContext<'_>) -> String {
    format!(
        "Pregunta: {}\nPlan: {}\nAcciones previas: {}\nNotebook: {}",
        ctx.question,
        ctx.rational_plan,
        ctx.previous_actions.join(", "),
        ctx.notebook
    )
}

pub fn atomic_facts_input(ctx: &ExplorationContext<'_>, atomic_facts: &[AtomicFactRow]) -> String {
    let facts: Vec<String> = atomic_facts
        .iter()
        .map(|f| format!("- [{}] {}", f.chunk_id, f.text))
        .collect();
    format!(
        "{}\nHechos atómicos:\n{}",
        exploration_header(ctx),
        facts.join("\n")
    )
}

pub fn chunk_input(ctx: &ExplorationContext<'_>, chunk: &ChunkText) -> String {
    format!("{}\nChunk: {}", exploration_header(ctx), chunk.text)
}

pub fn neighbors_input(ctx: &ExplorationContext<'_>, candidates: &[String]) -> String {
    format!(
        "{}\nNodos vecinos:\n{}",
        exploration_header(ctx),
        candidates.join("\n")
    )
}

pub fn answer_input(question: &str, notebook: &str) -> String {
    format!("Pregunta: {question}\nNotebook: {notebook}")
}
