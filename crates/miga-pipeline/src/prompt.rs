//! Prompt templates. The `{context}` and `{history}` slots are filled with
//! pre-capped blocks; personas come from the snapshot's agent settings.

use miga_confighub::ConfigSnapshot;
use miga_llm::MessageAnalysis;

const DEFAULT_PERSONA: &str = "Eres Miga, la asistente virtual de una cadena de cafeterías y \
panaderías. Atiendes a clientes por chat: cálida, breve y concreta, siempre en español.";

fn persona(snapshot: &ConfigSnapshot) -> String {
    snapshot
        .agent
        .get("persona")
        .cloned()
        .unwrap_or_else(|| DEFAULT_PERSONA.to_string())
}

/// System prompt for the optimized single-call flow.
pub fn optimized_system(snapshot: &ConfigSnapshot, context: &str, history: &str) -> String {
    let mut prompt = persona(snapshot);
    prompt.push_str(
        "\n\nReglas:\n\
         - Responde solo con información del contexto; si no la tienes, dilo y ofrece averiguar.\n\
         - No inventes precios ni direcciones.\n\
         - Máximo tres frases por respuesta.\n",
    );
    if !context.is_empty() {
        prompt.push_str("\nContexto del negocio:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    if !history.is_empty() {
        prompt.push_str("\nConversación reciente:\n");
        prompt.push_str(history);
        prompt.push('\n');
    }
    prompt
}

/// System prompt for the legacy analyzer step.
pub fn analyzer_system() -> String {
    "Analiza el mensaje del cliente de una cafetería/panadería. Clasifica la \
     intención, el nivel de frustración (0-5), si el cliente está repitiendo \
     la misma pregunta (loop), la estrategia de respuesta y qué datos hacen \
     falta (branch_info, product_info, promo_info, order_info, faq)."
        .to_string()
}

/// System prompt for the legacy generator step, enriched with analyzer
/// hints and retrieved data.
pub fn generator_system(
    snapshot: &ConfigSnapshot,
    analysis: &MessageAnalysis,
    retrieved: &str,
    history: &str,
    revision_instructions: Option<&str>,
) -> String {
    let mut prompt = persona(snapshot);
    prompt.push_str(&format!(
        "\n\nAnálisis del mensaje: intención={}, frustración={}/5, estrategia={}.\n",
        analysis.intent, analysis.frustration_level, analysis.strategy
    ));
    if analysis.loop_detected {
        prompt.push_str(
            "El cliente está repitiendo su pregunta: responde distinto esta vez y \
             ofrece pasar con una persona.\n",
        );
    }
    if !retrieved.is_empty() {
        prompt.push_str("\nInformación disponible:\n");
        prompt.push_str(retrieved);
        prompt.push('\n');
    }
    if !history.is_empty() {
        prompt.push_str("\nConversación reciente:\n");
        prompt.push_str(history);
        prompt.push('\n');
    }
    if let Some(instructions) = revision_instructions {
        prompt.push_str("\nCorrige tu borrador anterior siguiendo estas instrucciones:\n");
        prompt.push_str(instructions);
        prompt.push('\n');
    }
    prompt
}

/// System prompt for the legacy validator step.
pub fn validator_system() -> String {
    "Eres el supervisor de calidad. Evalúa la respuesta propuesta para el \
     cliente: veredicto approve, reject o needs_revision. Rechaza respuestas \
     con datos inventados; pide revisión cuando el tono o el formato fallen."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_persona_from_snapshot_wins() {
        let mut snap = ConfigSnapshot::empty(1, false);
        snap.agent
            .insert("persona".to_string(), "Eres Paquita, panadera.".to_string());
        let prompt = optimized_system(&snap, "", "");
        assert!(prompt.starts_with("Eres Paquita"));
    }

    #[test]
    fn empty_blocks_are_omitted() {
        let snap = ConfigSnapshot::empty(1, false);
        let prompt = optimized_system(&snap, "", "");
        assert!(!prompt.contains("Contexto del negocio"));
        assert!(!prompt.contains("Conversación reciente"));
    }
}
