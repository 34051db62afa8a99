//! Reply sanitizer: strips unsolicited channel-switch suggestions.
//!
//! The business rule is that the assistant may not volunteer "escríbenos
//! por WhatsApp"-style redirections unless the customer brought the channel
//! up first or a human handoff was signalled. The blocked channel list is
//! configuration, not code.

/// Remove sentences that mention a blocked channel, unless the user raised
/// that channel themselves or `handoff` is set.
pub fn sanitize_channel_hints(
    reply: &str,
    user_message: &str,
    handoff: bool,
    blocked: &[String],
) -> String {
    if handoff || blocked.is_empty() {
        return reply.to_string();
    }

    let user_lower = user_message.to_lowercase();
    let active: Vec<String> = blocked
        .iter()
        .map(|b| b.to_lowercase())
        .filter(|b| !user_lower.contains(b.as_str()))
        .collect();
    if active.is_empty() {
        return reply.to_string();
    }

    let kept: Vec<&str> = split_sentences(reply)
        .into_iter()
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            !active.iter().any(|b| lower.contains(b.as_str()))
        })
        .collect();

    let cleaned = kept.join(" ").trim().to_string();
    if cleaned.is_empty() {
        // Everything mentioned the channel; better the original than nothing.
        reply.to_string()
    } else {
        cleaned
    }
}

/// Split into sentences keeping their terminators.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            let end = i + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked() -> Vec<String> {
        vec!["whatsapp".to_string()]
    }

    #[test]
    fn unsolicited_channel_suggestion_is_removed() {
        let reply = "Sí, tenemos rosca a $350. Escríbenos por WhatsApp para apartar la tuya. ¿Te interesa?";
        let out = sanitize_channel_hints(reply, "¿tienen rosca?", false, &blocked());
        assert!(!out.to_lowercase().contains("whatsapp"));
        assert!(out.contains("$350"));
        assert!(out.contains("¿Te interesa?"));
    }

    #[test]
    fn user_raised_channel_is_kept() {
        let reply = "Claro, por WhatsApp al 55-1234 te atendemos.";
        let out = sanitize_channel_hints(reply, "¿tienen whatsapp?", false, &blocked());
        assert_eq!(out, reply);
    }

    #[test]
    fn handoff_disables_the_filter() {
        let reply = "Te paso con una persona, también puedes escribir por WhatsApp.";
        let out = sanitize_channel_hints(reply, "quiero hablar con alguien", true, &blocked());
        assert_eq!(out, reply);
    }

    #[test]
    fn reply_entirely_about_the_channel_survives() {
        let reply = "Escríbenos por WhatsApp.";
        let out = sanitize_channel_hints(reply, "hola", false, &blocked());
        assert_eq!(out, reply);
    }
}
