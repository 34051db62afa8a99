//! Text normalization and stable content hashing.
//!
//! Two normal forms exist on purpose. `normalize_for_embedding` keeps the
//! text readable for the embeddings API (lowercase, whitespace collapsed,
//! length capped). `canonical_form` additionally strips diacritics and
//! collapses punctuation so that "¿Tienen Rosca?" and "tienen rosca"
//! hash to the same document key.

/// Maximum characters sent to the embeddings provider per input.
pub const MAX_EMBED_CHARS: usize = 8_000;

/// Lowercase, collapse runs of whitespace, cap to [`MAX_EMBED_CHARS`].
pub fn normalize_for_embedding(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_EMBED_CHARS));
    let mut last_was_space = true;
    for ch in text.chars() {
        if out.len() >= MAX_EMBED_CHARS {
            break;
        }
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Canonical form for content identity: lowercase, diacritics stripped,
/// punctuation collapsed to single spaces.
pub fn canonical_form(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for raw in text.chars() {
        let ch = fold_diacritic(raw).unwrap_or(raw);
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            // punctuation and whitespace both become a single separator
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Map accented Latin characters onto their base letter. Covers the Spanish
/// and Portuguese ranges the platform actually sees.
fn fold_diacritic(ch: char) -> Option<char> {
    match ch {
        'á' | 'à' | 'ä' | 'â' | 'ã' | 'Á' | 'À' | 'Ä' | 'Â' | 'Ã' => Some('a'),
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => Some('e'),
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => Some('i'),
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' | 'Ó' | 'Ò' | 'Ö' | 'Ô' | 'Õ' => Some('o'),
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => Some('u'),
        'ñ' | 'Ñ' => Some('n'),
        'ç' | 'Ç' => Some('c'),
        _ => None,
    }
}

/// FNV-1a 64-bit hash over the canonical form. Stable across runs and
/// platforms, which `DefaultHasher` does not guarantee.
pub fn content_hash(text: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let canonical = canonical_form(text);
    let mut hash = FNV_OFFSET;
    for byte in canonical.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hex rendering of [`content_hash`], used as the `content_hash` column.
pub fn content_hash_hex(text: &str) -> String {
    format!("{:016x}", content_hash(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_normalization_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_for_embedding("  Hola   MUNDO \n\t nuevo "),
            "hola mundo nuevo"
        );
    }

    #[test]
    fn embedding_normalization_caps_length() {
        let long = "a".repeat(20_000);
        assert_eq!(normalize_for_embedding(&long).len(), MAX_EMBED_CHARS);
    }

    #[test]
    fn canonical_form_strips_accents_and_punctuation() {
        assert_eq!(canonical_form("¿Tienen Rosca?"), "tienen rosca");
        assert_eq!(canonical_form("café, por favor!!"), "cafe por favor");
        assert_eq!(canonical_form("Año nuevo"), "ano nuevo");
    }

    #[test]
    fn equivalent_texts_coalesce_to_one_hash() {
        assert_eq!(content_hash("¿Tienen rosca?"), content_hash("tienen rosca"));
        assert_ne!(content_hash("tienen rosca"), content_hash("tienen concha"));
    }

    #[test]
    fn hash_is_stable() {
        // Pinned value: a change here silently orphans every stored document.
        assert_eq!(content_hash_hex(""), format!("{:016x}", 0xcbf2_9ce4_8422_2325u64));
    }
}
