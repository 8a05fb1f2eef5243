//! Outgoing-content policy checks.
//!
//! Pure string predicates over generated text, run before anything is
//! sent. Rules run in a fixed order and the first failure wins: length,
//! forbidden topics, identity tokens, disclosure tokens, pet-name
//! requirement. Matching is case-insensitive substring matching.

/// Why a piece of generated text was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("message too short ({len} chars, minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("message too long ({len} chars, maximum {max})")]
    TooLong { len: usize, max: usize },

    #[error("mentions forbidden topic '{token}'")]
    ForbiddenTopic { token: String },

    #[error("leaks identifying token '{token}'")]
    IdentityLeak { token: String },

    #[error("contains disclosure token '{token}'")]
    DisclosureToken { token: String },

    #[error("no approved pet name present")]
    MissingPetName,
}

/// Phrase policy for outgoing content. Token lists are matched lowercase
/// against the lowercased candidate text.
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    pub min_length: usize,
    pub max_length: usize,
    /// Messages at or under this many chars skip the pet-name rule, so
    /// minimal acknowledgements get through.
    pub pet_name_exempt_length: usize,
    pub forbidden_topics: Vec<String>,
    /// The contact's real name and other identifying tokens. Allowed only
    /// when the occurrence sits inside an approved pet-name phrase.
    pub identity_tokens: Vec<String>,
    pub disclosure_tokens: Vec<String>,
    pub pet_names: Vec<String>,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 300,
            pet_name_exempt_length: 10,
            forbidden_topics: to_strings(&["niños", "niñas", "hijos", "dinero", "préstamo"]),
            identity_tokens: Vec::new(),
            disclosure_tokens: to_strings(&[
                "bot",
                "automated",
                "automatizado",
                "inteligencia artificial",
                "asistente virtual",
            ]),
            pet_names: to_strings(&[
                "mi amor",
                "amor",
                "cariño",
                "mi vida",
                "corazón",
                "preciosa",
                "mi reina",
            ]),
        }
    }
}

impl ContentPolicy {
    /// Check `text` against every rule in order.
    pub fn validate(&self, text: &str) -> Result<(), Rejection> {
        let length = text.chars().count();
        if length < self.min_length {
            return Err(Rejection::TooShort {
                len: length,
                min: self.min_length,
            });
        }
        if length > self.max_length {
            return Err(Rejection::TooLong {
                len: length,
                max: self.max_length,
            });
        }

        let lowered = text.to_lowercase();

        if let Some(token) = first_hit(&lowered, &self.forbidden_topics) {
            return Err(Rejection::ForbiddenTopic { token });
        }

        let pet_spans = match_spans(&lowered, &self.pet_names);
        for token in &self.identity_tokens {
            let token_lower = token.to_lowercase();
            for (start, matched) in lowered.match_indices(token_lower.as_str()) {
                let end = start + matched.len();
                let exempt = pet_spans.iter().any(|(s, e)| *s <= start && end <= *e);
                if !exempt {
                    return Err(Rejection::IdentityLeak {
                        token: token.clone(),
                    });
                }
            }
        }

        if let Some(token) = first_hit(&lowered, &self.disclosure_tokens) {
            return Err(Rejection::DisclosureToken { token });
        }

        if length > self.pet_name_exempt_length && pet_spans.is_empty() {
            return Err(Rejection::MissingPetName);
        }

        Ok(())
    }
}

fn to_strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn first_hit(lowered: &str, tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .find(|token| lowered.contains(token.to_lowercase().as_str()))
        .cloned()
}

/// Byte spans of every pet-name occurrence in the lowered text.
fn match_spans(lowered: &str, phrases: &[String]) -> Vec<(usize, usize)> {
    phrases
        .iter()
        .flat_map(|phrase| {
            let phrase = phrase.to_lowercase();
            lowered
                .match_indices(phrase.as_str())
                .map(|(start, matched)| (start, start + matched.len()))
                .collect::<Vec<_>>()
        })
        .collect()
}
