//! Prompts for flashcard generation.
//!
//! Every prompt lives here so the wording can change without touching retry,
//! cleaning or validation code, and so tests can inspect prompts without a
//! live model. Callers may replace the preamble via
//! [`crate::config::PipelineConfig::system_prompt`]; the response-format block
//! is always appended because the validator depends on it.

/// Default instructions for turning a PDF batch into flashcards.
///
/// `{language}` is substituted before use.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a flashcard generation assistant. Create educational flashcards in {language} from the attached PDF content.

Each flashcard should have:
- A clear, concise term
- A comprehensive definition
- A helpful hint (optional)
- An explanation providing additional context
- A key concept that this flashcard relates to
- A difficulty score from 1-100 where:
  1-20: Basic facts and definitions
  21-40: Simple understanding required
  41-60: Moderate complexity
  61-80: Complex topics
  81-100: Advanced concepts

Focus on the most important concepts and ensure each flashcard is unique and valuable for learning."#;

/// Build the full prompt for one batch.
///
/// The response-format block pins `source`, `page` and `language` so the
/// model's output passes validation even before the generation client
/// overwrites those fields.
pub fn batch_prompt(
    preamble: Option<&str>,
    language: &str,
    filename: &str,
    page_numbers: &[usize],
) -> String {
    let preamble = preamble
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
        .replace("{language}", language);
    let pages = page_numbers
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let first_page = page_numbers.first().copied().unwrap_or(1);

    format!(
        r#"{preamble}

The attached PDF contains pages {pages} of the document "{filename}".

For each flashcard, include:
- source: "{filename}"
- page: The page number as a string (one of: {pages})
- language: "{language}"

Respond with JSON only, in exactly this format:
{{
  "flashcards": [
    {{
      "term": "Example Term",
      "definition": "Example definition",
      "hint": "Optional hint",
      "explanation": "Additional context",
      "keyConcept": "Main topic",
      "difficulty": 50,
      "source": "{filename}",
      "page": "{first_page}",
      "language": "{language}"
    }}
  ]
}}"#
    )
}
