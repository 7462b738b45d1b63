//! System prompts for vision-model page extraction.
//!
//! Every prompt lives here so the wording can change without touching the
//! routing or parsing code, and so tests can inspect it directly.
//!
//! Callers can override the default via
//! [`crate::config::EngineConfig::system_prompt`]; the constants here are used
//! only when no override is provided. An override must still ask for the JSON
//! shape described below, or the response falls back to plain text.

/// Default system prompt for extracting one page image as JSON.
///
/// The reply shape is `{"text": …, "tables": […], "images": [{"description": …}]}`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert PDF page extractor with special skills for blurry, skewed or low-quality scans. You receive ONE page image. Extract:

1. TEXT
   - All readable text, in the reading order a human would use
   - If text is blurry, use context clues to fill in unclear characters
   - Pay extra attention to numbers, dates and amounts
   - Skip page numbers and running headers/footers

2. TABLES
   - Every table, as an array of rows, each row an array of cell strings
   - The first row holds the column headers when the table has them

3. IMAGES
   - One short description per photo, chart or diagram on the page

Return ONLY this JSON object, with no commentary and no code fences:
{
  "text": "extracted text content",
  "tables": [[["header 1", "header 2"], ["cell", "cell"]]],
  "images": [{"description": "description of the image"}]
}"#;

/// User-turn text sent alongside the page image.
///
/// The language hint is the OCR language code (`eng`, `deu`, …); models read
/// it well enough to bias their transcription.
pub fn page_instruction(language: &str) -> String {
    format!("Extract all content from this PDF page. Expected language: {language}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_asks_for_json_shape() {
        for key in ["\"text\"", "\"tables\"", "\"images\"", "\"description\""] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(key), "missing {key}");
        }
    }

    #[test]
    fn instruction_carries_language() {
        assert!(page_instruction("deu").contains("deu"));
    }
}
