//! Knowledge base loading
//!
//! The knowledge file is plain UTF-8 text that gets injected into the system
//! prompt. It is read once when a driver is built, capped to a character
//! budget, and replaced by a generic instruction when the file is missing.

use sdk::errors::EngineError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Text installed when the knowledge file does not exist
pub const FALLBACK_CONTEXT: &str = "No specific context provided.";

/// Appended after the kept characters when the file exceeds the budget
pub const TRUNCATION_MARKER: &str = "\n[... knowledge base truncated ...]";

/// Where the knowledge text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeSource {
    /// Read from this file
    File(PathBuf),

    /// Provided in memory
    Inline,

    /// File was missing; [`FALLBACK_CONTEXT`] is used
    Fallback,
}

/// Knowledge text, loaded once and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeContext {
    text: String,
    source: KnowledgeSource,
    truncated: bool,
}

impl KnowledgeContext {
    /// Build a context from in-memory text, applying the same budget as [`load`]
    pub fn from_text(text: impl Into<String>, max_chars: usize) -> Self {
        let (text, truncated) = cap_chars(text.into(), max_chars);
        Self {
            text,
            source: KnowledgeSource::Inline,
            truncated,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> &KnowledgeSource {
        &self.source
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_fallback(&self) -> bool {
        self.source == KnowledgeSource::Fallback
    }
}

/// Load the knowledge file at `path`, keeping at most `max_chars` characters.
///
/// A missing file is not an error: the returned context holds
/// [`FALLBACK_CONTEXT`]. Content longer than the budget is cut to exactly
/// `max_chars` characters followed by [`TRUNCATION_MARKER`].
///
/// # Errors
/// Any other read failure (permissions, invalid UTF-8) is returned as
/// `EngineError::Io`.
pub fn load(path: &Path, max_chars: usize) -> Result<KnowledgeContext, EngineError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(
                "Knowledge file '{}' not found, using generic mode",
                path.display()
            );
            return Ok(KnowledgeContext {
                text: FALLBACK_CONTEXT.to_string(),
                source: KnowledgeSource::Fallback,
                truncated: false,
            });
        }
        Err(e) => return Err(EngineError::Io(e)),
    };

    let original_chars = raw.chars().count();
    let (text, truncated) = cap_chars(raw, max_chars);

    if truncated {
        tracing::info!(
            "Knowledge file '{}' truncated from {} to {} characters",
            path.display(),
            original_chars,
            max_chars
        );
    } else {
        tracing::info!(
            "Knowledge file '{}' loaded ({} characters)",
            path.display(),
            original_chars
        );
    }

    Ok(KnowledgeContext {
        text,
        source: KnowledgeSource::File(path.to_path_buf()),
        truncated,
    })
}

/// Keep the first `max_chars` characters, marking the cut.
fn cap_chars(mut text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            text.truncate(byte_idx);
            text.push_str(TRUNCATION_MARKER);
            (text, true)
        }
        None => (text, false),
    }
}

/// Render the system prompt around the knowledge text.
pub fn system_prompt(
    assistant_name: &str,
    institution: Option<&str>,
    knowledge: &KnowledgeContext,
) -> String {
    let identity = match institution {
        Some(institution) if !institution.trim().is_empty() => format!(
            "You are {}, an academic assistant at {}.",
            assistant_name,
            institution.trim()
        ),
        _ => format!("You are {}, an academic assistant.", assistant_name),
    };

    format!(
        "{identity}
Your role is to help students learn, review and apply academic content,
based exclusively on the information in the knowledge base below.

Rules:
- Explain clearly, didactically and in an organized way.
- Use examples and analogies when they help.
- Answer only about topics present in the knowledge base.
- If a question is out of scope, say so and suggest reliable sources.
- If you are not sure, ask for more information.
- Keep a formal, cordial and instructive tone.

--- KNOWLEDGE BASE ---
{knowledge}
--- END OF KNOWLEDGE BASE ---",
        identity = identity,
        knowledge = knowledge.text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = load(&dir.path().join("absent.txt"), 100).unwrap();

        assert_eq!(ctx.text(), FALLBACK_CONTEXT);
        assert!(ctx.is_fallback());
        assert!(!ctx.is_truncated());
    }

    #[test]
    fn test_short_file_kept_verbatim() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Mitochondria produce ATP.").unwrap();

        let ctx = load(file.path(), 100).unwrap();
        assert_eq!(ctx.text(), "Mitochondria produce ATP.");
        assert_eq!(ctx.source(), &KnowledgeSource::File(file.path().to_path_buf()));
        assert!(!ctx.is_truncated());
    }

    #[test]
    fn test_long_file_truncated_on_char_boundary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "ação é ótima").unwrap();

        let ctx = load(file.path(), 4).unwrap();
        assert_eq!(ctx.text(), format!("ação{}", TRUNCATION_MARKER));
        assert!(ctx.is_truncated());
    }

    #[test]
    fn test_exact_budget_not_truncated() {
        let ctx = KnowledgeContext::from_text("abcd", 4);
        assert_eq!(ctx.text(), "abcd");
        assert!(!ctx.is_truncated());
    }

    #[test]
    fn test_in_memory_text_is_not_fallback() {
        let ctx = KnowledgeContext::from_text("Enrollment closes in March.", 100);
        assert_eq!(ctx.source(), &KnowledgeSource::Inline);
        assert!(!ctx.is_fallback());
    }

    #[test]
    fn test_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path(), 10), Err(EngineError::Io(_))));
    }

    #[test]
    fn test_system_prompt_embeds_knowledge() {
        let ctx = KnowledgeContext::from_text("Course calendar: exams in June.", 1000);
        let prompt = system_prompt("UniHelp", Some("State University"), &ctx);

        assert!(prompt.starts_with("You are UniHelp, an academic assistant at State University."));
        assert!(prompt.contains("--- KNOWLEDGE BASE ---\nCourse calendar: exams in June.\n--- END"));
    }

    #[test]
    fn test_system_prompt_without_institution() {
        let ctx = KnowledgeContext::from_text(FALLBACK_CONTEXT, 1000);
        let prompt = system_prompt("UniHelp", Some("  "), &ctx);
        assert!(prompt.starts_with("You are UniHelp, an academic assistant.\n"));
    }
}
