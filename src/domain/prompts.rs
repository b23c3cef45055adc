//! Prompt templates for post-conversation LLM jobs
//!
//! Provides default prompt templates for title/summary generation and
//! memory fact extraction.

/// Default prompt templates
pub struct PromptTemplates;

impl PromptTemplates {
    /// Get default prompt for title generation
    pub fn title() -> &'static str {
        r#"You are naming a recorded conversation. Read the transcript and produce a short, specific title.

Conversation Transcript:
{transcript}

Respond with the title only, at most 8 words, no quotes and no trailing punctuation."#
    }

    /// Get default prompt for the short summary
    pub fn summary() -> &'static str {
        r#"You are an expert conversation summarizer. Analyze the following transcript and create a concise summary.

Conversation Transcript:
{transcript}

Create a clear summary in 2-3 sentences covering what was discussed and any outcome. Respond with the summary only."#
    }

    /// Get default prompt for the detailed summary
    pub fn detailed_summary() -> &'static str {
        r#"You are an expert conversation summarizer. Analyze the following transcript and create a detailed summary.

Conversation Transcript:
{transcript}

Write a detailed summary covering:
- Main topics discussed, in order
- Key decisions or conclusions
- Open questions or follow-ups

Format your response as a bulleted list with each point starting with "- "."#
    }

    /// Get default prompt for memory fact extraction
    pub fn memory_facts() -> &'static str {
        r#"You are building a long-term memory for the owner of this recording. Analyze the following conversation transcript and extract durable facts worth remembering about people, preferences, plans and commitments.

Conversation Transcript:
{transcript}

Extract only facts that will still matter after this conversation. Skip small talk and restatements. Format each fact on a separate line starting with "- ". If there is nothing worth remembering, respond with "none"."#
    }

    /// Fill a template with the transcript text
    pub fn render(template: &str, transcript: &str) -> String {
        template.replace("{transcript}", transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_have_placeholder() {
        for template in [
            PromptTemplates::title(),
            PromptTemplates::summary(),
            PromptTemplates::detailed_summary(),
            PromptTemplates::memory_facts(),
        ] {
            assert!(template.contains("{transcript}"));
        }
    }

    #[test]
    fn test_render() {
        let rendered = PromptTemplates::render(PromptTemplates::summary(), "hello world");
        assert!(rendered.contains("hello world"));
        assert!(!rendered.contains("{transcript}"));
    }
}
