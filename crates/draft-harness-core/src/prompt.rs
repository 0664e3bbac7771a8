//! Prompt assembly with a character budget.
//!
//! A generation prompt is built from up to four preamble blocks, the
//! writing guidelines, and three parallel views over the same items:
//!
//! | View | Marker | Content |
//! |------|--------|---------|
//! | Timeline | `[TIMELINE]` | one block per item, chronological |
//! | Themes | `[THEMES]` | item ids grouped by theme, first-seen order |
//! | Evidence | `[EVIDENCE INPUT]` | one citation line per item |
//!
//! When the full rendering exceeds the configured character budget, the
//! three views are replaced by a single `[COMPACT EVIDENCE INPUT]` view
//! with bodies cut to [`COMPACT_BODY_CHARS`]. There is no further
//! degradation: an oversized compact prompt is returned as-is.

use serde::Serialize;

use crate::clarify::ClarificationAnswer;
use crate::models::ContentItem;
use crate::theme::Theme;

/// Default prompt budget, in characters.
pub const DEFAULT_PROMPT_MAX_CHARS: usize = 32_000;

/// Body characters kept per item in compact mode.
pub const COMPACT_BODY_CHARS: usize = 240;

/// Items listed in the clarification preflight prompt.
pub const PREFLIGHT_MAX_ITEMS: usize = 40;

pub const EVIDENCE_MARKER: &str = "[EVIDENCE INPUT]";
pub const COMPACT_EVIDENCE_MARKER: &str = "[COMPACT EVIDENCE INPUT]";
pub const CLARIFICATION_INPUT_MARKER: &str = "[USER CLARIFICATION INPUT]";
pub const ALREADY_ANSWERED_MARKER: &str = "[ALREADY ANSWERED]";

/// Injected when the clarification turn limit forces generation.
pub const FORCED_NOTICE: &str = "[CLARIFICATION LIMIT]\n\
확인 질문 한도 도달: 더 이상 질문하지 말고, 지금까지의 답변과 기본값만으로 초안을 완성하세요.";

/// Section headings every draft must contain, in order.
pub const REQUIRED_SECTIONS: [&str; 5] = [
    "Executive Summary",
    "Timeline Review",
    "Thematic Insights",
    "Decisions & Trade-offs",
    "Next Iteration Plan",
];

/// Everything the assembler needs for one generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub session_title: &'a str,
    pub tone: &'a str,
    pub format: &'a str,
    /// Pre-sorted by `occurred_at` ascending, then insertion order.
    pub items: &'a [ContentItem],
    pub user_instruction: Option<&'a str>,
    /// Previous draft to edit instead of writing from scratch.
    pub refine_body: Option<&'a str>,
    pub answers: &'a [ClarificationAnswer],
    /// Whether the clarification limit forced this generation.
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Full,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    pub mode: PromptMode,
}

impl BuiltPrompt {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Renders prompts under a fixed character budget.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    max_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_MAX_CHARS)
    }
}

impl PromptBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Build the generation prompt, falling back to compact mode when the
    /// full rendering is over budget.
    pub fn build(&self, req: &PromptRequest<'_>) -> BuiltPrompt {
        let preamble = render_preamble(req);
        let guidelines = render_guidelines(req);

        let timeline = render_timeline(req.items);
        let themes = render_themes(req.items);
        let evidence = render_evidence(req.items);
        let full = join_blocks(&[&preamble, &guidelines, &timeline, &themes, &evidence]);
        if full.chars().count() <= self.max_chars {
            return BuiltPrompt {
                text: full,
                mode: PromptMode::Full,
            };
        }

        let compact_view = render_compact(req.items);
        let compact = join_blocks(&[&preamble, &guidelines, &compact_view]);
        BuiltPrompt {
            text: compact,
            mode: PromptMode::Compact,
        }
    }
}

fn join_blocks(blocks: &[&String]) -> String {
    blocks
        .iter()
        .filter(|b| !b.is_empty())
        .map(|b| b.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn citation_id(index: usize) -> String {
    format!("C{}", index + 1)
}

fn origin(item: &ContentItem) -> String {
    format!("{}/{}/{}", item.source_name, item.source_type, item.kind)
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn render_preamble(req: &PromptRequest<'_>) -> String {
    let mut blocks = Vec::new();

    if let Some(previous) = req.refine_body {
        blocks.push(format!(
            "[REFINE MODE]\n\
             Revise the previous draft below instead of writing a new one. \
             Keep what the evidence still supports and do not invent facts it does not contain.\n\
             --- PREVIOUS DRAFT ---\n{}\n--- END PREVIOUS DRAFT ---",
            previous
        ));
    }

    if let Some(instruction) = req.user_instruction.map(str::trim).filter(|s| !s.is_empty()) {
        blocks.push(format!("[USER INSTRUCTION]\n{}", instruction));
    }

    if !req.answers.is_empty() {
        blocks.push(render_answers(
            CLARIFICATION_INPUT_MARKER,
            "The user answered these questions before generation. Treat the answers as authoritative context.",
            req.answers,
        ));
    }

    if req.forced {
        blocks.push(FORCED_NOTICE.to_string());
    }

    blocks.join("\n\n")
}

fn render_answers(marker: &str, lead: &str, answers: &[ClarificationAnswer]) -> String {
    let mut out = format!("{}\n{}", marker, lead);
    for answer in answers {
        out.push_str(&format!(
            "\n- Q ({}): {}\n  A: {}",
            answer.question_id, answer.question, answer.answer
        ));
    }
    out
}

fn render_guidelines(req: &PromptRequest<'_>) -> String {
    let mut out = String::from("[WRITING GUIDELINES]\n");
    out.push_str("You are writing an engineering retrospective blog post from the activity log below.\n");
    out.push_str(&format!("Session: {}\n", req.session_title));
    out.push_str(&format!("Tone: {}\n", req.tone));
    out.push_str(&format!("Format: {}\n", req.format));
    out.push_str("Rules:\n");
    out.push_str("- Write Markdown and start with a single `# ` title line.\n");
    out.push_str("- Cite the evidence id inline for every factual claim, e.g. [C3].\n");
    out.push_str("- Use only the evidence below and say so when something is unknown.\n");
    out.push_str("- Keep the timeline chronological; group related work by theme elsewhere.\n");
    out.push_str("Required output sections, in this order:");
    for (i, section) in REQUIRED_SECTIONS.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, section));
    }
    out
}

fn render_timeline(items: &[ContentItem]) -> String {
    if items.is_empty() {
        return "[TIMELINE]\n(no items)".to_string();
    }
    let blocks: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{} | {} | {} | {}\nTitle: {}\n{}",
                citation_id(i),
                item.month_bucket,
                item.occurred_at,
                origin(item),
                item.title,
                item.body
            )
        })
        .collect();
    format!("[TIMELINE]\n{}", blocks.join("\n\n"))
}

fn render_themes(items: &[ContentItem]) -> String {
    let mut groups: Vec<(Theme, Vec<String>)> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let line = format!("- {} {}", citation_id(i), item.title);
        match groups.iter_mut().find(|(theme, _)| *theme == item.theme) {
            Some((_, lines)) => lines.push(line),
            None => groups.push((item.theme, vec![line])),
        }
    }

    if groups.is_empty() {
        return "[THEMES]\n(no items)".to_string();
    }
    let sections: Vec<String> = groups
        .into_iter()
        .map(|(theme, lines)| format!("## {}\n{}", theme, lines.join("\n")))
        .collect();
    format!("[THEMES]\n{}", sections.join("\n\n"))
}

fn render_evidence(items: &[ContentItem]) -> String {
    let mut out = String::from(EVIDENCE_MARKER);
    if items.is_empty() {
        out.push_str("\n(no items)");
    }
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "\n{} | {} | {} | {} | {}",
            citation_id(i),
            item.source_name,
            item.author,
            item.occurred_at,
            item.evidence
        ));
    }
    out
}

fn render_compact(items: &[ContentItem]) -> String {
    let mut out = format!(
        "{}\n(compressed: bodies truncated to {} chars)",
        COMPACT_EVIDENCE_MARKER, COMPACT_BODY_CHARS
    );
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "\n{} | {} | {} | {} | {}\n{}",
            citation_id(i),
            item.month_bucket,
            item.theme,
            origin(item),
            item.title,
            truncate_chars(&item.body, COMPACT_BODY_CHARS)
        ));
    }
    out
}

/// Build the small "should I ask clarifying questions?" prompt sent to an
/// agent's structured clarification channel.
pub fn build_preflight_prompt(
    session_title: &str,
    tone: &str,
    format: &str,
    items: &[ContentItem],
    answers: &[ClarificationAnswer],
) -> String {
    let mut out = String::from("[CLARIFICATION PREFLIGHT]\n");
    out.push_str(&format!(
        "Before drafting a blog post for the session \"{}\", decide whether you must ask the user clarifying questions. \
         Ask only when the evidence or the requested style is too ambiguous to write a grounded draft.\n",
        session_title
    ));
    out.push_str(&format!("Tone: {}\nFormat: {}\n", tone, format));
    out.push_str(&format!(
        "Items ({} total, showing up to {}):",
        items.len(),
        PREFLIGHT_MAX_ITEMS
    ));
    for (i, item) in items.iter().take(PREFLIGHT_MAX_ITEMS).enumerate() {
        out.push_str(&format!(
            "\n{} | {} | {} | {}",
            citation_id(i),
            item.theme,
            item.kind,
            item.title
        ));
    }

    if !answers.is_empty() {
        out.push_str("\n\n");
        out.push_str(&render_answers(
            ALREADY_ANSWERED_MARKER,
            "Do not ask again about anything listed here.",
            answers,
        ));
    }

    out.push_str(
        "\n\nReply with JSON only, no prose:\n\
         {\"requiresClarification\": boolean, \"message\": string, \
         \"questions\": [{\"question\": string, \"rationale\": string}]}",
    );
    out
}
