//! Clarification state machine.
//!
//! Before generating, Draft Harness decides whether the input is good
//! enough to draft from. Each generation attempt ends in one of three
//! states:
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Sufficient` | generate now |
//! | `NeedsClarification` | return questions, do not generate |
//! | `Forced` | turn limit reached: generate with a forced-continue notice |
//!
//! The conversation state (turn counter and accumulated answers) lives in
//! [`ClarificationContext`], a value object whose constructors and
//! transitions keep `1 <= turn <= max_turns`. Callers receive the next
//! context inside every [`ClarificationResponse`] and send it back, with
//! answers recorded, on the following call.
//!
//! Decisions are split in two steps. [`ClarificationEngine::evaluate`]
//! applies local heuristics and either decides or returns
//! [`Preflight::Delegate`]; the caller then asks the agent and hands its
//! raw reply to [`ClarificationEngine::decide_from_agent_reply`].

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{ContentItem, DEFAULT_FORMAT, DEFAULT_TONE};

pub const DEFAULT_MAX_TURNS: u32 = 3;
pub const DEFAULT_MIN_ITEMS: usize = 3;

const STYLE_TONE_QUESTION: &str =
    "이번 글은 어떤 톤으로 작성할까요? (예: 담백한 회고, 친근한 설명체, 공식 문서체)";
const STYLE_FORMAT_QUESTION: &str =
    "어떤 형식의 글을 원하시나요? (예: 기술 블로그, 주간 회고, 릴리스 노트)";
const THIN_EVIDENCE_QUESTION: &str =
    "수집된 근거가 적습니다. 글에서 꼭 다뤄야 할 작업이나 배경 맥락을 알려주세요.";
const HOMOGENEOUS_EVIDENCE_QUESTION: &str =
    "근거가 모두 같은 종류와 주제에 몰려 있습니다. 이 작업이 왜 중요했고 어떤 결과를 얻었는지 알려주세요.";

/// One answered clarification question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationAnswer {
    pub question_id: String,
    pub question: String,
    pub answer: String,
}

/// Turn counter plus accumulated answers for one clarification chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ContextParts")]
pub struct ClarificationContext {
    turn: u32,
    max_turns: u32,
    answers: Vec<ClarificationAnswer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextParts {
    turn: u32,
    #[serde(default = "default_max_turns")]
    max_turns: u32,
    #[serde(default)]
    answers: Vec<ClarificationAnswer>,
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

impl TryFrom<ContextParts> for ClarificationContext {
    type Error = anyhow::Error;

    fn try_from(parts: ContextParts) -> Result<Self> {
        ClarificationContext::from_parts(parts.turn, parts.max_turns, parts.answers)
    }
}

impl ClarificationContext {
    /// First turn of a fresh chain.
    pub fn start(max_turns: u32) -> Self {
        Self {
            turn: 1,
            max_turns: max_turns.max(1),
            answers: Vec::new(),
        }
    }

    /// Rebuild a context from caller-supplied values.
    ///
    /// `turn` above `max_turns` is clamped; zero values are rejected.
    pub fn from_parts(turn: u32, max_turns: u32, answers: Vec<ClarificationAnswer>) -> Result<Self> {
        if turn == 0 {
            bail!("clarification turn must be >= 1");
        }
        if max_turns == 0 {
            bail!("clarification maxTurns must be >= 1");
        }
        Ok(Self {
            turn: turn.min(max_turns),
            max_turns,
            answers,
        })
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn answers(&self) -> &[ClarificationAnswer] {
        &self.answers
    }

    /// No more questions may be asked once the limit is reached.
    pub fn is_exhausted(&self) -> bool {
        self.turn >= self.max_turns
    }

    /// Context for the following call: one turn later, capped at the limit.
    pub fn next_turn(&self) -> Self {
        Self {
            turn: (self.turn + 1).min(self.max_turns),
            max_turns: self.max_turns,
            answers: self.answers.clone(),
        }
    }

    /// Apply the configured turn limit, which always wins over the caller's.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self.turn = self.turn.min(self.max_turns);
        self
    }

    /// Record an answer, replacing an earlier answer to the same question id.
    pub fn record_answer(&mut self, answer: ClarificationAnswer) {
        match self
            .answers
            .iter_mut()
            .find(|a| a.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
    }

    /// Whether a question with this text already has a non-empty answer.
    pub fn is_answered(&self, question: &str) -> bool {
        let question = question.trim();
        self.answers
            .iter()
            .any(|a| a.question.trim() == question && !a.answer.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyingQuestion {
    pub id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingField {
    pub field: String,
}

/// Tone/format the generation will use if the caller does not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDefaults {
    pub tone: String,
    pub format: String,
}

impl StyleDefaults {
    /// Pick the first set value of request → session → built-in default.
    pub fn resolve(
        request_tone: Option<&str>,
        session_tone: Option<&str>,
        request_format: Option<&str>,
        session_format: Option<&str>,
    ) -> Self {
        let pick = |a: Option<&str>, b: Option<&str>, fallback: &str| {
            [a, b]
                .into_iter()
                .flatten()
                .map(str::trim)
                .find(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        Self {
            tone: pick(request_tone, session_tone, DEFAULT_TONE),
            format: pick(request_format, session_format, DEFAULT_FORMAT),
        }
    }
}

/// Terminal response for a call that needs answers before generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationResponse {
    pub requires_clarification: bool,
    pub message: String,
    pub clarifying_questions: Vec<ClarifyingQuestion>,
    pub missing: Vec<MissingField>,
    pub defaults: StyleDefaults,
    /// The context to send back on the next call (already advanced).
    pub context: ClarificationContext,
}

impl ClarificationResponse {
    /// Record `(question id, answer)` pairs and return the context for the
    /// next call. Unknown ids are rejected; blank answers are skipped.
    pub fn answer(&self, replies: &[(String, String)]) -> Result<ClarificationContext> {
        let mut context = self.context.clone();
        for (id, text) in replies {
            let Some(question) = self.clarifying_questions.iter().find(|q| &q.id == id) else {
                bail!("unknown clarification question id: {}", id);
            };
            if text.trim().is_empty() {
                continue;
            }
            context.record_answer(ClarificationAnswer {
                question_id: question.id.clone(),
                question: question.question.clone(),
                answer: text.clone(),
            });
        }
        Ok(context)
    }
}

/// Final clarification decision for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarificationDecision {
    Sufficient,
    Forced,
    NeedsClarification(ClarificationResponse),
}

/// Outcome of the local heuristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    Decided(ClarificationDecision),
    /// Heuristics are satisfied; ask the agent's structured channel.
    Delegate,
}

/// Inputs to the local heuristics.
#[derive(Debug, Clone, Copy)]
pub struct PreflightInput<'a> {
    pub skip_preflight: bool,
    pub context: &'a ClarificationContext,
    /// Tone set on the request or the session.
    pub tone_set: bool,
    /// Format set on the request or the session.
    pub format_set: bool,
    pub items: &'a [ContentItem],
    pub agent_supports_clarification: bool,
    pub defaults: &'a StyleDefaults,
}

/// Structured reply from an agent's clarification channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentClarificationReply {
    pub requires_clarification: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub questions: Vec<AgentQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentQuestion {
    pub question: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Parse an agent reply, tolerating code fences and surrounding prose.
///
/// Anything that does not contain a JSON object of the expected shape
/// yields `None`, which callers treat as "no clarification requested".
pub fn parse_agent_reply(text: &str) -> Option<AgentClarificationReply> {
    let trimmed = text.trim();
    if let Ok(reply) = serde_json::from_str(trimmed) {
        return Some(reply);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Question id in the local scheme: `agent-q-<turn>-<n>`, `n` from 1.
pub fn question_id(turn: u32, n: usize) -> String {
    format!("agent-q-{}-{}", turn, n)
}

/// Heuristic thresholds for the clarification preflight.
#[derive(Debug, Clone, Copy)]
pub struct ClarificationEngine {
    min_items: usize,
}

impl Default for ClarificationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ITEMS)
    }
}

impl ClarificationEngine {
    pub fn new(min_items: usize) -> Self {
        Self { min_items }
    }

    /// Apply the local rules in priority order.
    pub fn evaluate(&self, input: &PreflightInput<'_>) -> Preflight {
        let context = input.context;

        if input.skip_preflight || context.is_exhausted() {
            let decision = if context.is_exhausted() {
                ClarificationDecision::Forced
            } else {
                ClarificationDecision::Sufficient
            };
            return Preflight::Decided(decision);
        }

        if !input.tone_set && !input.format_set {
            let candidates = [
                (
                    STYLE_TONE_QUESTION,
                    format!(
                        "세션과 요청 모두 톤이 없습니다. 답하지 않으면 '{}'을 사용합니다.",
                        input.defaults.tone
                    ),
                ),
                (
                    STYLE_FORMAT_QUESTION,
                    format!(
                        "세션과 요청 모두 형식이 없습니다. 답하지 않으면 '{}'을 사용합니다.",
                        input.defaults.format
                    ),
                ),
            ];
            let questions = unanswered(context, &candidates);
            if !questions.is_empty() {
                return Preflight::Decided(ClarificationDecision::NeedsClarification(
                    self.response(
                        input,
                        "초안을 만들기 전에 글의 톤과 형식을 확인하고 싶습니다. 답하지 않으면 기본값으로 진행합니다.",
                        questions,
                        &["tone", "format"],
                    ),
                ));
            }
        }

        if let Some(candidate) = self.coverage_question(input.items) {
            let candidates = [candidate];
            let questions = unanswered(context, &candidates);
            if !questions.is_empty() {
                return Preflight::Decided(ClarificationDecision::NeedsClarification(
                    self.response(
                        input,
                        "근거가 충분하지 않아 초안의 품질이 낮을 수 있습니다. 몇 가지 맥락을 알려주세요.",
                        questions,
                        &["evidence"],
                    ),
                ));
            }
        }

        if input.agent_supports_clarification {
            Preflight::Delegate
        } else {
            Preflight::Decided(ClarificationDecision::Sufficient)
        }
    }

    /// Turn the agent's raw structured-channel reply into a decision.
    pub fn decide_from_agent_reply(
        &self,
        input: &PreflightInput<'_>,
        reply: &str,
    ) -> ClarificationDecision {
        let Some(reply) = parse_agent_reply(reply) else {
            return ClarificationDecision::Sufficient;
        };
        if !reply.requires_clarification {
            return ClarificationDecision::Sufficient;
        }

        let questions: Vec<(&str, Option<String>)> = reply
            .questions
            .iter()
            .map(|q| (q.question.trim(), q.rationale.clone()))
            .filter(|(q, _)| !q.is_empty() && !input.context.is_answered(q))
            .collect();
        if questions.is_empty() {
            return ClarificationDecision::Sufficient;
        }

        let message = reply
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("에이전트가 초안 작성 전에 추가 확인을 요청했습니다.");
        ClarificationDecision::NeedsClarification(self.response(
            input,
            message,
            questions,
            &["agent"],
        ))
    }

    fn coverage_question(&self, items: &[ContentItem]) -> Option<(&'static str, String)> {
        if items.len() < self.min_items {
            return Some((
                THIN_EVIDENCE_QUESTION,
                format!(
                    "근거 항목이 {}건으로 최소 기준({}건)보다 적습니다.",
                    items.len(),
                    self.min_items
                ),
            ));
        }

        let first = items.first()?;
        let homogeneous = items
            .iter()
            .all(|i| i.kind == first.kind && i.theme == first.theme);
        if homogeneous {
            return Some((
                HOMOGENEOUS_EVIDENCE_QUESTION,
                format!(
                    "{}건 모두 {} / {} 입니다.",
                    items.len(),
                    first.kind,
                    first.theme
                ),
            ));
        }
        None
    }

    fn response<Q: AsRef<str>>(
        &self,
        input: &PreflightInput<'_>,
        message: &str,
        questions: Vec<(Q, Option<String>)>,
        missing: &[&str],
    ) -> ClarificationResponse {
        let turn = input.context.turn();
        ClarificationResponse {
            requires_clarification: true,
            message: message.to_string(),
            clarifying_questions: questions
                .into_iter()
                .enumerate()
                .map(|(i, (question, rationale))| ClarifyingQuestion {
                    id: question_id(turn, i + 1),
                    question: question.as_ref().to_string(),
                    rationale,
                })
                .collect(),
            missing: missing
                .iter()
                .map(|f| MissingField {
                    field: f.to_string(),
                })
                .collect(),
            defaults: input.defaults.clone(),
            context: input.context.next_turn(),
        }
    }
}

fn unanswered<'q>(
    context: &ClarificationContext,
    candidates: &'q [(&'static str, String)],
) -> Vec<(&'q str, Option<String>)> {
    candidates
        .iter()
        .filter(|(q, _)| !context.is_answered(q))
        .map(|(q, rationale)| (*q, Some(rationale.clone())))
        .collect()
}
