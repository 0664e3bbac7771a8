//! Generation orchestrator.
//!
//! One call runs the whole pipeline for a session:
//!
//! ```text
//! session + sources ─▶ re-ingest ─▶ stored content ─▶ normalize/theme
//!        ─▶ clarification ─┬─▶ NeedsClarification (return)
//!                          └─▶ prompt ─▶ agent (or fallback) ─▶ post + revision 1
//! ```
//!
//! Agent failures never escape: they become a fallback draft that is saved
//! like any other. Only missing entities, invalid requests and storage
//! errors are returned as [`ServiceError`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use draft_harness_core::clarify::{
    ClarificationContext, ClarificationDecision, ClarificationEngine, ClarificationResponse,
    Preflight, PreflightInput, StyleDefaults,
};
use draft_harness_core::models::{BlogPost, ContentItem, NewPost, PostStatus, Session, Source};
use draft_harness_core::normalize::{build_item, normalize_by};
use draft_harness_core::prompt::{build_preflight_prompt, PromptBuilder, PromptRequest};
use draft_harness_core::store::Store;

use crate::agent::{fallback_draft, AgentClient, AgentRegistry};
use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::ingest::SourceIngestor;

/// Longest title taken from a draft's first heading.
const MAX_TITLE_CHARS: usize = 200;

/// Streamed between partial agent output and the fallback draft when an
/// agent fails mid-stream. The saved post holds only the fallback draft.
pub const FALLBACK_STREAM_MARKER: &str =
    "\n\n<!-- agent output interrupted; the saved post is the fallback draft below -->\n\n";

/// Parameters of one generation call. Unset style fields fall back to the
/// session, then to the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub session_id: String,
    pub provider: Option<String>,
    pub tone: Option<String>,
    pub format: Option<String>,
    pub user_instruction: Option<String>,
    /// Edit this existing post instead of drafting from scratch.
    pub refine_post_id: Option<String>,
    pub skip_preflight: bool,
    /// Context returned by the previous `NeedsClarification` response.
    pub clarification: Option<ClarificationContext>,
}

impl GenerateRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }
}

/// Result of a generation call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GenerationOutcome {
    Completed(BlogPost),
    NeedsClarification(ClarificationResponse),
}

impl GenerationOutcome {
    pub fn post(&self) -> Option<&BlogPost> {
        match self {
            GenerationOutcome::Completed(post) => Some(post),
            GenerationOutcome::NeedsClarification(_) => None,
        }
    }

    pub fn clarification(&self) -> Option<&ClarificationResponse> {
        match self {
            GenerationOutcome::Completed(_) => None,
            GenerationOutcome::NeedsClarification(r) => Some(r),
        }
    }
}

pub struct Generator {
    store: Arc<dyn Store>,
    ingestor: Arc<dyn SourceIngestor>,
    agents: Arc<AgentRegistry>,
    prompt: PromptBuilder,
    engine: ClarificationEngine,
    max_turns: u32,
    default_provider: String,
}

impl Generator {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        ingestor: Arc<dyn SourceIngestor>,
        agents: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            store,
            ingestor,
            agents,
            prompt: PromptBuilder::new(config.prompt.max_chars),
            engine: ClarificationEngine::new(config.clarification.min_items),
            max_turns: config.clarification.max_turns,
            default_provider: config.agent.default_provider.clone(),
        }
    }

    pub async fn generate(&self, request: &GenerateRequest) -> ServiceResult<GenerationOutcome> {
        self.run(request, None).await
    }

    /// Like [`generate`](Self::generate), forwarding draft text to
    /// `on_chunk` as the agent produces it.
    ///
    /// If the agent fails after output has started, [`FALLBACK_STREAM_MARKER`]
    /// and then the fallback draft are forwarded. The stream then holds more
    /// than the saved body, which is the fallback draft alone.
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> ServiceResult<GenerationOutcome> {
        self.run(request, Some(on_chunk)).await
    }

    async fn run(
        &self,
        request: &GenerateRequest,
        mut on_chunk: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> ServiceResult<GenerationOutcome> {
        let session = self
            .store
            .get_session(&request.session_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("session", &request.session_id))?;

        let sources = self.store.list_session_sources(&session.id).await?;
        if sources.is_empty() {
            return Err(ServiceError::invalid(format!(
                "session {} has no attached sources",
                session.id
            )));
        }

        let provider = self.resolve_provider(request, &session);
        let agent = self
            .agents
            .get(&provider)
            .map_err(|_| ServiceError::invalid(format!("unknown provider '{}'", provider)))?;

        for source in &sources {
            if let Err(e) = self.ingestor.ingest_source(&source.id).await {
                warn!(source = %source.name, error = %e, "ingestion failed; using stored content");
            }
        }

        let items = self.load_items(&session, &sources).await?;

        let defaults = StyleDefaults::resolve(
            request.tone.as_deref(),
            session.tone.as_deref(),
            request.format.as_deref(),
            session.format.as_deref(),
        );

        let refine_body = match &request.refine_post_id {
            Some(post_id) => {
                let post = self
                    .store
                    .get_post(post_id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("post", post_id))?;
                if post.session_id != session.id {
                    return Err(ServiceError::invalid(format!(
                        "post {} belongs to another session",
                        post_id
                    )));
                }
                Some(post.body)
            }
            None => None,
        };

        let context = request
            .clarification
            .clone()
            .unwrap_or_else(|| ClarificationContext::start(self.max_turns))
            .with_max_turns(self.max_turns);

        let input = PreflightInput {
            skip_preflight: request.skip_preflight,
            context: &context,
            tone_set: is_set(request.tone.as_deref()) || is_set(session.tone.as_deref()),
            format_set: is_set(request.format.as_deref()) || is_set(session.format.as_deref()),
            items: &items,
            agent_supports_clarification: agent.supports_clarification(),
            defaults: &defaults,
        };

        let decision = match self.engine.evaluate(&input) {
            Preflight::Decided(decision) => decision,
            Preflight::Delegate => self.ask_agent(agent.as_ref(), &session, &input).await,
        };
        let forced = match decision {
            ClarificationDecision::NeedsClarification(response) => {
                info!(
                    session = %session.id,
                    turn = context.turn(),
                    questions = response.clarifying_questions.len(),
                    "clarification requested"
                );
                return Ok(GenerationOutcome::NeedsClarification(response));
            }
            ClarificationDecision::Forced => true,
            ClarificationDecision::Sufficient => false,
        };

        let prompt = self.prompt.build(&PromptRequest {
            session_title: &session.title,
            tone: &defaults.tone,
            format: &defaults.format,
            items: &items,
            user_instruction: request.user_instruction.as_deref(),
            refine_body: refine_body.as_deref(),
            answers: context.answers(),
            forced,
        });
        let prompt_chars = prompt.char_count();
        debug!(mode = ?prompt.mode, prompt_chars, items = items.len(), "prompt built");

        let mut streamed = false;
        let result = match on_chunk.as_mut() {
            Some(sink) => {
                let mut forward = |chunk: &str| {
                    streamed |= !chunk.is_empty();
                    (**sink)(chunk);
                };
                agent.run_stream(&prompt.text, &mut forward).await
            }
            None => agent.run(&prompt.text).await,
        };
        let (body, error) = match result {
            Ok(text) => (text, None),
            Err(e) => {
                warn!(provider = %provider, error = %e, "agent failed; saving fallback draft");
                let draft = fallback_draft(&provider, &e, &prompt.text);
                if let Some(sink) = on_chunk.as_mut() {
                    if streamed {
                        (**sink)(FALLBACK_STREAM_MARKER);
                    }
                    (**sink)(&draft);
                }
                (draft, Some(e.to_string()))
            }
        };

        let mut generation = serde_json::json!({
            "provider": provider,
            "tone": defaults.tone,
            "format": defaults.format,
            "promptMode": prompt.mode,
            "promptChars": prompt_chars,
            "itemCount": items.len(),
            "clarificationTurn": context.turn(),
            "forced": forced,
            "answers": context.answers(),
            "fallback": error.is_some(),
        });
        if let Some(error) = &error {
            generation["error"] = serde_json::json!(error);
        }
        if let Some(post_id) = &request.refine_post_id {
            generation["refinedFrom"] = serde_json::json!(post_id);
        }

        let post = self
            .store
            .create_post(&NewPost {
                session_id: session.id.clone(),
                title: draft_title(&body).unwrap_or_else(|| session.title.clone()),
                body,
                provider: provider.clone(),
                status: PostStatus::Draft,
                generation,
            })
            .await?;

        info!(
            post = %post.id,
            session = %session.id,
            provider = %provider,
            fallback = error.is_some(),
            "draft saved"
        );
        Ok(GenerationOutcome::Completed(post))
    }

    fn resolve_provider(&self, request: &GenerateRequest, session: &Session) -> String {
        request
            .provider
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or(session.provider.as_deref().filter(|p| !p.trim().is_empty()))
            .unwrap_or(self.default_provider.as_str())
            .trim()
            .to_string()
    }

    /// Stored content of every attached source as prompt-ready items,
    /// deduplicated across sources.
    async fn load_items(&self, session: &Session, sources: &[Source]) -> ServiceResult<Vec<ContentItem>> {
        let by_id: HashMap<&str, &Source> = sources.iter().map(|s| (s.id.as_str(), s)).collect();
        let records = self.store.list_session_content(&session.id).await?;
        let normalized = normalize_by(records, |r| r.to_raw());

        Ok(normalized
            .iter()
            .filter_map(|(record, norm)| {
                by_id
                    .get(record.source_id.as_str())
                    .map(|source| build_item(source, norm))
            })
            .collect())
    }

    /// Ask the agent's structured channel. Any failure counts as "no
    /// clarification needed".
    async fn ask_agent(
        &self,
        agent: &dyn AgentClient,
        session: &Session,
        input: &PreflightInput<'_>,
    ) -> ClarificationDecision {
        let prompt = build_preflight_prompt(
            &session.title,
            &input.defaults.tone,
            &input.defaults.format,
            input.items,
            input.context.answers(),
        );
        match agent.run(&prompt).await {
            Ok(reply) => self.engine.decide_from_agent_reply(input, &reply),
            Err(e) => {
                warn!(provider = %agent.provider(), error = %e, "clarification preflight failed");
                ClarificationDecision::Sufficient
            }
        }
    }
}

fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Text of the first `# ` heading, if any.
fn draft_title(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.trim().strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.chars().take(MAX_TITLE_CHARS).collect())
}
