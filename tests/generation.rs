use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use draft_harness::agent::{AgentClient, AgentError, AgentRegistry, ChunkSink, CliAgent};
use draft_harness::clarify::ClarificationContext;
use draft_harness::config::{Config, PromptVia, ProviderConfig};
use draft_harness::error::ServiceError;
use draft_harness::generate::{
    GenerateRequest, GenerationOutcome, Generator, FALLBACK_STREAM_MARKER,
};
use draft_harness::ingest::SourceIngestor;
use draft_harness::models::{
    NewSession, NewSource, RawRecord, RecordKind, RevisionSource, Source, SourceKind,
};
use draft_harness::normalize::normalize;
use draft_harness::store::memory::InMemoryStore;
use draft_harness::store::Store;

// ═══════════════════════════════════════════════════════════════════════
// Test doubles
// ═══════════════════════════════════════════════════════════════════════

/// Serves canned records per source instead of running a connector.
struct StubIngestor {
    store: Arc<dyn Store>,
    records: Mutex<HashMap<String, Vec<RawRecord>>>,
    fail: bool,
}

impl StubIngestor {
    fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            records: Mutex::new(HashMap::new()),
            fail: false,
        }
    }

    fn failing(store: Arc<dyn Store>) -> Self {
        Self {
            fail: true,
            ..Self::new(store)
        }
    }

    fn serve(&self, source_id: &str, records: Vec<RawRecord>) {
        self.records
            .lock()
            .unwrap()
            .insert(source_id.to_string(), records);
    }
}

#[async_trait]
impl SourceIngestor for StubIngestor {
    async fn ingest_source(&self, source_id: &str) -> Result<usize> {
        if self.fail {
            return Err(anyhow!("connector unavailable"));
        }
        let raw = self
            .records
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or_default();
        self.store.upsert_content(source_id, &normalize(raw)).await
    }
}

/// Records every prompt and answers with a fixed draft.
struct RecordingAgent {
    name: &'static str,
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingAgent {
    fn new(name: &'static str, reply: &str) -> Self {
        Self {
            name,
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl AgentClient for RecordingAgent {
    fn provider(&self) -> &str {
        self.name
    }

    async fn run_stream(&self, prompt: &str, on_chunk: ChunkSink<'_>) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        on_chunk(&self.reply);
        Ok(self.reply.clone())
    }
}

fn sh_agent(name: &str, script: &str) -> CliAgent {
    CliAgent::new(
        name,
        ProviderConfig {
            command: "sh".to_string(),
            model: None,
            args: vec!["-c".to_string(), script.to_string()],
            model_args: vec![],
            prompt_via: PromptVia::Stdin,
        },
        Duration::from_secs(10),
    )
}

// ═══════════════════════════════════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════════════════════════════════

fn commit(hash: &str, day: u32, title: &str, body: &str) -> RawRecord {
    RawRecord {
        external_id: hash.to_string(),
        kind: RecordKind::Commit,
        title: title.to_string(),
        body: body.to_string(),
        author: Some("Kim".to_string()),
        occurred_at: Some(Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()),
        metadata: json!({ "hash": hash, "repoUrl": "git@github.com:acme/api.git" }),
    }
}

/// Three commits with different themes.
fn sprint_commits() -> Vec<RawRecord> {
    vec![
        commit("abc1", 1, "Fix login redirect", "Users bounced back to /login after SSO."),
        commit("abc2", 2, "Add CSV export", "Exports the report table as a file."),
        commit("abc3", 3, "Deploy to staging", "Moved the staging rollout to the new runner."),
    ]
}

struct Harness {
    store: Arc<dyn Store>,
    ingestor: Arc<StubIngestor>,
    agents: AgentRegistry,
    config: Config,
}

impl Harness {
    fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        Self {
            ingestor: Arc::new(StubIngestor::new(store.clone())),
            store,
            agents: AgentRegistry::new(),
            config: Config::with_db_path("unused.sqlite"),
        }
    }

    fn with_failing_ingestor() -> Self {
        let mut h = Self::new();
        h.ingestor = Arc::new(StubIngestor::failing(h.store.clone()));
        h
    }

    async fn source(&self, name: &str, records: Vec<RawRecord>) -> Source {
        let source = self
            .store
            .create_source(&NewSource {
                name: name.to_string(),
                kind: SourceKind::Git,
                config: json!({ "repo": format!("/repos/{}", name) }),
            })
            .await
            .unwrap();
        self.ingestor.serve(&source.id, records);
        source
    }

    async fn session(&self, new: NewSession, sources: &[&Source]) -> String {
        let session = self.store.create_session(&new).await.unwrap();
        for source in sources {
            self.store.attach_source(&session.id, &source.id).await.unwrap();
        }
        session.id
    }

    fn generator(self) -> (Generator, Arc<dyn Store>) {
        let store = self.store.clone();
        let generator = Generator::new(
            &self.config,
            self.store,
            self.ingestor,
            Arc::new(self.agents),
        );
        (generator, store)
    }
}

fn titled(title: &str) -> NewSession {
    NewSession {
        title: title.to_string(),
        ..Default::default()
    }
}

fn styled(title: &str) -> NewSession {
    NewSession {
        title: title.to_string(),
        tone: Some("담백한 회고".to_string()),
        format: Some("주간 회고".to_string()),
        provider: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Clarification
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unstyled_session_asks_for_tone_and_format() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(titled("Sprint 12"), &[&source]).await;
    let (generator, store) = h.generator();

    let outcome = generator.generate(&GenerateRequest::new(&session)).await.unwrap();
    let response = outcome.clarification().expect("clarification expected");

    assert!(response.requires_clarification);
    let ids: Vec<&str> = response
        .clarifying_questions
        .iter()
        .map(|q| q.id.as_str())
        .collect();
    assert_eq!(ids, vec!["agent-q-1-1", "agent-q-1-2"]);
    let missing: Vec<&str> = response.missing.iter().map(|m| m.field.as_str()).collect();
    assert_eq!(missing, vec!["tone", "format"]);
    assert_eq!(response.defaults.tone, "기본 톤");
    assert_eq!(response.context.turn(), 2);
    assert!(store.list_posts(Some(session.as_str())).await.unwrap().is_empty());

    let wire = serde_json::to_value(&outcome).unwrap();
    assert_eq!(wire["requiresClarification"], true);
    assert_eq!(wire["context"]["turn"], 2);
}

#[tokio::test]
async fn answered_questions_are_not_asked_again() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(titled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let first = generator.generate(&GenerateRequest::new(&session)).await.unwrap();
    let context = first
        .clarification()
        .unwrap()
        .answer(&[
            ("agent-q-1-1".to_string(), "담백한 회고".to_string()),
            ("agent-q-1-2".to_string(), "주간 회고".to_string()),
        ])
        .unwrap();

    let mut request = GenerateRequest::new(&session);
    request.clarification = Some(context);
    let second = generator.generate(&request).await.unwrap();
    let post = second.post().expect("draft expected after answers");

    assert_eq!(post.generation["clarificationTurn"], 2);
    assert_eq!(post.generation["forced"], false);
    assert_eq!(post.generation["answers"].as_array().unwrap().len(), 2);
    assert_eq!(post.generation["answers"][0]["answer"], "담백한 회고");
}

#[tokio::test]
async fn exhausted_turns_force_generation_with_notice() {
    let mut h = Harness::new();
    let recorder = Arc::new(RecordingAgent::new("recorder", "# Forced\n\nbody"));
    h.agents.register(recorder.clone());
    let source = h.source("api", sprint_commits()[..1].to_vec()).await;
    let session = h.session(titled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let mut request = GenerateRequest::new(&session);
    request.provider = Some("recorder".to_string());
    request.clarification = Some(ClarificationContext::from_parts(3, 3, vec![]).unwrap());
    let outcome = generator.generate(&request).await.unwrap();

    let post = outcome.post().expect("forced generation saves a post");
    assert_eq!(post.generation["forced"], true);
    assert_eq!(post.title, "Forced");
    assert!(recorder.last_prompt().contains("한도 도달"));
}

#[tokio::test]
async fn thin_evidence_asks_for_context() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()[..1].to_vec()).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let outcome = generator.generate(&GenerateRequest::new(&session)).await.unwrap();
    let response = outcome.clarification().unwrap();
    assert_eq!(response.missing[0].field, "evidence");
    assert_eq!(response.clarifying_questions.len(), 1);
}

#[tokio::test]
async fn agent_clarification_channel_can_ask_questions() {
    let mut h = Harness::new();
    let reply = r#"{"requiresClarification":true,"message":"독자를 알려주세요","questions":[{"question":"누가 읽을 글인가요?"}]}"#;
    h.agents.register(Arc::new(sh_agent(
        "asker",
        &format!("cat >/dev/null; printf '%s' '{}'", reply),
    )));
    let source = h.source("api", sprint_commits()).await;
    let mut new = styled("Sprint 12");
    new.provider = Some("asker".to_string());
    let session = h.session(new, &[&source]).await;
    let (generator, _) = h.generator();

    let outcome = generator.generate(&GenerateRequest::new(&session)).await.unwrap();
    let response = outcome.clarification().expect("agent asked a question");
    assert_eq!(response.message, "독자를 알려주세요");
    assert_eq!(response.missing[0].field, "agent");
    assert_eq!(response.clarifying_questions[0].id, "agent-q-1-1");
    assert_eq!(response.clarifying_questions[0].question, "누가 읽을 글인가요?");
}

// ═══════════════════════════════════════════════════════════════════════
// Drafting
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn skip_preflight_uses_builtin_defaults() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(titled("Sprint 12"), &[&source]).await;
    let (generator, store) = h.generator();

    let mut request = GenerateRequest::new(&session);
    request.skip_preflight = true;
    let post = generator
        .generate(&request)
        .await
        .unwrap()
        .post()
        .cloned()
        .unwrap();

    assert_eq!(post.title, "Sprint 12 회고");
    assert_eq!(post.provider, "mock");
    assert_eq!(post.generation["tone"], "기본 톤");
    assert_eq!(post.generation["format"], "기본 기술 블로그 형식");
    assert_eq!(post.generation["promptMode"], "full");
    assert_eq!(post.generation["itemCount"], 3);
    assert_eq!(post.generation["fallback"], false);
    assert!(post.body.contains("## Next Iteration Plan"));

    let revisions = store.list_revisions(&post.id).await.unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].version, 1);
    assert_eq!(revisions[0].source, RevisionSource::Generated);
}

#[tokio::test]
async fn prompt_cites_commit_urls_in_chronological_order() {
    let mut h = Harness::new();
    let recorder = Arc::new(RecordingAgent::new("recorder", "# Draft\n\nbody"));
    h.agents.register(recorder.clone());
    let mut records = sprint_commits();
    records.reverse();
    let source = h.source("api", records).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let mut request = GenerateRequest::new(&session);
    request.provider = Some("recorder".to_string());
    request.user_instruction = Some("Keep it short.".to_string());
    generator.generate(&request).await.unwrap();

    let prompt = recorder.last_prompt();
    assert!(prompt.contains("[USER INSTRUCTION]\nKeep it short."));
    assert!(prompt.contains("Tone: 담백한 회고"));
    assert!(prompt.contains("C1 | api | Kim | 2024-03-01T09:00:00Z | https://github.com/acme/api/commit/abc1"));
    assert!(prompt.contains("C3 | api | Kim | 2024-03-03T09:00:00Z | https://github.com/acme/api/commit/abc3"));
}

#[tokio::test]
async fn duplicates_across_sources_are_collapsed() {
    let h = Harness::new();
    let api = h.source("api", sprint_commits()).await;
    let mirror = h.source("mirror", sprint_commits()).await;
    let session = h.session(styled("Sprint 12"), &[&api, &mirror]).await;
    let (generator, _) = h.generator();

    let post = generator
        .generate(&GenerateRequest::new(&session))
        .await
        .unwrap()
        .post()
        .cloned()
        .unwrap();
    assert_eq!(post.generation["itemCount"], 3);
}

#[tokio::test]
async fn streaming_forwards_the_draft() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let mut chunks: Vec<String> = Vec::new();
    let mut sink = |chunk: &str| chunks.push(chunk.to_string());
    let outcome = generator
        .generate_stream(&GenerateRequest::new(&session), &mut sink)
        .await
        .unwrap();

    let post = outcome.post().unwrap();
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat().trim(), post.body);
}

#[tokio::test]
async fn failing_agent_saves_fallback_draft() {
    let mut h = Harness::new();
    h.agents
        .register(Arc::new(sh_agent("broken", "cat >/dev/null; echo boom >&2; exit 3")));
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, store) = h.generator();

    let mut request = GenerateRequest::new(&session);
    request.provider = Some("broken".to_string());
    request.skip_preflight = true;

    let mut streamed = String::new();
    let mut sink = |chunk: &str| streamed.push_str(chunk);
    let outcome = generator.generate_stream(&request, &mut sink).await.unwrap();

    let post = outcome.post().unwrap();
    assert_eq!(post.title, "초안 생성 실패 (fallback)");
    assert_eq!(post.provider, "broken");
    assert_eq!(post.generation["fallback"], true);
    assert!(post.generation["error"].as_str().unwrap().contains("boom"));
    assert!(streamed.contains("초안 생성 실패"));
    assert!(!streamed.contains(FALLBACK_STREAM_MARKER));
    assert_eq!(store.list_revisions(&post.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn agent_failing_mid_stream_marks_the_fallback() {
    let mut h = Harness::new();
    h.agents.register(Arc::new(sh_agent(
        "flaky",
        "cat >/dev/null; echo '# Half a draft'; exit 3",
    )));
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let mut request = GenerateRequest::new(&session);
    request.provider = Some("flaky".to_string());
    request.skip_preflight = true;

    let mut streamed = String::new();
    let mut sink = |chunk: &str| streamed.push_str(chunk);
    let outcome = generator.generate_stream(&request, &mut sink).await.unwrap();

    let post = outcome.post().unwrap();
    assert_eq!(post.generation["fallback"], true);
    assert!(!post.body.contains("Half a draft"));
    assert!(streamed.starts_with("# Half a draft"));
    let (partial, rest) = streamed.split_once(FALLBACK_STREAM_MARKER).unwrap();
    assert_eq!(partial.trim(), "# Half a draft");
    assert_eq!(rest, post.body);
}

#[tokio::test]
async fn ingestion_failure_falls_back_to_stored_content() {
    let h = Harness::with_failing_ingestor();
    let source = h.source("api", vec![]).await;
    h.store
        .upsert_content(&source.id, &normalize(sprint_commits()))
        .await
        .unwrap();
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let post = generator
        .generate(&GenerateRequest::new(&session))
        .await
        .unwrap()
        .post()
        .cloned()
        .unwrap();
    assert_eq!(post.generation["itemCount"], 3);
}

#[tokio::test]
async fn refine_sends_the_previous_draft() {
    let mut h = Harness::new();
    let recorder = Arc::new(RecordingAgent::new("recorder", "# Refined\n\nbetter body"));
    h.agents.register(recorder.clone());
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let other = h.session(styled("Other"), &[&source]).await;
    let (generator, _) = h.generator();

    let first = generator
        .generate(&GenerateRequest::new(&session))
        .await
        .unwrap()
        .post()
        .cloned()
        .unwrap();

    let mut request = GenerateRequest::new(&session);
    request.provider = Some("recorder".to_string());
    request.refine_post_id = Some(first.id.clone());
    let refined = generator
        .generate(&request)
        .await
        .unwrap()
        .post()
        .cloned()
        .unwrap();

    assert_ne!(refined.id, first.id);
    assert_eq!(refined.generation["refinedFrom"], first.id.as_str());
    let prompt = recorder.last_prompt();
    assert!(prompt.contains("[REFINE MODE]"));
    assert!(prompt.contains(&first.body));

    let mut foreign = GenerateRequest::new(&other);
    foreign.refine_post_id = Some(first.id.clone());
    assert!(matches!(
        generator.generate(&foreign).await.unwrap_err(),
        ServiceError::InvalidRequest(_)
    ));

    let mut missing = GenerateRequest::new(&session);
    missing.refine_post_id = Some("nope".to_string());
    assert!(matches!(
        generator.generate(&missing).await.unwrap_err(),
        ServiceError::NotFound { entity: "post", .. }
    ));
}

// ═══════════════════════════════════════════════════════════════════════
// Request errors
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn request_errors() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()).await;
    let bare = h.session(titled("No sources"), &[]).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    assert!(matches!(
        generator.generate(&GenerateRequest::new("missing")).await.unwrap_err(),
        ServiceError::NotFound { entity: "session", .. }
    ));
    assert!(matches!(
        generator.generate(&GenerateRequest::new(&bare)).await.unwrap_err(),
        ServiceError::InvalidRequest(_)
    ));

    let mut request = GenerateRequest::new(&session);
    request.provider = Some("nonexistent".to_string());
    let err = generator.generate(&request).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRequest(_)));
    assert!(err.to_string().contains("nonexistent"));
}

#[tokio::test]
async fn outcome_serializes_as_post_or_clarification() {
    let h = Harness::new();
    let source = h.source("api", sprint_commits()).await;
    let session = h.session(styled("Sprint 12"), &[&source]).await;
    let (generator, _) = h.generator();

    let outcome = generator.generate(&GenerateRequest::new(&session)).await.unwrap();
    assert!(matches!(outcome, GenerationOutcome::Completed(_)));
    let wire = serde_json::to_value(&outcome).unwrap();
    assert_eq!(wire["sessionId"], session.as_str());
    assert_eq!(wire["status"], "draft");
}
