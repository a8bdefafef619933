//! Turn-loop integration: a scripted provider drives real tools in a temp
//! workspace through the full engine.

use std::sync::Arc;

use agent_core::{
    ApprovalGate, ApprovalMode, ApprovalState, ChatRole, EngineConfig, PartialToolCall,
    ResultCache, StreamDelta, ToolExecutionOrchestrator, ToolRegistry,
};
use agent_core::error::ApprovalError;
use agent_core::ApprovalPrompt;
use agent_tools::{register_builtin_tools, WorkspaceRoot};
use async_trait::async_trait;
use coding_agent::app::AgentApp;
use coding_agent::providers::MockProvider;
use tokio_util::sync::CancellationToken;

struct NoPrompt;

#[async_trait]
impl ApprovalPrompt for NoPrompt {
    async fn request_approval(&self, _rendered: &str) -> Result<String, ApprovalError> {
        Err(ApprovalError::PromptClosed)
    }
}

fn app_with(provider: MockProvider, workspace: Arc<WorkspaceRoot>) -> AgentApp {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, Arc::clone(&workspace)).expect("tools");

    let config = EngineConfig::default();
    let gate = ApprovalGate::new(
        ApprovalMode::ApproveAll,
        ApprovalState::new(),
        Box::new(NoPrompt),
        config.approval_record_cap,
    );
    let cache = ResultCache::new(config.cache.clone());
    let orchestrator = ToolExecutionOrchestrator::new(
        Arc::new(registry),
        workspace,
        Arc::new(gate),
        config,
    );

    AgentApp::new(
        Box::new(provider),
        orchestrator,
        cache,
        "session-test",
        "test instructions",
    )
}

fn native_call_delta(name: &str, arguments: &str) -> StreamDelta {
    StreamDelta {
        content: None,
        tool_calls: vec![PartialToolCall {
            index: 0,
            name: Some(name.to_string()),
            arguments_fragment: Some(arguments.to_string()),
        }],
        finish_reason: None,
    }
}

#[tokio::test]
async fn text_only_turn_ends_after_one_round() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Arc::new(WorkspaceRoot::new(dir.path()).expect("workspace"));
    let provider = MockProvider::text_only("Nothing to do.");
    let mut app = app_with(provider, workspace);

    let outcome = app
        .run_turn("say hi", &CancellationToken::new())
        .await
        .expect("turn");

    assert_eq!(outcome.narrative, vec!["Nothing to do.".to_string()]);
    assert!(outcome.tool_reports.is_empty());

    let last = app.messages().last().expect("assistant reply");
    assert_eq!(last.role, ChatRole::Assistant);
    assert_eq!(last.content, "Nothing to do.");
}

#[tokio::test]
async fn native_tool_round_feeds_results_back_and_finishes() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), "remember the milk\n").expect("fixture");
    let workspace = Arc::new(WorkspaceRoot::new(dir.path()).expect("workspace"));

    let provider = MockProvider::new(vec![
        // Round one: the model requests a read.
        vec![
            StreamDelta::text("Reading the notes."),
            native_call_delta("read_file", r#"{"path": "notes.txt"}"#),
            StreamDelta::finish("tool_calls"),
        ],
        // Round two: the model answers from the feedback.
        vec![
            StreamDelta::text("The notes say: remember the milk."),
            StreamDelta::finish("stop"),
        ],
    ]);
    let mut app = app_with(provider, workspace);

    let outcome = app
        .run_turn("what do my notes say?", &CancellationToken::new())
        .await
        .expect("turn");

    assert_eq!(outcome.narrative.len(), 2);
    assert_eq!(outcome.tool_reports.len(), 1);
    assert!(outcome.tool_reports[0].contains("read_file"));

    // History carries the assistant call, the tool feedback, and the answer.
    let roles: Vec<ChatRole> = app.messages().iter().map(|message| message.role).collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::System,
            ChatRole::User,
            ChatRole::Assistant,
            ChatRole::Tool,
            ChatRole::Assistant,
        ]
    );
    let feedback = &app.messages()[3];
    assert_eq!(feedback.tool_call_id.as_deref(), Some("call_0"));
    assert_eq!(feedback.content, "remember the milk\n");
}

#[tokio::test]
async fn inline_tool_round_works_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Arc::new(WorkspaceRoot::new(dir.path()).expect("workspace"));

    let provider = MockProvider::new(vec![
        vec![
            StreamDelta::text(r#"{"tool": "write_file", "arguments": {"#),
            StreamDelta::text(r#""path": "out.txt", "content": "made it"}}"#),
            StreamDelta::finish("stop"),
        ],
        vec![
            StreamDelta::text("File written."),
            StreamDelta::finish("stop"),
        ],
    ]);
    let mut app = app_with(provider, workspace);

    let outcome = app
        .run_turn("write the file", &CancellationToken::new())
        .await
        .expect("turn");

    assert_eq!(outcome.narrative, vec!["File written.".to_string()]);
    let written = std::fs::read_to_string(dir.path().join("out.txt")).expect("written file");
    assert_eq!(written, "made it");
}

#[tokio::test]
async fn provider_script_exhaustion_is_a_turn_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Arc::new(WorkspaceRoot::new(dir.path()).expect("workspace"));
    let provider = MockProvider::new(Vec::new());
    let mut app = app_with(provider, workspace);

    let error = app
        .run_turn("anything", &CancellationToken::new())
        .await
        .expect_err("empty script");
    assert!(error.to_string().contains("mock script exhausted"));
}
