use async_trait::async_trait;
use parley_agent::{AgentError, ChatService, NullSink};
use parley_core::config::{ChatConfig, GenerationConfig};
use parley_core::{Database, Role};
use parley_providers::{
    ChatModel, FragmentStream, ModelInfo, ProviderError, ProviderResult, Turn, TurnRole,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// A model that replays canned responses and records what it was sent
#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<ProviderResult<Vec<String>>>>,
    sent: Mutex<Vec<Vec<Turn>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, fragments: &[&str]) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(fragments.iter().map(|f| f.to_string()).collect()));
    }

    fn push_err(&self, err: ProviderError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    fn next(&self, contents: &[Turn]) -> ProviderResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(contents.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_sent(&self) -> Vec<Turn> {
        self.sent.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(vec![
            ModelInfo {
                id: "gemini-1.5-flash".to_string(),
                display_name: "Gemini 1.5 Flash".to_string(),
                description: String::new(),
                supported_methods: vec!["generateContent".to_string()],
            },
            ModelInfo {
                id: "embedding-001".to_string(),
                display_name: "Embedding 001".to_string(),
                description: String::new(),
                supported_methods: vec!["embedContent".to_string()],
            },
        ])
    }

    async fn generate(
        &self,
        _model: &str,
        contents: &[Turn],
        _settings: &GenerationConfig,
    ) -> ProviderResult<String> {
        self.next(contents).map(|fragments| fragments.concat())
    }

    async fn stream_generate(
        &self,
        _model: &str,
        contents: &[Turn],
        _settings: &GenerationConfig,
        cancel: CancellationToken,
    ) -> ProviderResult<FragmentStream> {
        let fragments = self.next(contents)?;
        Ok(FragmentStream::from_fragments(fragments, cancel))
    }
}

fn service(model: Arc<ScriptedModel>) -> ChatService {
    let db = Arc::new(Database::open_in_memory().unwrap());
    ChatService::new(
        db,
        model,
        &ChatConfig::default(),
        GenerationConfig::default(),
    )
}

#[tokio::test]
async fn test_start_conversation_stores_title_and_first_exchange() {
    let model = ScriptedModel::new();
    model.push(&["TITLE: Boiling Eggs\n---\nREPLY: Simmer for nine minutes."]);
    let chat = service(model.clone());

    let started = chat
        .start_conversation("gemini-1.5-flash", "How do I boil an egg?")
        .await
        .unwrap();

    assert_eq!(started.conversation.title, "Boiling Eggs");
    assert_eq!(started.conversation.model, "gemini-1.5-flash");
    assert_eq!(started.reply(), "Simmer for nine minutes.");

    let stored = chat.messages(&started.conversation.id).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[0].content, "How do I boil an egg?");
    assert_eq!(stored[1].role, Role::Assistant);
    assert_eq!(stored[1].content, "Simmer for nine minutes.");

    let sent = model.last_sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1].role, TurnRole::Model);
    assert!(sent[2].text.ends_with("Initial message: How do I boil an egg?"));
}

#[tokio::test]
async fn test_unparseable_bootstrap_persists_nothing() {
    let model = ScriptedModel::new();
    model.push(&["No delimiter here"]);
    let chat = service(model);

    let err = chat
        .start_conversation("gemini-1.5-flash", "hello")
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Parse(_)));
    assert!(chat.conversations().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_message_replays_history_and_records_exchange() {
    let model = ScriptedModel::new();
    model.push(&["Rust---A systems language."]);
    model.push(&["REPLY: ", "It was ", "released in 2015."]);
    let chat = service(model.clone());

    let started = chat
        .start_conversation("gemini-1.5-flash", "What is Rust?")
        .await
        .unwrap();
    let id = started.conversation.id.clone();

    let mut echoed: Vec<String> = Vec::new();
    let stored = chat
        .send_message(&id, "When was it released?", &mut echoed, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(echoed.concat(), "REPLY: It was released in 2015.");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, "It was released in 2015.");

    let sent = model.last_sent();
    let roles: Vec<TurnRole> = sent.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::User,
            TurnRole::Model,
            TurnRole::User,
            TurnRole::Model,
            TurnRole::User,
        ]
    );
    assert_eq!(sent[2].text, "What is Rust?");
    assert_eq!(sent[3].text, "A systems language.");
    assert_eq!(sent[4].text, "When was it released?");

    let all = chat.messages(&id).unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].created_at < w[1].created_at));

    let conversation = chat.conversation(&id).unwrap().unwrap();
    assert!(conversation.updated_at >= started.conversation.updated_at);
}

#[tokio::test]
async fn test_failed_reply_persists_nothing() {
    let model = ScriptedModel::new();
    model.push(&["Topic---Answer"]);
    model.push_err(ProviderError::Api {
        status: 503,
        message: "unavailable".to_string(),
    });
    let chat = service(model);

    let started = chat
        .start_conversation("gemini-1.5-flash", "hi")
        .await
        .unwrap();
    let id = started.conversation.id;

    let err = chat
        .send_message(&id, "still there?", &mut NullSink, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::Provider(ProviderError::Api { status: 503, .. })
    ));
    assert_eq!(chat.messages(&id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_reply_persists_nothing() {
    let model = ScriptedModel::new();
    model.push(&["Topic---Answer"]);
    model.push(&["never ", "shown"]);
    let chat = service(model);

    let id = chat
        .start_conversation("gemini-1.5-flash", "hi")
        .await
        .unwrap()
        .conversation
        .id;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = chat
        .send_message(&id, "and then?", &mut NullSink, cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(chat.messages(&id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_send_to_missing_conversation_makes_no_call() {
    let model = ScriptedModel::new();
    let chat = service(model.clone());

    let err = chat
        .send_message("missing", "hello", &mut NullSink, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::ConversationNotFound(_)));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_delete_removes_conversation_and_messages() {
    let model = ScriptedModel::new();
    model.push(&["Doomed---Soon gone"]);
    let chat = service(model);

    let id = chat
        .start_conversation("gemini-1.5-flash", "bye")
        .await
        .unwrap()
        .conversation
        .id;

    assert!(chat.delete_conversation(&id).unwrap());
    assert!(chat.conversation(&id).unwrap().is_none());
    assert!(chat
        .database()
        .messages_for_conversation(&id)
        .unwrap()
        .is_empty());
    assert!(matches!(
        chat.messages(&id),
        Err(AgentError::ConversationNotFound(_))
    ));
    assert!(!chat.delete_conversation(&id).unwrap());
}

#[tokio::test]
async fn test_list_models_keeps_chat_capable_models() {
    let chat = service(ScriptedModel::new());
    let models = chat.list_models().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].id, "gemini-1.5-flash");
}

#[tokio::test]
async fn test_conversations_listed_most_recent_first() {
    let model = ScriptedModel::new();
    model.push(&["First---one"]);
    model.push(&["Second---two"]);
    model.push(&["three"]);
    let chat = service(model);

    let first = chat
        .start_conversation("gemini-1.5-flash", "a")
        .await
        .unwrap()
        .conversation;
    let second = chat
        .start_conversation("gemini-1.5-flash", "b")
        .await
        .unwrap()
        .conversation;

    let ids: Vec<String> = chat.conversations().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    chat.send_message(&first.id, "c", &mut NullSink, CancellationToken::new())
        .await
        .unwrap();
    let ids: Vec<String> = chat.conversations().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[tokio::test]
async fn test_conversation_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("convo.db");

    let model = ScriptedModel::new();
    model.push(&["Persistence---Saved to disk."]);
    model.push(&["Still here."]);

    let id = {
        let db = Arc::new(Database::open(&path).unwrap());
        let chat = ChatService::new(
            db,
            model.clone(),
            &ChatConfig::default(),
            GenerationConfig::default(),
        );
        chat.start_conversation("gemini-1.5-flash", "remember me")
            .await
            .unwrap()
            .conversation
            .id
    };

    let db = Arc::new(Database::open(&path).unwrap());
    let chat = ChatService::new(db, model.clone(), &ChatConfig::default(), GenerationConfig::default());
    chat.send_message(&id, "are you?", &mut NullSink, CancellationToken::new())
        .await
        .unwrap();

    let contents: Vec<String> = chat
        .messages(&id)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(
        contents,
        vec!["remember me", "Saved to disk.", "are you?", "Still here."]
    );
    assert_eq!(model.last_sent()[3].text, "Saved to disk.");
}
