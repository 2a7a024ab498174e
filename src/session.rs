// セッション - リポジトリ内容と出力の状態を保持し、質問の送信を処理する

use log::{error, info};

use crate::gemini::{ContentGenerator, collect_stream};
use crate::github::{RepoSource, load_repository};
use crate::llm::prompts::{build_request, compose_prompt, compose_with_template};
use crate::llm::schemas::github_response::RepoInfo;

pub const LOADING_TEXT: &str = "Generating response...";
pub const FALLBACK_ERROR_TEXT: &str = "An unexpected error occurred";

// 出力欄の状態
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputState {
    Idle,
    Greeting(String),
    Loading,
    Success(String),
    Error(String),
}

impl OutputState {
    pub fn display_text(&self) -> &str {
        match self {
            OutputState::Idle => "",
            OutputState::Loading => LOADING_TEXT,
            OutputState::Greeting(text) | OutputState::Success(text) | OutputState::Error(text) => {
                text
            }
        }
    }
}

// 出力が変わるたびに呼ばれる
pub type OutputListener = Box<dyn FnMut(&OutputState) + Send>;

pub struct Session {
    repo_info: RepoInfo,
    repo_content: String,
    template: Option<String>,
    batch_size: usize,
    output: OutputState,
    listener: Option<OutputListener>,
}

impl Session {
    pub fn new(repo_info: RepoInfo, batch_size: usize) -> Self {
        Session {
            repo_info,
            repo_content: String::new(),
            template: None,
            batch_size,
            output: OutputState::Idle,
            listener: None,
        }
    }

    pub fn with_template(mut self, template: String) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_listener(mut self, listener: OutputListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn repo_content(&self) -> &str {
        &self.repo_content
    }

    pub fn output(&self) -> &OutputState {
        &self.output
    }

    fn set_output(&mut self, output: OutputState) {
        self.output = output;
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.output);
        }
    }

    // リポジトリを読み直す。失敗はログのみで、内容は前回のまま。
    pub async fn refresh<S>(&mut self, source: &S)
    where
        S: RepoSource + ?Sized,
    {
        match load_repository(source, self.batch_size).await {
            Ok(content) => {
                self.repo_content = content;
                let greeting = format!(
                    "How can I help you with this - repo {}, owned by {}?",
                    self.repo_info.repo, self.repo_info.owner
                );
                self.set_output(OutputState::Greeting(greeting));
            }
            Err(e) => {
                error!("Error fetching GitHub repo files: {:#}", e);
            }
        }
    }

    // 質問を送信し、ストリームを最後まで読んでから出力を1回だけ更新する
    pub async fn submit<G>(&mut self, generator: &G, prompt: &str) -> &OutputState
    where
        G: ContentGenerator + ?Sized,
    {
        self.set_output(OutputState::Loading);

        let text = match &self.template {
            Some(template) => compose_with_template(template, &self.repo_content, prompt),
            None => compose_prompt(&self.repo_content, prompt),
        };
        let request = build_request(text);

        let result = async {
            let stream = generator.generate_stream(request).await?;
            collect_stream(stream).await
        }
        .await;

        let output = match result {
            Ok(answer) => {
                info!("✅ 応答受信: {} 文字", answer.chars().count());
                OutputState::Success(answer)
            }
            Err(e) => {
                error!("Error generating content: {:#}", e);
                let message = format!("{:#}", e);
                if message.is_empty() {
                    OutputState::Error(FALLBACK_ERROR_TEXT.to_string())
                } else {
                    OutputState::Error(message)
                }
            }
        };

        self.set_output(output);
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::TextStream;
    use crate::llm::schemas::gemini_response::GenerateContentRequest;
    use crate::llm::schemas::github_response::RepoFile;
    use anyhow::{Result, anyhow};
    use futures::future::{BoxFuture, FutureExt};
    use futures::stream::{self, StreamExt};
    use std::sync::{Arc, Mutex};

    enum Reply {
        Fragments(Vec<&'static str>),
        CallError(&'static str),
        StreamError(&'static str),
    }

    // 受け取ったリクエストを記録する ContentGenerator
    struct FakeGenerator {
        reply: Reply,
        requests: Mutex<Vec<GenerateContentRequest>>,
    }

    impl FakeGenerator {
        fn new(reply: Reply) -> Self {
            FakeGenerator {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_text(&self) -> String {
            let requests = self.requests.lock().unwrap();
            requests.last().unwrap().contents[0].parts[0].text.clone()
        }
    }

    impl ContentGenerator for FakeGenerator {
        fn generate_stream(
            &self,
            request: GenerateContentRequest,
        ) -> BoxFuture<'_, Result<TextStream>> {
            self.requests.lock().unwrap().push(request);
            let result: Result<TextStream> = match &self.reply {
                Reply::Fragments(parts) => {
                    let items: Vec<Result<String>> =
                        parts.iter().map(|p| Ok(p.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                Reply::CallError(message) => Err(anyhow!("{}", message)),
                Reply::StreamError(message) => {
                    let items = vec![Ok("partial".to_string()), Err(anyhow!("{}", message))];
                    Ok(stream::iter(items).boxed())
                }
            };
            async move { result }.boxed()
        }
    }

    struct FailingRepo;

    impl RepoSource for FailingRepo {
        fn list_contents(&self) -> BoxFuture<'_, Result<Vec<RepoFile>>> {
            async { Err(anyhow!("GitHub API responded with status 404: Not Found")) }.boxed()
        }

        fn fetch_file<'a>(&'a self, _file: &'a RepoFile) -> BoxFuture<'a, Result<String>> {
            async { Err(anyhow!("unreachable")) }.boxed()
        }
    }

    struct SingleFileRepo;

    impl RepoSource for SingleFileRepo {
        fn list_contents(&self) -> BoxFuture<'_, Result<Vec<RepoFile>>> {
            async {
                Ok(vec![RepoFile {
                    name: "README.md".to_string(),
                    sha: "abc".to_string(),
                    item_type: "file".to_string(),
                    path: "README.md".to_string(),
                }])
            }
            .boxed()
        }

        fn fetch_file<'a>(&'a self, _file: &'a RepoFile) -> BoxFuture<'a, Result<String>> {
            async { Ok("# Demo".to_string()) }.boxed()
        }
    }

    fn repo_info() -> RepoInfo {
        RepoInfo {
            owner: "octo".to_string(),
            repo: "demo".to_string(),
        }
    }

    fn recording_session() -> (Session, Arc<Mutex<Vec<OutputState>>>) {
        let history = Arc::new(Mutex::new(Vec::new()));
        let sink = history.clone();
        let session = Session::new(repo_info(), 10).with_listener(Box::new(move |state| {
            sink.lock().unwrap().push(state.clone());
        }));
        (session, history)
    }

    #[tokio::test]
    async fn test_streamed_fragments_are_committed_once() {
        let (mut session, history) = recording_session();
        let generator = FakeGenerator::new(Reply::Fragments(vec!["Hel", "lo"]));

        let output = session.submit(&generator, "hi").await.clone();

        assert_eq!(output, OutputState::Success("Hello".to_string()));
        assert_eq!(
            *history.lock().unwrap(),
            vec![OutputState::Loading, OutputState::Success("Hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_call_failure_message_becomes_output() {
        let mut session = Session::new(repo_info(), 10);
        let generator = FakeGenerator::new(Reply::CallError("API key not valid"));

        session.submit(&generator, "hi").await;

        assert_eq!(
            session.output(),
            &OutputState::Error("API key not valid".to_string())
        );
        assert_eq!(session.output().display_text(), "API key not valid");
    }

    #[tokio::test]
    async fn test_stream_failure_discards_partial_text() {
        let mut session = Session::new(repo_info(), 10);
        let generator = FakeGenerator::new(Reply::StreamError("connection reset"));

        session.submit(&generator, "hi").await;

        assert_eq!(
            session.output(),
            &OutputState::Error("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_error_message_uses_fallback() {
        let mut session = Session::new(repo_info(), 10);
        let generator = FakeGenerator::new(Reply::CallError(""));

        session.submit(&generator, "hi").await;

        assert_eq!(session.output().display_text(), FALLBACK_ERROR_TEXT);
    }

    #[tokio::test]
    async fn test_submit_with_empty_content_sends_literal_prefix() {
        let mut session = Session::new(repo_info(), 10);
        let generator = FakeGenerator::new(Reply::Fragments(vec!["ok"]));

        session.submit(&generator, "list the files").await;

        assert_eq!(
            generator.last_text(),
            "Here is the codebase:\n\n\n\nNow, list the files"
        );
    }

    #[tokio::test]
    async fn test_listing_404_leaves_content_empty() {
        let (mut session, history) = recording_session();

        session.refresh(&FailingRepo).await;

        assert_eq!(session.repo_content(), "");
        assert_eq!(session.output(), &OutputState::Idle);
        assert!(history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_sets_content_and_greeting() {
        let mut session = Session::new(repo_info(), 10);

        session.refresh(&SingleFileRepo).await;

        assert_eq!(session.repo_content(), "File: README.md\n\n# Demo\n\n");
        assert_eq!(
            session.output().display_text(),
            "How can I help you with this - repo demo, owned by octo?"
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_content() {
        let mut session = Session::new(repo_info(), 10);
        session.refresh(&SingleFileRepo).await;

        session.refresh(&FailingRepo).await;

        assert_eq!(session.repo_content(), "File: README.md\n\n# Demo\n\n");
    }

    #[tokio::test]
    async fn test_custom_template_is_used_for_payload() {
        let mut session =
            Session::new(repo_info(), 10).with_template("Q: {{prompt}}\n---\n{{codebase}}".to_string());
        session.refresh(&SingleFileRepo).await;
        let generator = FakeGenerator::new(Reply::Fragments(vec!["ok"]));

        session.submit(&generator, "why?").await;

        assert_eq!(
            generator.last_text(),
            "Q: why?\n---\nFile: README.md\n\n# Demo\n\n"
        );
    }

    #[tokio::test]
    async fn test_next_submit_overwrites_previous_output() {
        let (mut session, history) = recording_session();
        let failing = FakeGenerator::new(Reply::CallError("boom"));
        let working = FakeGenerator::new(Reply::Fragments(vec!["fine"]));

        session.submit(&failing, "one").await;
        session.submit(&working, "two").await;

        assert_eq!(session.output(), &OutputState::Success("fine".to_string()));
        assert_eq!(
            *history.lock().unwrap(),
            vec![
                OutputState::Loading,
                OutputState::Error("boom".to_string()),
                OutputState::Loading,
                OutputState::Success("fine".to_string()),
            ]
        );
    }
}
