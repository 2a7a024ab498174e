// LLM関連のスキーマ定義

// GitHub API 応答に関するスキーマ
pub mod github_response {
    use serde::{Deserialize, Serialize};

    // リポジトリ情報
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct RepoInfo {
        pub owner: String,
        pub repo: String,
    }

    // contents API のエントリ (ファイル/ディレクトリ)
    #[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
    pub struct RepoFile {
        pub name: String,
        pub sha: String,
        #[serde(rename = "type")]
        pub item_type: String,
        pub path: String,
    }

    impl RepoFile {
        pub fn is_file(&self) -> bool {
            self.item_type == "file"
        }
    }

    // GitHubのコンテンツAPI応答 (単一ファイル)
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct GitHubContent {
        #[serde(default)]
        pub content: String,
        pub encoding: Option<String>,
    }
}

// Gemini API のリクエスト/レスポンスに関するスキーマ
pub mod gemini_response {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
    pub struct Part {
        #[serde(default)]
        pub text: String,
    }

    // role + parts の組
    #[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
    pub struct Content {
        #[serde(default)]
        pub role: String,
        #[serde(default)]
        pub parts: Vec<Part>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum HarmCategory {
        HarmCategoryHarassment,
        HarmCategoryHateSpeech,
        HarmCategorySexuallyExplicit,
        HarmCategoryDangerousContent,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum HarmBlockThreshold {
        BlockLowAndAbove,
        BlockMediumAndAbove,
        BlockOnlyHigh,
        BlockNone,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
    pub struct SafetySetting {
        pub category: HarmCategory,
        pub threshold: HarmBlockThreshold,
    }

    // streamGenerateContent へのリクエストボディ
    #[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerateContentRequest {
        pub contents: Vec<Content>,
        pub safety_settings: Vec<SafetySetting>,
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Candidate {
        pub content: Option<Content>,
        pub finish_reason: Option<String>,
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PromptFeedback {
        pub block_reason: Option<String>,
    }

    // ストリームの1チャンク
    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerateContentResponse {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
        pub prompt_feedback: Option<PromptFeedback>,
    }

    impl GenerateContentResponse {
        // 先頭候補の全 part のテキストを連結する
        pub fn text(&self) -> String {
            self.candidates
                .first()
                .and_then(|candidate| candidate.content.as_ref())
                .map(|content| {
                    content
                        .parts
                        .iter()
                        .map(|part| part.text.as_str())
                        .collect::<String>()
                })
                .unwrap_or_default()
        }

        // 本文を返さずに止まった候補の理由 (SAFETY / RECITATION)
        pub fn stop_reason(&self) -> Option<&str> {
            self.candidates
                .first()
                .and_then(|candidate| candidate.finish_reason.as_deref())
                .filter(|reason| matches!(*reason, "SAFETY" | "RECITATION"))
        }

        pub fn block_reason(&self) -> Option<&str> {
            self.prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.as_deref())
        }
    }

}
