// プロンプトテンプレートを管理するモジュール
use anyhow::{Result, anyhow};
use std::fs;
use std::path::Path;

use crate::llm::schemas::gemini_response::{
    Content, GenerateContentRequest, HarmBlockThreshold, HarmCategory, Part, SafetySetting,
};

// テンプレート変数のタイプ
pub type TemplateVariables = Vec<(String, String)>;

// 組み込みテンプレート: コードベース全体 + 質問
pub const CODEBASE_TEMPLATE: &str = "Here is the codebase:\n\n{{codebase}}\n\nNow, {{prompt}}";

// テンプレートをファイルから読み込む
pub fn load_template(template_path: &Path) -> Result<String> {
    // ファイルが存在するか確認
    if !template_path.exists() {
        return Err(anyhow!(
            "テンプレートファイル {} が見つかりません",
            template_path.display()
        ));
    }

    fs::read_to_string(template_path).map_err(|e| {
        anyhow!(
            "テンプレートファイル {} の読み込みに失敗: {}",
            template_path.display(),
            e
        )
    })
}

// テンプレート内の {{key}} を置換
//
// 一回の走査で置換するので、値の中に現れる {{...}} は展開されない。
// 未知のキーはそのまま残す。
pub fn render_template(template: &str, variables: &TemplateVariables) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        match after_open.find("}}") {
            Some(end) => {
                let key = &after_open[..end];
                match variables.iter().find(|(name, _)| name == key) {
                    Some((_, value)) => rendered.push_str(value),
                    None => {
                        rendered.push_str("{{");
                        rendered.push_str(key);
                        rendered.push_str("}}");
                    }
                }
                rest = &after_open[end + 2..];
            }
            None => {
                rendered.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

// 1ファイル分のヘッダー付きセクション
pub fn file_section(name: &str, body: &str) -> String {
    format!("File: {}\n\n{}\n\n", name, body)
}

// リポジトリ内容とユーザーの質問を1つのテキストにまとめる
pub fn compose_prompt(repo_content: &str, prompt: &str) -> String {
    compose_with_template(CODEBASE_TEMPLATE, repo_content, prompt)
}

pub fn compose_with_template(template: &str, repo_content: &str, prompt: &str) -> String {
    let variables: TemplateVariables = vec![
        ("codebase".to_string(), repo_content.to_string()),
        ("prompt".to_string(), prompt.to_string()),
    ];
    render_template(template, &variables)
}

// ハラスメントの高リスクのみブロックする固定設定
pub fn default_safety_settings() -> Vec<SafetySetting> {
    vec![SafetySetting {
        category: HarmCategory::HarmCategoryHarassment,
        threshold: HarmBlockThreshold::BlockOnlyHigh,
    }]
}

// 単一の user メッセージからなるリクエストを組み立てる
pub fn build_request(text: String) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![Part { text }],
        }],
        safety_settings: default_safety_settings(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prompt_with_empty_content_keeps_prefix() {
        let text = compose_prompt("", "explain main.rs");
        assert_eq!(text, "Here is the codebase:\n\n\n\nNow, explain main.rs");
        assert!(text.starts_with("Here is the codebase:\n\n\n\nNow, "));
    }

    #[test]
    fn test_compose_prompt_embeds_content_before_question() {
        let content = file_section("a.txt", "alpha");
        let text = compose_prompt(&content, "what is a?");
        assert_eq!(
            text,
            "Here is the codebase:\n\nFile: a.txt\n\nalpha\n\n\n\nNow, what is a?"
        );
    }

    #[test]
    fn test_render_template_does_not_expand_placeholders_inside_values() {
        let variables: TemplateVariables = vec![
            ("codebase".to_string(), "uses {{prompt}} literally".to_string()),
            ("prompt".to_string(), "Q".to_string()),
        ];
        let rendered = render_template("{{codebase}} / {{prompt}} / {{unknown}}", &variables);
        assert_eq!(rendered, "uses {{prompt}} literally / Q / {{unknown}}");
    }

    #[test]
    fn test_render_template_keeps_unterminated_braces() {
        let rendered = render_template("open {{ only", &vec![]);
        assert_eq!(rendered, "open {{ only");
    }

    #[test]
    fn test_build_request_has_single_user_part_and_harassment_setting() {
        let request = build_request("hello".to_string());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, "user");
        assert_eq!(request.contents[0].parts[0].text, "hello");
        assert_eq!(request.safety_settings, default_safety_settings());
        assert_eq!(
            request.safety_settings[0].threshold,
            HarmBlockThreshold::BlockOnlyHigh
        );
    }

    #[test]
    fn test_load_template_missing_file_fails() {
        let err = load_template(Path::new("does/not/exist.txt")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.txt"));
    }
}
