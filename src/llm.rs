// LLMモジュール - プロンプトとAPIスキーマをまとめたモジュール

// サブモジュールをエクスポート
pub mod prompts;
pub mod schemas;
