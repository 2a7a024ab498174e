// repo-gemini-chat - GitHubリポジトリの中身を Gemini に渡して質問するツール

mod gemini;
mod github;
mod llm;
mod render;
mod session;

use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use dotenv::dotenv;
use log::{LevelFilter, error, info};
use simple_logger::SimpleLogger;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::gemini::{DEFAULT_MODEL, GeminiClient};
use crate::github::{BATCH_SIZE, GitHubClient};
use crate::llm::prompts::load_template;
use crate::llm::schemas::github_response::RepoInfo;
use crate::render::render_markdown;
use crate::session::{OutputState, Session};

// 対話モードを終了する入力
const QUIT_COMMAND: &str = ":quit";

// コマンドライン引数の定義
#[derive(Parser, Debug)]
#[clap(
    name = "repo-gemini-chat",
    about = "GitHubリポジトリのコードを Gemini に渡して質問するツール",
    version
)]
struct Args {
    /// リポジトリのオーナー
    #[clap(long, env = "REPO_OWNER")]
    owner: String,

    /// リポジトリ名
    #[clap(long, env = "REPO_NAME")]
    repo: String,

    /// GitHubのアクセストークン
    #[clap(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Gemini APIキー
    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// 使用するモデル
    #[clap(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// 1バッチあたりの同時取得数
    #[clap(long, default_value_t = BATCH_SIZE)]
    batch_size: usize,

    /// 1回だけ質問して終了する
    #[clap(long)]
    prompt: Option<String>,

    /// {{codebase}} と {{prompt}} を含むテンプレートファイル
    #[clap(long)]
    template: Option<PathBuf>,

    /// Markdown を描画せずそのまま出力
    #[clap(long)]
    raw: bool,

    /// ログレベル
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

// 出力欄の表示
fn print_output(state: &OutputState, raw: bool, styled: bool) {
    let text = state.display_text();
    if text.is_empty() {
        return;
    }

    if raw {
        println!("{}", text);
    } else {
        println!("{}", render_markdown(text, styled));
    }
    println!();
}

// 1回だけの質問の終了状態。エラー出力なら main からエラーを返す
fn one_shot_result(output: &OutputState) -> Result<()> {
    if let OutputState::Error(message) = output {
        bail!("{}", message);
    }
    Ok(())
}

// メイン関数
#[tokio::main]
async fn main() -> Result<()> {
    // .envファイルを読み込み
    dotenv().ok();

    // コマンドライン引数を解析
    let args = Args::parse();

    // ロガー初期化
    SimpleLogger::new().with_level(args.log_level).init()?;

    // シークレットが無くても続行する
    if args.github_token.is_none() {
        error!("GitHub token is not defined. Check your .env file.");
    }
    if args.gemini_api_key.is_none() {
        error!("Gemini API key is not defined. Check your .env file.");
    }

    let styled = !args.raw && std::io::stdout().is_terminal();
    colored::control::set_override(styled);

    let repo_info = RepoInfo {
        owner: args.owner.clone(),
        repo: args.repo.clone(),
    };
    let github_client = GitHubClient::new(repo_info.clone(), args.github_token.clone())?;
    let gemini_client = GeminiClient::new(args.gemini_api_key.clone(), args.model.clone());

    let raw = args.raw;
    let mut session = Session::new(repo_info, args.batch_size)
        .with_listener(Box::new(move |state| print_output(state, raw, styled)));
    if let Some(path) = &args.template {
        session = session.with_template(load_template(path)?);
    }

    info!(
        "💬 リポジトリ読み込み開始: {}/{}",
        github_client.repo_info().owner,
        github_client.repo_info().repo
    );
    session.refresh(&github_client).await;
    info!("📦 コードベース: {} bytes", session.repo_content().len());

    // 1回だけの質問
    if let Some(prompt) = &args.prompt {
        session.submit(&gemini_client, prompt).await;
        return one_shot_result(session.output());
    }

    // 対話モード: 1行 = 1回の送信
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == QUIT_COMMAND {
            break;
        }

        session.submit(&gemini_client, prompt).await;
    }

    info!("👋 終了します");
    Ok(())
}
