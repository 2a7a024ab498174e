// GitHubリポジトリの取得 - contents API でトップレベルのファイルを読み込む

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::future::{BoxFuture, FutureExt, try_join_all};
use log::{debug, info, warn};
use reqwest::{self, header};

use crate::llm::prompts::file_section;
use crate::llm::schemas::github_response::{GitHubContent, RepoFile, RepoInfo};

// 1バッチあたりの同時取得数
pub const BATCH_SIZE: usize = 10;

const GITHUB_API_BASE: &str = "https://api.github.com";

// リポジトリの一覧とファイル本文を返すもの
pub trait RepoSource: Send + Sync {
    fn list_contents(&self) -> BoxFuture<'_, Result<Vec<RepoFile>>>;

    // デコード済みのファイル本文
    fn fetch_file<'a>(&'a self, file: &'a RepoFile) -> BoxFuture<'a, Result<String>>;
}

// GitHubクライアント
pub struct GitHubClient {
    client: reqwest::Client,
    repo_info: RepoInfo,
    token: Option<String>,
    api_base: String,
}

impl GitHubClient {
    pub fn new(repo_info: RepoInfo, token: Option<String>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("HTTPクライアントの作成に失敗")?;

        Ok(GitHubClient {
            client,
            repo_info,
            token,
            api_base: GITHUB_API_BASE.to_string(),
        })
    }

    pub fn repo_info(&self) -> &RepoInfo {
        &self.repo_info
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/",
            self.api_base, self.repo_info.owner, self.repo_info.repo
        )
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}{}", self.contents_url(), urlencoding::encode(path))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("token {}", token)),
            None => request,
        }
    }

    async fn fetch_listing(&self) -> Result<Vec<RepoFile>> {
        info!(
            "⬇️ リポジトリの一覧を取得中: {}/{}",
            self.repo_info.owner, self.repo_info.repo
        );

        let response = self.get(&self.contents_url()).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "GitHub API responded with status {}: {}",
                status.as_u16(),
                error_text
            ));
        }

        let files: Vec<RepoFile> = response.json().await?;
        Ok(files)
    }

    async fn fetch_decoded(&self, file: &RepoFile) -> Result<String> {
        let response = self.get(&self.file_url(&file.path)).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Error fetching file content: {}",
                response.status().as_u16()
            ));
        }

        let content: GitHubContent = response.json().await?;
        let decoded = decode_file_content(&content)
            .with_context(|| format!("ファイルデコードエラー: {}", file.path))?;

        debug!("✅ ファイル取得成功: {}", file.path);
        Ok(decoded)
    }
}

impl RepoSource for GitHubClient {
    fn list_contents(&self) -> BoxFuture<'_, Result<Vec<RepoFile>>> {
        self.fetch_listing().boxed()
    }

    fn fetch_file<'a>(&'a self, file: &'a RepoFile) -> BoxFuture<'a, Result<String>> {
        self.fetch_decoded(file).boxed()
    }
}

// contents API の base64 (改行入り) をテキストに戻す
pub fn decode_content(encoded: &str) -> Result<String> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64.decode(compact.as_bytes())?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

// 1MB を超えるファイルは encoding "none" で本文が空になる。空本文として扱う
pub fn decode_file_content(content: &GitHubContent) -> Result<String> {
    match content.encoding.as_deref() {
        None | Some("base64") => decode_content(&content.content),
        Some(encoding) if content.content.is_empty() => {
            warn!("⚠️ 本文なし (encoding: {})", encoding);
            Ok(String::new())
        }
        Some(encoding) => Err(anyhow!("未対応のエンコーディング: {}", encoding)),
    }
}

// 一覧を取得し、batch_size 件ずつ並行取得して1つの文字列にまとめる
//
// バッチ同士は順番に処理する。どれか1件でも失敗したら残りは取得しない。
pub async fn load_repository<S>(source: &S, batch_size: usize) -> Result<String>
where
    S: RepoSource + ?Sized,
{
    let files = source.list_contents().await?;
    let batch_size = batch_size.max(1);

    info!(
        "🗂️ エントリ数: {} (バッチ数: {})",
        files.len(),
        files.len().div_ceil(batch_size)
    );

    let mut full_repo_content = String::new();

    for (index, batch) in files.chunks(batch_size).enumerate() {
        debug!("バッチ {} を取得中 ({}件)", index + 1, batch.len());

        let batch_content = try_join_all(batch.iter().map(|file| async move {
            if file.is_file() {
                let body = source.fetch_file(file).await?;
                Ok::<_, anyhow::Error>(file_section(&file.name, &body))
            } else {
                Ok(String::new())
            }
        }))
        .await?;

        full_repo_content.push_str(&batch_content.join("\n"));
    }

    info!("✅ リポジトリ読み込み完了: {} bytes", full_repo_content.len());
    Ok(full_repo_content)
}
