// 出力欄 - Markdown をターミナル向けのテキストに変換する

use colored::Colorize;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

const RULE_WIDTH: usize = 40;

// Markdown を描画する。styled が false ならエスケープシーケンスを付けない
pub fn render_markdown(markdown: &str, styled: bool) -> String {
    let mut renderer = Renderer::new(styled);
    for event in Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH) {
        renderer.handle(event);
    }
    renderer.finish()
}

struct Renderer {
    out: String,
    styled: bool,
    heading: Option<HeadingLevel>,
    strong: usize,
    emphasis: usize,
    strikethrough: usize,
    in_code_block: bool,
    quote_depth: usize,
    // None = 箇条書き, Some(n) = 次の番号
    lists: Vec<Option<u64>>,
    links: Vec<String>,
}

impl Renderer {
    fn new(styled: bool) -> Self {
        Renderer {
            out: String::new(),
            styled,
            heading: None,
            strong: 0,
            emphasis: 0,
            strikethrough: 0,
            in_code_block: false,
            quote_depth: 0,
            lists: Vec::new(),
            links: Vec::new(),
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.write(&text, self.in_code_block),
            Event::Code(code) => {
                let code = if self.styled {
                    code.yellow().to_string()
                } else {
                    format!("`{}`", code)
                };
                self.write_raw(&code);
            }
            Event::Html(html) => self.write(&html, false),
            Event::SoftBreak | Event::HardBreak => self.newline(),
            Event::Rule => {
                self.ensure_blank_line();
                self.write_raw(&"─".repeat(RULE_WIDTH));
                self.out.push_str("\n\n");
            }
            Event::TaskListMarker(done) => {
                self.write_raw(if done { "[x] " } else { "[ ] " });
            }
            Event::FootnoteReference(name) => self.write_raw(&format!("[{}]", name)),
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading(level, _, _) => {
                self.ensure_blank_line();
                self.heading = Some(level);
            }
            Tag::CodeBlock(kind) => {
                self.ensure_blank_line();
                self.in_code_block = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() && self.styled {
                        self.out.push_str(&format!("{}\n", lang.dimmed()));
                    }
                }
            }
            Tag::BlockQuote => {
                self.ensure_blank_line();
                self.quote_depth += 1;
            }
            Tag::List(first) => {
                if self.lists.is_empty() {
                    self.ensure_blank_line();
                }
                self.lists.push(first);
            }
            Tag::Item => {
                if !self.at_line_start() {
                    self.out.push('\n');
                }
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}. ", n);
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.write_raw(&format!("{}{}", "  ".repeat(depth), marker));
            }
            Tag::Strong => self.strong += 1,
            Tag::Emphasis => self.emphasis += 1,
            Tag::Strikethrough => self.strikethrough += 1,
            Tag::Link(_, url, _) | Tag::Image(_, url, _) => self.links.push(url.to_string()),
            _ => {}
        }
    }

    fn end(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                self.newline();
                if self.lists.is_empty() {
                    self.out.push('\n');
                }
            }
            Tag::Heading(..) => {
                self.heading = None;
                self.out.push_str("\n\n");
            }
            Tag::CodeBlock(_) => {
                self.in_code_block = false;
                if !self.at_line_start() {
                    self.out.push('\n');
                }
                self.out.push('\n');
            }
            Tag::BlockQuote => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Tag::List(_) => {
                self.lists.pop();
                if !self.at_line_start() {
                    self.out.push('\n');
                }
                if self.lists.is_empty() {
                    self.out.push('\n');
                }
            }
            Tag::Item => {
                if !self.at_line_start() {
                    self.out.push('\n');
                }
            }
            Tag::Strong => self.strong = self.strong.saturating_sub(1),
            Tag::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            Tag::Strikethrough => self.strikethrough = self.strikethrough.saturating_sub(1),
            Tag::Link(..) | Tag::Image(..) => {
                if let Some(url) = self.links.pop() {
                    if !url.is_empty() {
                        let suffix = format!(" ({})", url);
                        let suffix = if self.styled {
                            suffix.blue().underline().to_string()
                        } else {
                            suffix
                        };
                        self.write_raw(&suffix);
                    }
                }
            }
            _ => {}
        }
    }

    fn at_line_start(&self) -> bool {
        self.out.is_empty() || self.out.ends_with('\n')
    }

    fn ensure_blank_line(&mut self) {
        if self.out.is_empty() || self.out.ends_with("\n\n") {
            return;
        }
        if !self.out.ends_with('\n') {
            self.out.push('\n');
        }
        self.out.push('\n');
    }

    fn newline(&mut self) {
        self.out.push('\n');
    }

    // 行頭なら引用・コードのインデントを付ける
    fn line_prefix(&mut self, code: bool) {
        if !self.at_line_start() {
            return;
        }
        for _ in 0..self.quote_depth {
            let bar = if self.styled {
                "│ ".dimmed().to_string()
            } else {
                "│ ".to_string()
            };
            self.out.push_str(&bar);
        }
        if code {
            self.out.push_str("    ");
        }
    }

    fn write(&mut self, text: &str, code: bool) {
        for segment in text.split_inclusive('\n') {
            let (line, newline) = match segment.strip_suffix('\n') {
                Some(line) => (line, true),
                None => (segment, false),
            };
            self.line_prefix(code);
            let styled = self.style(line);
            self.out.push_str(&styled);
            if newline {
                self.out.push('\n');
            }
        }
    }

    fn write_raw(&mut self, text: &str) {
        self.line_prefix(false);
        self.out.push_str(text);
    }

    fn style(&self, text: &str) -> String {
        if !self.styled || text.is_empty() {
            return text.to_string();
        }

        let mut styled = text.normal();
        if self.heading.is_some() {
            styled = styled.bold().cyan();
        }
        if self.heading == Some(HeadingLevel::H1) {
            styled = styled.underline();
        }
        if self.strong > 0 {
            styled = styled.bold();
        }
        if self.emphasis > 0 {
            styled = styled.italic();
        }
        if self.strikethrough > 0 {
            styled = styled.strikethrough();
        }
        if self.in_code_block {
            styled = styled.yellow();
        }
        styled.to_string()
    }

    fn finish(self) -> String {
        self.out.trim_end().to_string()
    }
}
