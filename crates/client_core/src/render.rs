use anyhow::Result;
use pulldown_cmark::{html, Event, Options, Parser};

/// Turns raw post content into the markup placed in a detail item body.
pub trait ContentRenderer: Send + Sync {
    fn render(&self, raw: &str) -> Result<String>;
}

/// Cooks raw post markdown into HTML. Embedded HTML is shown as text and
/// single newlines become line breaks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn options() -> Options {
        Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS
    }
}

impl ContentRenderer for MarkdownRenderer {
    fn render(&self, raw: &str) -> Result<String> {
        let parser = Parser::new_ext(raw, Self::options()).map(|event| match event {
            Event::Html(markup) | Event::InlineHtml(markup) => Event::Text(markup),
            Event::SoftBreak => Event::HardBreak,
            other => other,
        });

        let mut cooked = String::with_capacity(raw.len() * 3 / 2);
        html::push_html(&mut cooked, parser);
        Ok(cooked)
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
