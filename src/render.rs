use bitflags::bitflags;
use comrak::{markdown_to_html, Options};

bitflags! {
    /// Cosmetic rendering switches; none of them affect stored notes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderFlags: u8 {
        const TABLES = 1;
        /// Turn bare `https://` and `www.` URLs into links.
        const SIMPLIFIED_AUTOLINK = 1 << 1;
        const STRIKETHROUGH = 1 << 2;
        const TASKLISTS = 1 << 3;
    }
}

impl Default for RenderFlags {
    fn default() -> Self {
        RenderFlags::all()
    }
}

/// Markdown to HTML for the preview pane and `marknotes render`. Stateless;
/// raw HTML in notes is not passed through.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer {
    flags: RenderFlags,
}

impl MarkdownRenderer {
    pub fn new(flags: RenderFlags) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> RenderFlags {
        self.flags
    }

    pub fn render(&self, markdown: &str) -> String {
        let mut options = Options::default();
        options.extension.table = self.flags.contains(RenderFlags::TABLES);
        options.extension.autolink = self.flags.contains(RenderFlags::SIMPLIFIED_AUTOLINK);
        options.extension.strikethrough = self.flags.contains(RenderFlags::STRIKETHROUGH);
        options.extension.tasklist = self.flags.contains(RenderFlags::TASKLISTS);
        markdown_to_html(markdown, &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_headings_and_strikethrough() {
        let html = MarkdownRenderer::default().render("# Title\n\n~~gone~~ but *kept*\n");
        insta::assert_snapshot!(html, @r###"
        <h1>Title</h1>
        <p><del>gone</del> but <em>kept</em></p>
        "###);
    }

    #[test]
    fn extensions_follow_flags() {
        let source = "| a | b |\n|---|---|\n| 1 | 2 |\n\n- [x] done\n\nsee https://example.com\n";

        let full = MarkdownRenderer::default().render(source);
        assert!(full.contains("<table>"), "{full}");
        assert!(full.contains(r#"type="checkbox""#), "{full}");
        assert!(full.contains(r#"<a href="https://example.com">"#), "{full}");

        let plain = MarkdownRenderer::new(RenderFlags::empty()).render(source);
        assert!(!plain.contains("<table>"), "{plain}");
        assert!(!plain.contains("checkbox"), "{plain}");
        assert!(!plain.contains("<a href"), "{plain}");
    }

    #[test]
    fn strikethrough_can_be_disabled() {
        let renderer = MarkdownRenderer::new(RenderFlags::all() - RenderFlags::STRIKETHROUGH);
        let html = renderer.render("~~still here~~");
        assert!(!html.contains("<del>"), "{html}");
        assert!(html.contains("~~still here~~"), "{html}");
    }
}
