use once_cell::sync::Lazy;
use regex::Regex;

static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<[^<>]+>|&(?:[a-zA-Z]+|#[0-9]+|#x[0-9a-fA-F]+);").expect("valid markup regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Text,
    Tag,
    Entity,
}

/// Splits one line of rendered HTML into text, tag and entity spans so the
/// preview can dim the markup.
pub fn html_spans(line: &str) -> Vec<(SpanKind, &str)> {
    let mut spans = Vec::new();
    let mut last = 0;
    for found in MARKUP.find_iter(line) {
        if found.start() > last {
            spans.push((SpanKind::Text, &line[last..found.start()]));
        }
        let kind = if found.as_str().starts_with('<') {
            SpanKind::Tag
        } else {
            SpanKind::Entity
        };
        spans.push((kind, found.as_str()));
        last = found.end();
    }
    if last < line.len() {
        spans.push((SpanKind::Text, &line[last..]));
    }
    spans
}
