use std::sync::LazyLock;

use regex::Regex;

use crate::fragment::{replace_with, FragmentFinder, FragmentPipeline, Span};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9\-]+(?:\.[a-z0-9\-]+)*\.[a-z]{2,}")
        .expect("email pattern compiles")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'()\[\]{}]+"#).expect("url pattern compiles")
});

/// Characters that end a sentence rather than a URL.
const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Finder backed by an arbitrary regular expression; every match is a fragment.
#[derive(Debug, Clone)]
pub struct RegexFinder {
    regex: Regex,
}

impl RegexFinder {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn from_regex(regex: Regex) -> Self {
        Self { regex }
    }
}

impl FragmentFinder for RegexFinder {
    fn find(&self, text: &str) -> Vec<Span> {
        matches_of(&self.regex, text)
    }
}

/// Finds e-mail addresses such as `jan.kowalski@example.pl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailFinder;

impl FragmentFinder for EmailFinder {
    fn find(&self, text: &str) -> Vec<Span> {
        matches_of(&EMAIL_RE, text)
    }
}

/// Finds `http://`, `https://` and `www.` links, without trailing punctuation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlFinder;

impl FragmentFinder for UrlFinder {
    fn find(&self, text: &str) -> Vec<Span> {
        URL_RE
            .find_iter(text)
            .filter_map(|m| {
                let trimmed = m.as_str().trim_end_matches(URL_TRAILING_PUNCTUATION);
                (!trimmed.is_empty()).then(|| Span::new(m.start(), trimmed.len()))
            })
            .collect()
    }
}

fn matches_of(regex: &Regex, text: &str) -> Vec<Span> {
    regex
        .find_iter(text)
        .map(|m| Span::new(m.start(), m.len()))
        .collect()
}

/// Pipeline that rewrites e-mail addresses first, then links in the remaining text.
pub fn contact_scrubber(email_replacement: &str, url_replacement: &str) -> FragmentPipeline {
    FragmentPipeline::new()
        .with_stage(EmailFinder, replace_with(email_replacement))
        .with_stage(UrlFinder, replace_with(url_replacement))
}
