//! URL filter matching for installed rules.
//!
//! # Syntax
//! - `*` matches any run of characters
//! - `^` matches one separator character (anything except a letter, digit,
//!   `_`, `-`, `.` or `%`) or the end of the URL
//! - `|` at the start or end anchors the filter to the start or end of the URL
//! - `||` at the start anchors the filter to a host label boundary
//! - anything else is a case-insensitive literal; an unanchored filter
//!   matches anywhere in the URL
//!
//! No regex: matching is a small backtracking walk over the tokens.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    Wildcard,
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartAnchor {
    None,
    Url,
    Domain,
}

/// A parsed URL filter.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    tokens: Vec<Token>,
    start: StartAnchor,
    end_anchored: bool,
}

impl UrlFilter {
    /// Parse a filter. Every string is a valid filter.
    pub fn parse(filter: &str) -> Self {
        let (start, rest) = if let Some(rest) = filter.strip_prefix("||") {
            (StartAnchor::Domain, rest)
        } else if let Some(rest) = filter.strip_prefix('|') {
            (StartAnchor::Url, rest)
        } else {
            (StartAnchor::None, filter)
        };

        let (end_anchored, body) = match rest.strip_suffix('|') {
            Some(body) => (true, body),
            None => (false, rest),
        };

        let tokens = body
            .chars()
            .map(|c| match c {
                '*' => Token::Wildcard,
                '^' => Token::Separator,
                other => Token::Literal(other.to_ascii_lowercase()),
            })
            .collect();

        Self {
            tokens,
            start,
            end_anchored,
        }
    }

    /// True if `url` matches this filter.
    pub fn matches(&self, url: &str) -> bool {
        let text: Vec<char> = url.chars().map(|c| c.to_ascii_lowercase()).collect();
        match self.start {
            StartAnchor::Url => self.match_from(&text, 0),
            StartAnchor::None => (0..=text.len()).any(|i| self.match_from(&text, i)),
            StartAnchor::Domain => domain_starts(&text)
                .into_iter()
                .any(|i| self.match_from(&text, i)),
        }
    }

    fn match_from(&self, text: &[char], pos: usize) -> bool {
        match_tokens(&self.tokens, text, pos, self.end_anchored)
    }
}

fn match_tokens(tokens: &[Token], text: &[char], pos: usize, end_anchored: bool) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return !end_anchored || pos == text.len();
    };

    match first {
        Token::Wildcard => (pos..=text.len()).any(|i| match_tokens(rest, text, i, end_anchored)),
        Token::Separator => {
            if pos == text.len() {
                match_tokens(rest, text, pos, end_anchored)
            } else {
                is_separator(text[pos]) && match_tokens(rest, text, pos + 1, end_anchored)
            }
        }
        Token::Literal(c) => {
            pos < text.len() && text[pos] == *c && match_tokens(rest, text, pos + 1, end_anchored)
        }
    }
}

fn is_separator(c: char) -> bool {
    !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '%'))
}

/// Positions where a host label begins.
fn domain_starts(text: &[char]) -> Vec<usize> {
    let Some(scheme_end) = text.windows(3).position(|w| *w == [':', '/', '/']) else {
        return Vec::new();
    };
    let host_start = scheme_end + 3;
    let host_end = text[host_start..]
        .iter()
        .position(|c| matches!(c, '/' | '?' | '#' | ':'))
        .map(|offset| host_start + offset)
        .unwrap_or(text.len());

    let mut starts = vec![host_start];
    starts.extend(
        (host_start..host_end)
            .filter(|&i| text[i] == '.')
            .map(|i| i + 1),
    );
    starts
}
