//! Version ordering for the release-selection pipeline
//!
//! Upstream version strings range from clean `1.2.3` to legacy forms the
//! packaging standards never blessed. The Latest-N filter only needs a
//! total order that ranks releases by recency and puts pre-releases below
//! their final release, so this module implements a tokenized comparison:
//! numeric segments compare numerically, known pre/post markers carry an
//! explicit rank, and anything else falls back to lexicographic order.
//! Exact ties are left to the caller, which breaks them by catalog order.

use std::cmp::Ordering;

/// A parsed version string. Parsing is infallible; arbitrary text becomes
/// a sequence of comparable tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(u64),
    Alpha(String),
}

/// Rank of an alphabetic segment relative to the bare release.
///
/// dev < alpha < beta < rc < (release) < post
fn alpha_rank(s: &str) -> i8 {
    match s {
        "dev" => -4,
        "a" | "alpha" => -3,
        "b" | "beta" => -2,
        "c" | "rc" | "pre" | "preview" => -1,
        "post" | "rev" | "r" => 1,
        _ => 0,
    }
}

impl Version {
    pub fn parse(s: &str) -> Version {
        let s = s.trim().to_lowercase();
        let s = s.strip_prefix('v').unwrap_or(&s);

        let mut tokens = Vec::new();
        let mut cur = String::new();
        let mut cur_is_digit = false;

        let mut push = |buf: &mut String, is_digit: bool, tokens: &mut Vec<Token>| {
            if buf.is_empty() {
                return;
            }
            if is_digit {
                // Oversized numeric segments saturate rather than fail.
                let n = buf.parse::<u64>().unwrap_or(u64::MAX);
                tokens.push(Token::Num(n));
            } else {
                tokens.push(Token::Alpha(std::mem::take(buf)));
            }
            buf.clear();
        };

        for ch in s.chars() {
            if ch == '.' || ch == '-' || ch == '_' || ch == '+' {
                push(&mut cur, cur_is_digit, &mut tokens);
                continue;
            }
            let is_digit = ch.is_ascii_digit();
            if !cur.is_empty() && is_digit != cur_is_digit {
                push(&mut cur, cur_is_digit, &mut tokens);
            }
            cur_is_digit = is_digit;
            cur.push(ch);
        }
        push(&mut cur, cur_is_digit, &mut tokens);

        Version { tokens }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Version) -> Ordering {
        let mut a = self.tokens.iter();
        let mut b = other.tokens.iter();

        loop {
            match (a.next(), b.next()) {
                (Some(Token::Num(x)), Some(Token::Num(y))) => match x.cmp(y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                (Some(Token::Alpha(x)), Some(Token::Alpha(y))) => {
                    match alpha_rank(x).cmp(&alpha_rank(y)) {
                        Ordering::Equal => match x.cmp(y) {
                            Ordering::Equal => continue,
                            ord => return ord,
                        },
                        ord => return ord,
                    }
                }
                // A numeric segment outranks an alphabetic one at the same
                // position: 1.0 > 1.0rc1 reduces to Num(0) vs Alpha("rc").
                (Some(Token::Num(_)), Some(Token::Alpha(_))) => return Ordering::Greater,
                (Some(Token::Alpha(_)), Some(Token::Num(_))) => return Ordering::Less,
                // The longer version wins unless its trailing segment is a
                // pre-release marker: 1.0.1 > 1.0, but 1.0rc1 < 1.0.
                (Some(tok), None) => return trailing_ordering(tok),
                (None, Some(tok)) => return trailing_ordering(tok).reverse(),
                (None, None) => return Ordering::Equal,
            }
        }
    }
}

fn trailing_ordering(tok: &Token) -> Ordering {
    match tok {
        Token::Num(_) => Ordering::Greater,
        Token::Alpha(s) if alpha_rank(s) < 0 => Ordering::Less,
        Token::Alpha(_) => Ordering::Greater,
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Version) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) {
        assert!(
            Version::parse(a) < Version::parse(b),
            "expected {} < {}",
            a,
            b
        );
    }

    #[test]
    fn test_basic_ordering() {
        lt("1.0", "1.1");
        lt("1.1", "1.2");
        lt("1.9", "1.10");
        lt("0.9.9", "1.0");
        lt("1.0", "1.0.1");
    }

    #[test]
    fn test_prerelease_below_release() {
        lt("1.0a1", "1.0");
        lt("1.0rc1", "1.0");
        lt("1.0.dev1", "1.0");
        lt("1.0a1", "1.0b1");
        lt("1.0b2", "1.0rc1");
        lt("2.0.0-rc.1", "2.0.0");
    }

    #[test]
    fn test_postrelease_above_release() {
        lt("1.0", "1.0.post1");
        lt("1.0", "1.0.1");
    }

    #[test]
    fn test_equality_and_separators() {
        assert_eq!(Version::parse("1.0.0"), Version::parse("1-0-0"));
        assert_eq!(Version::parse("v1.2"), Version::parse("1.2"));
        assert_eq!(Version::parse("1.0RC1"), Version::parse("1.0rc1"));
    }

    #[test]
    fn test_legacy_strings_do_not_panic() {
        // Arbitrary text still produces a total order.
        let weird = ["banana", "2013b", "0.0.0-._.-0", "1!2.0", ""];
        for w in &weird {
            let _ = Version::parse(w);
        }
        lt("2013a", "2013b");
    }
}
