// SPDX-License-Identifier: Apache-2.0
use regex::Regex;
use tracing::warn;

/// Ordered set of client-address patterns that bypass the secret path.
///
/// Patterns are plain unanchored regular expressions with literal dots
/// escaped. `10.0.0.0/8` is *not* a range: it matches any address containing
/// the text `10.0.0.0/8`, which in practice means nothing.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    patterns: Vec<Regex>,
}

impl AllowList {
    /// Compile a comma-separated pattern list such as `"192.168.1.,10.0.0.5"`.
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        Self::from_patterns(raw.split(','))
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref().trim();
                if pattern.is_empty() {
                    warn!("Empty allow-list pattern matches every client address");
                }
                Regex::new(&escape_dots(pattern))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// True if any pattern matches, testing in listed order.
    pub fn matches(&self, ip: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }
}

fn escape_dots(pattern: &str) -> String {
    pattern.replace('.', r"\.")
}
