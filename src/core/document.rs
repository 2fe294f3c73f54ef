//! Lossless SSH client config document.
//!
//! The text is split into blocks at every `Host` and `Match` header. Each block keeps its
//! exact source text (line terminators included), so serializing an untouched
//! document reproduces the input byte for byte. Directives are only looked up,
//! never rewritten; anything that does not look like `Key Value` is carried
//! through as opaque text. Values are returned as written, quotes included.

use std::fmt;

/// Header keyword that opens a host block (matched case-insensitively).
const HOST_KEYWORD: &str = "host";

/// Header keyword that opens a match section (matched case-insensitively).
const MATCH_KEYWORD: &str = "match";

/// How a directive key is compared during lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    /// Byte-for-byte key comparison.
    Exact,
    /// ASCII case-insensitive key comparison.
    IgnoreAsciiCase,
}

impl KeyMatch {
    fn matches(self, key: &str, wanted: &str) -> bool {
        match self {
            KeyMatch::Exact => key == wanted,
            KeyMatch::IgnoreAsciiCase => key.eq_ignore_ascii_case(wanted),
        }
    }
}

/// A `Host` section: header line plus every line up to the next header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBlock {
    raw: String,
}

impl HostBlock {
    /// Wrap raw block text. The first line is expected to be the header.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Exact text of the block as it appears in the document.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// First pattern after the `Host` keyword, or `""` if the header has none.
    pub fn alias(&self) -> &str {
        let header = self.raw.lines().next().unwrap_or("");
        header_rest(header)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("")
    }

    /// Value of the first directive named `key`, if any.
    pub fn directive(&self, key: &str, mode: KeyMatch) -> Option<&str> {
        self.raw
            .lines()
            .skip(1)
            .filter_map(split_directive)
            .find(|(k, _)| mode.matches(k, key))
            .map(|(_, v)| v)
    }

    /// `Port` directive (key compared case-insensitively).
    pub fn port(&self) -> Option<&str> {
        self.directive("Port", KeyMatch::IgnoreAsciiCase)
    }

    /// `IdentityFile` token exactly as written (key compared case-sensitively).
    pub fn identity_file(&self) -> Option<&str> {
        self.directive("IdentityFile", KeyMatch::Exact)
    }

    fn ends_with_newline(&self) -> bool {
        self.raw.is_empty() || self.raw.ends_with('\n')
    }
}

/// One unit of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Text before the first host header. Never classified as managed.
    Preamble(String),
    /// A host section.
    Host(HostBlock),
    /// A `Match` section up to the next header. Kept verbatim, never classified.
    Match(String),
}

impl Block {
    pub fn raw(&self) -> &str {
        match self {
            Block::Preamble(text) | Block::Match(text) => text,
            Block::Host(host) => host.raw(),
        }
    }

    pub fn as_host(&self) -> Option<&HostBlock> {
        match self {
            Block::Host(host) => Some(host),
            Block::Preamble(_) | Block::Match(_) => None,
        }
    }
}

/// Ordered blocks of one SSH config file. Always starts with a preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfigDocument {
    blocks: Vec<Block>,
}

impl SshConfigDocument {
    /// Split `text` into a preamble followed by host and match blocks.
    ///
    /// Parsing never fails; lines that do not fit the expected shape stay in
    /// whichever block they appear in and simply never match a lookup.
    pub fn parse(text: &str) -> Self {
        let mut blocks = vec![Block::Preamble(String::new())];

        for line in text.split_inclusive('\n') {
            if is_host_header(line) {
                blocks.push(Block::Host(HostBlock::from_raw(line)));
                continue;
            }
            if is_match_header(line) {
                blocks.push(Block::Match(line.to_string()));
                continue;
            }

            // blocks always holds at least the preamble
            if let Some(last) = blocks.last_mut() {
                match last {
                    Block::Preamble(text) | Block::Match(text) => text.push_str(line),
                    Block::Host(host) => host.raw.push_str(line),
                }
            }
        }

        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Host blocks in document order.
    pub fn hosts(&self) -> impl Iterator<Item = &HostBlock> {
        self.blocks.iter().filter_map(Block::as_host)
    }

    pub fn host_count(&self) -> usize {
        self.hosts().count()
    }

    /// Append a host block after all existing content.
    ///
    /// If the document text does not end in a newline, one is added to the
    /// previous block so the new header starts on its own line.
    pub fn push_host(&mut self, host: HostBlock) {
        if let Some(last) = self.blocks.last_mut() {
            match last {
                Block::Preamble(text) | Block::Match(text) if !text.is_empty() && !text.ends_with('\n') => {
                    text.push('\n');
                }
                Block::Host(prev) if !prev.ends_with_newline() => prev.raw.push('\n'),
                _ => {}
            }
        }
        self.blocks.push(Block::Host(host));
    }

    /// Keep only the host blocks for which `keep` returns true.
    /// The preamble and match sections are always kept. Relative order is preserved.
    pub fn retain_hosts<F>(&mut self, mut keep: F)
    where
        F: FnMut(&HostBlock) -> bool,
    {
        self.blocks.retain(|block| match block {
            Block::Preamble(_) | Block::Match(_) => true,
            Block::Host(host) => keep(host),
        });
    }
}

impl fmt::Display for SshConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            f.write_str(block.raw())?;
        }
        Ok(())
    }
}

/// Returns the text after the `Host` keyword when `line` is a host header.
fn header_rest(line: &str) -> Option<&str> {
    keyword_rest(line, HOST_KEYWORD)
}

fn keyword_rest<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let trimmed = line.trim_start();
    let head = trimmed.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }

    let rest = &trimmed[keyword.len()..];
    match rest.chars().next() {
        // `Host` alone on a line is still a header, just without an alias
        None => Some(""),
        Some(c) if c.is_whitespace() => Some(rest.trim_start().trim_start_matches('=')),
        Some('=') => Some(&rest[1..]),
        // `HostName`, `Hostkeyalias`, ...
        Some(_) => None,
    }
}

fn is_host_header(line: &str) -> bool {
    header_rest(line).is_some()
}

fn is_match_header(line: &str) -> bool {
    keyword_rest(line, MATCH_KEYWORD).is_some()
}

/// Split `Key Value` / `Key=Value` / `Key = Value`. Comments and blank lines
/// yield `None`, as do keys with no value.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let key_end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let key = &line[..key_end];
    let value = line[key_end..].trim_start();
    let value = value.strip_prefix('=').unwrap_or(value).trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }

    Some((key, value))
}
