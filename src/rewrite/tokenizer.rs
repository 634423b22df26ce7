//! Streaming HTML tokenizer.
//!
//! A pull-based token iterator over a chunked byte stream: feed bytes with
//! [`Tokenizer::feed`], drain tokens with [`Tokenizer::next_token`], and call
//! [`Tokenizer::finish`] at end of input. Tokens carry absolute byte offsets
//! into the document. The tokenizer retains only unconsumed bytes; its
//! [`Tokenizer::dropped_bytes`] watermark tells the caller when a token's raw
//! source has already left the internal buffer (plain text spanning feeds),
//! at which point the caller's own recovery window is authoritative.
//!
//! Bytes are handled as ISO-8859-1 throughout: one byte is one char, so byte
//! offsets and char offsets coincide and non-ASCII sequences survive
//! re-encoding untouched.

/// Absolute byte range of a token in the input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One parsed attribute. `has_value` distinguishes `<script async>` from
/// `<script async="">`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
    pub has_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    pub attrs: Vec<Attr>,
    pub self_closing: bool,
    pub span: Span,
}

impl StartTag {
    /// Value of the named attribute, if present.
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Re-serialize the tag. Attribute values are double-quoted with `&` and
    /// `"` escaped; non-latin1 chars become numeric references.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 2 + self.attrs.len() * 8);
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attrs {
            out.push(' ');
            out.push_str(&attr.name);
            if attr.has_value {
                out.push_str("=\"");
                out.push_str(&escape_attr(&attr.value));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push('/');
        }
        out.push('>');
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndTag {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextToken {
    pub text: String,
    pub span: Span,
}

/// Markup passed through untouched: comments, doctype, processing
/// instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Start(StartTag),
    End(EndTag),
    Text(TextToken),
    Raw(RawToken),
}

impl Token {
    pub fn span(&self) -> Span {
        match self {
            Token::Start(t) => t.span,
            Token::End(t) => t.span,
            Token::Text(t) => t.span,
            Token::Raw(t) => t.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Data,
    /// Inside a raw-text element; text runs to the matching close tag.
    RawText(String),
}

enum RawEnd {
    Found(usize),
    NeedMore { consume_to: usize },
    Eof,
}

#[derive(Debug)]
pub struct Tokenizer {
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`; equal to the count of dropped bytes.
    base: usize,
    /// Scan cursor within `buf`.
    pos: usize,
    state: State,
    /// Pending text run, latin1-decoded; may span feeds.
    text: String,
    /// Absolute start offset of the pending text run.
    text_start: usize,
    eof: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            base: 0,
            pos: 0,
            state: State::Data,
            text: String::new(),
            text_start: 0,
            eof: false,
        }
    }

    /// Supply the next input chunk.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Signal end of input; pending bytes become trailing text.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// Count of input bytes no longer held in the internal buffer. A token
    /// whose span starts below this watermark cannot be served verbatim from
    /// here.
    pub fn dropped_bytes(&self) -> usize {
        self.base
    }

    /// Produce the next token, or `None` when more input is needed (or, after
    /// [`finish`](Self::finish), when the document is exhausted).
    pub fn next_token(&mut self) -> Option<Token> {
        loop {
            if let State::RawText(tag) = &self.state {
                let tag = tag.clone();
                match self.find_rawtext_end(&tag) {
                    RawEnd::Found(i) => {
                        self.push_text_to(i);
                        self.state = State::Data;
                        if let Some(t) = self.take_text() {
                            return Some(t);
                        }
                        continue;
                    }
                    RawEnd::NeedMore { consume_to } => {
                        self.push_text_to(consume_to);
                        return self.hold();
                    }
                    RawEnd::Eof => {
                        let len = self.buf.len();
                        self.push_text_to(len);
                        self.state = State::Data;
                        return self.take_text();
                    }
                }
            }

            // Data state: plain text up to the next '<'
            match self.buf[self.pos..].iter().position(|&b| b == b'<') {
                None => {
                    let len = self.buf.len();
                    self.push_text_to(len);
                    if self.eof {
                        return self.take_text();
                    }
                    return self.hold();
                }
                Some(0) => {}
                Some(n) => {
                    let to = self.pos + n;
                    self.push_text_to(to);
                }
            }

            let len = self.buf.len();
            if self.pos + 1 >= len {
                return self.trailing_text_or_hold();
            }

            match self.buf[self.pos + 1] {
                b'/' => {
                    if self.pos + 2 >= len {
                        return self.trailing_text_or_hold();
                    }
                    if self.buf[self.pos + 2].is_ascii_alphabetic() {
                        match self.find_byte(self.pos + 2, b'>') {
                            Some(g) => {
                                if let Some(t) = self.take_text() {
                                    return Some(t);
                                }
                                return Some(self.emit_end_tag(g));
                            }
                            None => return self.trailing_text_or_hold(),
                        }
                    } else {
                        // "</" followed by non-letter opens a bogus comment
                        if let Some(t) = self.bogus_through_gt() {
                            return Some(t);
                        }
                        if self.eof && self.pos >= self.buf.len() {
                            return None;
                        }
                        if !self.eof {
                            return self.hold();
                        }
                    }
                }
                c if c.is_ascii_alphabetic() => match self.find_tag_end(self.pos) {
                    Some(g) => {
                        if let Some(t) = self.take_text() {
                            return Some(t);
                        }
                        return Some(Token::Start(self.parse_start_tag(g)));
                    }
                    None => return self.trailing_text_or_hold(),
                },
                b'!' => {
                    if len - self.pos < 4 && !self.eof {
                        return self.hold();
                    }
                    if self.buf[self.pos..].starts_with(b"<!--") {
                        match find_subslice(&self.buf[self.pos + 4..], b"-->") {
                            Some(k) => {
                                if let Some(t) = self.take_text() {
                                    return Some(t);
                                }
                                return Some(self.emit_raw(self.pos + 4 + k + 3));
                            }
                            None => {
                                if self.eof {
                                    if let Some(t) = self.take_text() {
                                        return Some(t);
                                    }
                                    if self.pos >= len {
                                        return None;
                                    }
                                    return Some(self.emit_raw(len));
                                }
                                return self.hold();
                            }
                        }
                    } else {
                        // doctype or bogus markup declaration
                        if let Some(t) = self.bogus_through_gt() {
                            return Some(t);
                        }
                        if self.eof && self.pos >= self.buf.len() {
                            return None;
                        }
                        if !self.eof {
                            return self.hold();
                        }
                    }
                }
                b'?' => {
                    if let Some(t) = self.bogus_through_gt() {
                        return Some(t);
                    }
                    if self.eof && self.pos >= self.buf.len() {
                        return None;
                    }
                    if !self.eof {
                        return self.hold();
                    }
                }
                _ => {
                    // '<' that does not open markup is text
                    if self.text.is_empty() {
                        self.text_start = self.base + self.pos;
                    }
                    self.text.push('<');
                    self.pos += 1;
                }
            }
        }
    }

    fn emit_end_tag(&mut self, g: usize) -> Token {
        let raw = &self.buf[self.pos + 2..g];
        let name_len = raw
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .unwrap_or(raw.len());
        let name = to_lower(&raw[..name_len]);
        let span = Span {
            start: self.base + self.pos,
            end: self.base + g + 1,
        };
        self.pos = g + 1;
        Token::End(EndTag { name, span })
    }

    fn emit_raw(&mut self, end: usize) -> Token {
        let text = latin1(&self.buf[self.pos..end]);
        let span = Span {
            start: self.base + self.pos,
            end: self.base + end,
        };
        self.pos = end;
        Token::Raw(RawToken { text, span })
    }

    /// Bogus comment / doctype: everything through the next '>'. Returns
    /// `None` when the terminator is not buffered yet (caller holds) or the
    /// pending text must flush first.
    fn bogus_through_gt(&mut self) -> Option<Token> {
        match self.find_byte(self.pos + 1, b'>') {
            Some(g) => {
                if let Some(t) = self.take_text() {
                    return Some(t);
                }
                Some(self.emit_raw(g + 1))
            }
            None if self.eof => {
                if let Some(t) = self.take_text() {
                    return Some(t);
                }
                let len = self.buf.len();
                if self.pos >= len {
                    return None;
                }
                Some(self.emit_raw(len))
            }
            None => None,
        }
    }

    /// At end of buffer inside possible markup: at EOF the remainder is
    /// text, otherwise wait for more input.
    fn trailing_text_or_hold(&mut self) -> Option<Token> {
        if self.eof {
            let len = self.buf.len();
            self.push_text_to(len);
            return self.take_text();
        }
        self.hold()
    }

    /// Accumulate `buf[pos..to]` into the pending text run.
    fn push_text_to(&mut self, to: usize) {
        if to > self.pos {
            if self.text.is_empty() {
                self.text_start = self.base + self.pos;
            }
            self.text
                .extend(self.buf[self.pos..to].iter().map(|&b| b as char));
            self.pos = to;
        }
    }

    fn take_text(&mut self) -> Option<Token> {
        if self.text.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.text);
        let span = Span {
            start: self.text_start,
            end: self.base + self.pos,
        };
        Some(Token::Text(TextToken { text, span }))
    }

    /// Need more input: drop consumed bytes and yield to the feeder.
    fn hold(&mut self) -> Option<Token> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base += self.pos;
            self.pos = 0;
        }
        None
    }

    fn find_byte(&self, from: usize, needle: u8) -> Option<usize> {
        self.buf[from..]
            .iter()
            .position(|&b| b == needle)
            .map(|i| from + i)
    }

    /// Locate the '>' closing a start tag, skipping quoted attribute values.
    fn find_tag_end(&self, start: usize) -> Option<usize> {
        let mut in_quote: Option<u8> = None;
        let mut last = b'<';
        for i in (start + 1)..self.buf.len() {
            let c = self.buf[i];
            if let Some(q) = in_quote {
                if c == q {
                    in_quote = None;
                }
                continue;
            }
            match c {
                b'>' => return Some(i),
                b'"' | b'\'' if last == b'=' => in_quote = Some(c),
                _ => {}
            }
            if !c.is_ascii_whitespace() {
                last = c;
            }
        }
        None
    }

    fn parse_start_tag(&mut self, g: usize) -> StartTag {
        let start = self.pos;
        let inner: Vec<u8> = self.buf[start + 1..g].to_vec();
        let mut i = 0;

        while i < inner.len() && !inner[i].is_ascii_whitespace() && inner[i] != b'/' {
            i += 1;
        }
        let name = to_lower(&inner[..i]);

        let mut attrs = Vec::new();
        let mut self_closing = false;
        loop {
            while i < inner.len() && inner[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= inner.len() {
                break;
            }
            if inner[i] == b'/' {
                if i == inner.len() - 1 {
                    self_closing = true;
                }
                i += 1;
                continue;
            }

            let ns = i;
            while i < inner.len()
                && !inner[i].is_ascii_whitespace()
                && inner[i] != b'='
                && inner[i] != b'/'
            {
                i += 1;
            }
            let attr_name = to_lower(&inner[ns..i]);

            let mut ws = i;
            while ws < inner.len() && inner[ws].is_ascii_whitespace() {
                ws += 1;
            }
            if ws < inner.len() && inner[ws] == b'=' {
                i = ws + 1;
                while i < inner.len() && inner[i].is_ascii_whitespace() {
                    i += 1;
                }
                let value = if i < inner.len() && (inner[i] == b'"' || inner[i] == b'\'') {
                    let quote = inner[i];
                    i += 1;
                    let vs = i;
                    while i < inner.len() && inner[i] != quote {
                        i += 1;
                    }
                    let v = latin1(&inner[vs..i]);
                    if i < inner.len() {
                        i += 1;
                    }
                    v
                } else {
                    let vs = i;
                    while i < inner.len() && !inner[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    latin1(&inner[vs..i])
                };
                attrs.push(Attr {
                    name: attr_name,
                    value: decode_entities(&value),
                    has_value: true,
                });
            } else if !attr_name.is_empty() {
                attrs.push(Attr {
                    name: attr_name,
                    value: String::new(),
                    has_value: false,
                });
            }
        }

        let span = Span {
            start: self.base + start,
            end: self.base + g + 1,
        };
        self.pos = g + 1;

        if !self_closing && (name == "script" || name == "style") {
            self.state = State::RawText(name.clone());
        }

        StartTag {
            name,
            attrs,
            self_closing,
            span,
        }
    }

    /// Find the close tag ending a raw-text run, case-insensitively, with the
    /// name followed by '>', '/', or whitespace.
    fn find_rawtext_end(&self, tag: &str) -> RawEnd {
        let len = self.buf.len();
        let mut i = self.pos;
        while i + 1 < len {
            if self.buf[i] == b'<' && self.buf[i + 1] == b'/' {
                let rest = &self.buf[i + 2..];
                if rest.len() >= tag.len() {
                    if rest[..tag.len()].eq_ignore_ascii_case(tag.as_bytes()) {
                        match rest.get(tag.len()) {
                            Some(&c) if c == b'>' || c == b'/' || c.is_ascii_whitespace() => {
                                return RawEnd::Found(i);
                            }
                            Some(_) => {}
                            None if self.eof => return RawEnd::Found(i),
                            None => return RawEnd::NeedMore { consume_to: i },
                        }
                    }
                } else if rest.eq_ignore_ascii_case(&tag.as_bytes()[..rest.len()]) {
                    if self.eof {
                        return RawEnd::Eof;
                    }
                    return RawEnd::NeedMore { consume_to: i };
                }
            }
            i += 1;
        }
        if self.eof {
            return RawEnd::Eof;
        }
        // keep a tail that could be a prefix of the close tag
        let keep = tag.len() + 3;
        RawEnd::NeedMore {
            consume_to: len.saturating_sub(keep).max(self.pos),
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn to_lower(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b.to_ascii_lowercase() as char)
        .collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

/// Escape an attribute value for double-quoted serialization.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c if (c as u32) > 0xff => {
                out.push_str(&format!("&#x{:X};", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Decode character references in an attribute value. Unknown references are
/// kept literally; re-escaping keeps the decoded value intact either way.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i..];

        let window = &rest[..rest.len().min(12)];
        if let Some(end) = window.find(';') {
            if let Some(c) = lookup_entity(&rest[1..end]) {
                out.push(c);
                rest = &rest[end + 1..];
                continue;
            }
        }
        out.push('&');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

fn lookup_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = if let Some(hex) = digits.strip_prefix(['x', 'X']) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                digits.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}
