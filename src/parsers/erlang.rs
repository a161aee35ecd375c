//! Lightweight Erlang scanner producing POIs, specs, and doc comments.
//!
//! This is not a full parser. It masks comments, strings, quoted atoms and
//! character literals, splits the source into forms at terminating dots, and
//! then recognises attributes, function clauses, calls, implicit funs, macro
//! and record uses with regular expressions over the masked text. Masking
//! replaces every byte with a space, so byte offsets in the masked text are
//! valid offsets into the original.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use super::{FunctionFact, ParseError, ParsedSource, PoiParser};
use crate::index::poi::{Mfa, Poi, PoiId, PoiKind, PoiPosition, PoiRange};

const ATOM: &str = r"[a-z][A-Za-z0-9_@]*";

static ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-\s*([a-z][A-Za-z0-9_]*)").expect("static regex"));
static MODULE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^-\s*module\s*\(\s*({ATOM})")).expect("static regex"));
static DEFINE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-\s*define\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)").expect("static regex")
});
static RECORD_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^-\s*record\s*\(\s*({ATOM})")).expect("static regex"));
static SPEC_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^-\s*(?:spec|callback)\s+({ATOM})\s*\(")).expect("static regex")
});
static TYPE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^-\s*(?:type|opaque)\s+({ATOM})\s*\(")).expect("static regex")
});
static FUNCTION_ARITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\b({ATOM})\s*/\s*(\d+)")).expect("static regex"));
static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b(?:({ATOM})\s*:\s*)?({ATOM})\s*\(")).expect("static regex")
});
static IMPLICIT_FUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\bfun\s+(?:({ATOM})\s*:\s*)?({ATOM})\s*/\s*(\d+)")).expect("static regex")
});
static MACRO_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?\??([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"));
static RECORD_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"#({ATOM})\s*[{{.]")).expect("static regex"));
static CLAUSE_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?m)^({ATOM})\s*\(")).expect("static regex"));

const KEYWORDS: &[&str] = &[
    "after", "and", "andalso", "band", "begin", "bnot", "bor", "bsl", "bsr", "bxor", "case",
    "catch", "div", "else", "end", "fun", "if", "maybe", "not", "of", "or", "orelse", "receive",
    "rem", "try", "when", "xor",
];

/// Auto-imported BIFs resolved to `erlang` unless the module defines them.
const AUTO_IMPORTED: &[(&str, u32)] = &[
    ("abs", 1), ("apply", 2), ("apply", 3), ("atom_to_binary", 1), ("atom_to_list", 1),
    ("binary_to_atom", 1), ("binary_to_list", 1), ("byte_size", 1), ("element", 2),
    ("error", 1), ("error", 2), ("exit", 1), ("hd", 1), ("integer_to_binary", 1),
    ("integer_to_list", 1), ("is_atom", 1), ("is_binary", 1), ("is_boolean", 1),
    ("is_function", 1), ("is_function", 2), ("is_integer", 1), ("is_list", 1), ("is_map", 1),
    ("is_pid", 1), ("is_tuple", 1), ("length", 1), ("list_to_atom", 1), ("list_to_binary", 1),
    ("list_to_integer", 1), ("list_to_tuple", 1), ("make_ref", 0), ("map_size", 1),
    ("node", 0), ("round", 1), ("self", 0), ("setelement", 3), ("size", 1), ("spawn", 1),
    ("spawn", 3), ("spawn_link", 1), ("spawn_link", 3), ("throw", 1), ("tl", 1),
    ("tuple_size", 1), ("tuple_to_list", 1),
];

/// Attributes whose bodies are type expressions.
const TYPE_ATTRIBUTES: &[&str] = &["spec", "callback", "type", "opaque", "record"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ErlangScanner;

impl ErlangScanner {
    pub fn new() -> Self {
        Self
    }
}

impl PoiParser for ErlangScanner {
    fn parse(&self, text: &str) -> Result<ParsedSource, ParseError> {
        Scan::new(text)?.run()
    }
}

/// Byte offset to 1-based line/column (columns count chars).
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> u32 {
        self.starts.partition_point(|&s| s <= offset) as u32
    }

    fn position(&self, text: &str, offset: usize) -> PoiPosition {
        let line = self.line_of(offset);
        let start = self.starts[(line - 1) as usize];
        let column = text
            .get(start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(offset - start);
        PoiPosition::new(line, column as u32 + 1)
    }
}

struct Masked {
    text: String,
    comments: Vec<Range<usize>>,
    /// Full-line comments by 1-based line, leading `%` kept.
    comment_lines: HashMap<u32, String>,
}

fn blank_into(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        out.extend(std::iter::repeat_n(' ', c.len_utf8()));
    }
}

fn mask(text: &str) -> Result<Masked, ParseError> {
    #[derive(Clone, Copy)]
    enum State {
        Code,
        Quoted { delimiter: char, opened_at: usize },
        Comment { start: usize, full_line: bool },
    }

    let lines = LineIndex::new(text);
    let mut out = String::with_capacity(text.len());
    let mut comments = Vec::new();
    let mut comment_lines = HashMap::new();
    let mut state = State::Code;
    let mut line_has_code = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match state {
            State::Code => match c {
                '%' => {
                    state = State::Comment {
                        start: i,
                        full_line: !line_has_code,
                    };
                    out.push(' ');
                }
                '"' | '\'' => {
                    state = State::Quoted {
                        delimiter: c,
                        opened_at: i,
                    };
                    line_has_code = true;
                    out.push(c);
                }
                '$' => {
                    line_has_code = true;
                    out.push('$');
                    // Character literal: the next char (or escape) is data.
                    if let Some((_, next)) = chars.next() {
                        blank_into(&mut out, next);
                        if next == '\\' {
                            if let Some((_, escaped)) = chars.next() {
                                blank_into(&mut out, escaped);
                            }
                        }
                    }
                }
                '\n' => {
                    line_has_code = false;
                    out.push('\n');
                }
                c => {
                    if !c.is_whitespace() {
                        line_has_code = true;
                    }
                    out.push(c);
                }
            },
            State::Quoted { delimiter, .. } => {
                if c == '\\' {
                    out.push(' ');
                    if let Some((_, escaped)) = chars.next() {
                        blank_into(&mut out, escaped);
                    }
                } else if c == delimiter {
                    out.push(c);
                    state = State::Code;
                } else {
                    blank_into(&mut out, c);
                }
            }
            State::Comment { start, full_line } => {
                if c == '\n' {
                    comments.push(start..i);
                    if full_line {
                        comment_lines.insert(lines.line_of(start), text[start..i].to_string());
                    }
                    state = State::Code;
                    line_has_code = false;
                    out.push('\n');
                } else {
                    blank_into(&mut out, c);
                }
            }
        }
    }

    match state {
        State::Quoted { delimiter, opened_at } => {
            let at = lines.position(text, opened_at);
            Err(ParseError::new(
                at.line,
                at.column,
                format!("unterminated {delimiter}"),
            ))
        }
        State::Comment { start, full_line } => {
            comments.push(start..text.len());
            if full_line {
                comment_lines.insert(lines.line_of(start), text[start..].to_string());
            }
            Ok(Masked {
                text: out,
                comments,
                comment_lines,
            })
        }
        State::Code => Ok(Masked {
            text: out,
            comments,
            comment_lines,
        }),
    }
}

/// Splits masked text into forms ending at a top-level `.` followed by
/// whitespace or end of input. Unbalanced brackets are an error.
fn split_forms(masked: &str) -> Result<Vec<Range<usize>>, (usize, String)> {
    let bytes = masked.as_bytes();
    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut forms = Vec::new();
    let mut start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => stack.push((b, i)),
            b')' | b']' | b'}' => {
                let expected = match b {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err((i, format!("unexpected '{}'", b as char))),
                }
            }
            b'.' if stack.is_empty() => {
                let terminates = bytes
                    .get(i + 1)
                    .is_none_or(|next| next.is_ascii_whitespace() || *next == b'%');
                if terminates {
                    forms.push(start..i + 1);
                    start = i + 1;
                }
            }
            _ => {}
        }
    }
    if let Some(&(open, at)) = stack.last() {
        return Err((at, format!("unclosed '{}'", open as char)));
    }
    if masked[start..].trim().is_empty() {
        Ok(forms)
    } else {
        forms.push(start..masked.len());
        Ok(forms)
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'@'
}

/// Counts the arguments of the call whose `(` is at `open`, returning the
/// arity and the offset of the matching `)`.
fn count_args(text: &str, open: usize) -> Option<(u32, usize)> {
    let bytes = text.as_bytes();
    let mut depth = 0u32;
    let mut blocks = 0u32;
    let mut commas = 0u32;
    let mut has_content = false;
    let mut i = open + 1;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'(' | b'[' | b'{' => {
                depth += 1;
                has_content = true;
            }
            b')' | b']' | b'}' => {
                if depth == 0 {
                    if b != b')' {
                        return None;
                    }
                    let arity = if has_content { commas + 1 } else { 0 };
                    return Some((arity, i));
                }
                depth -= 1;
            }
            b',' if depth == 0 && blocks == 0 => commas += 1,
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let end = (i..bytes.len())
                    .find(|&j| !is_word_byte(bytes[j]))
                    .unwrap_or(bytes.len());
                match &text[i..end] {
                    "case" | "if" | "receive" | "begin" | "try" | "maybe" => blocks += 1,
                    "fun" if text[end..].trim_start().starts_with('(') => blocks += 1,
                    "end" => blocks = blocks.saturating_sub(1),
                    _ => {}
                }
                has_content = true;
                i = end;
                continue;
            }
            b if !b.is_ascii_whitespace() => has_content = true,
            _ => {}
        }
        i += 1;
    }
    None
}

fn clean_comment_line(raw: &str) -> String {
    let body = raw.trim_start().trim_start_matches('%');
    let body = body.strip_prefix(' ').unwrap_or(body).trim_end();
    let body = body.strip_prefix("@doc").map(str::trim_start).unwrap_or(body);
    if body == "@end" {
        String::new()
    } else {
        body.to_string()
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

enum FormKind {
    Attribute(String),
    Function { name: String, arity: u32 },
    Other,
}

struct Form {
    range: Range<usize>,
    kind: FormKind,
}

struct Scan<'a> {
    original: &'a str,
    masked: Masked,
    lines: LineIndex,
    out: ParsedSource,
}

impl<'a> Scan<'a> {
    fn new(original: &'a str) -> Result<Self, ParseError> {
        Ok(Self {
            original,
            masked: mask(original)?,
            lines: LineIndex::new(original),
            out: ParsedSource::default(),
        })
    }

    fn pos(&self, offset: usize) -> PoiPosition {
        self.lines.position(self.original, offset)
    }

    fn range(&self, start: usize, end: usize) -> PoiRange {
        PoiRange::new(self.pos(start), self.pos(end))
    }

    fn push(&mut self, kind: PoiKind, id: PoiId, start: usize, end: usize) {
        let range = self.range(start, end);
        self.out.pois.push(Poi::new(kind, id, range));
    }

    fn masked(&self) -> &str {
        &self.masked.text
    }

    fn run(mut self) -> Result<ParsedSource, ParseError> {
        let forms = split_forms(self.masked()).map_err(|(at, message)| {
            let at = self.pos(at);
            ParseError::new(at.line, at.column, message)
        })?;
        let forms: Vec<Form> = forms.into_iter().map(|range| self.classify(range)).collect();

        let local: HashSet<(String, u32)> = forms
            .iter()
            .filter_map(|form| match &form.kind {
                FormKind::Function { name, arity } => Some((name.clone(), *arity)),
                _ => None,
            })
            .collect();

        let mut spec_spans: HashMap<(String, u32), (u32, u32)> = HashMap::new();
        for form in &forms {
            match &form.kind {
                FormKind::Attribute(name) => {
                    self.scan_attribute(name, form.range.clone(), &local, &mut spec_spans)
                }
                FormKind::Function { name, arity } => {
                    self.scan_function(name, *arity, form.range.clone(), &local, &spec_spans)
                }
                FormKind::Other => {}
            }
        }
        trace!("Scanned {} forms into {} POIs", forms.len(), self.out.pois.len());
        Ok(self.out)
    }

    fn classify(&self, range: Range<usize>) -> Form {
        let raw = &self.masked()[range.clone()];
        let lead = raw.len() - raw.trim_start().len();
        let range = range.start + lead..range.end;
        let body = &self.masked()[range.clone()];

        let kind = if let Some(caps) = ATTRIBUTE.captures(body) {
            FormKind::Attribute(caps[1].to_string())
        } else if let Some(caps) = CLAUSE_HEAD.captures(body).filter(|c| c.get(0).is_some_and(|m| m.start() == 0)) {
            let name = caps[1].to_string();
            let open = range.start + caps.get(0).map_or(0, |m| m.end()) - 1;
            match count_args(self.masked(), open) {
                Some((arity, _)) => FormKind::Function { name, arity },
                None => FormKind::Other,
            }
        } else {
            FormKind::Other
        };
        Form { range, kind }
    }

    fn scan_attribute(
        &mut self,
        attribute: &str,
        range: Range<usize>,
        local: &HashSet<(String, u32)>,
        spec_spans: &mut HashMap<(String, u32), (u32, u32)>,
    ) {
        let base = range.start;
        let body = self.masked()[range.clone()].to_string();
        // Attribute and definition names are not calls.
        let mut skip: HashSet<usize> = ATTRIBUTE
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| base + m.start())
            .into_iter()
            .collect();

        match attribute {
            "module" => {
                if let Some(m) = MODULE_ATTR.captures(&body).and_then(|c| c.get(1)) {
                    self.out.module = Some(m.as_str().to_string());
                    self.push(PoiKind::Module, PoiId::name(m.as_str()), base + m.start(), base + m.end());
                }
            }
            "export" => {
                for caps in FUNCTION_ARITY.captures_iter(&body) {
                    let (Some(whole), Ok(arity)) = (caps.get(0), caps[2].parse::<u32>()) else {
                        continue;
                    };
                    self.push(
                        PoiKind::ExportEntry,
                        PoiId::fa(&caps[1], arity),
                        base + whole.start(),
                        base + whole.end(),
                    );
                }
            }
            "define" => {
                if let Some(m) = DEFINE_ATTR.captures(&body).and_then(|c| c.get(1)) {
                    skip.insert(base + m.start());
                    self.push(PoiKind::Define, PoiId::name(m.as_str()), range.start, range.end);
                }
            }
            "record" => {
                if let Some(m) = RECORD_ATTR.captures(&body).and_then(|c| c.get(1)) {
                    self.push(PoiKind::RecordDef, PoiId::name(m.as_str()), range.start, range.end);
                }
            }
            "spec" | "callback" => {
                if let Some(caps) = SPEC_ATTR.captures(&body) {
                    let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
                        return;
                    };
                    if let Some((arity, _)) = count_args(self.masked(), base + whole.end() - 1) {
                        let function = name.as_str().to_string();
                        skip.insert(base + name.start());
                        self.push(PoiKind::Spec, PoiId::fa(&function, arity), range.start, range.end);
                        if attribute == "spec" {
                            let text = self.uncommented(base + name.start(), range.end);
                            self.out
                                .specs
                                .push(FunctionFact::new(&function, arity, collapse_whitespace(&text)));
                            let span = (self.lines.line_of(range.start), self.lines.line_of(range.end - 1));
                            spec_spans.insert((function, arity), span);
                        }
                    }
                }
            }
            "type" | "opaque" => {
                if let Some(caps) = TYPE_ATTR.captures(&body) {
                    let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
                        return;
                    };
                    if let Some((arity, _)) = count_args(self.masked(), base + whole.end() - 1) {
                        skip.insert(base + name.start());
                        self.push(PoiKind::TypeDefinition, PoiId::fa(name.as_str(), arity), range.start, range.end);
                    }
                }
            }
            _ => {}
        }

        if TYPE_ATTRIBUTES.contains(&attribute) {
            self.scan_calls(range.clone(), PoiKind::TypeApplication, &skip, local);
        } else if attribute == "define" {
            self.scan_calls(range.clone(), PoiKind::Application, &skip, local);
        }
        self.scan_uses(range);
    }

    fn scan_function(
        &mut self,
        name: &str,
        arity: u32,
        range: Range<usize>,
        local: &HashSet<(String, u32)>,
        spec_spans: &HashMap<(String, u32), (u32, u32)>,
    ) {
        self.push(PoiKind::Function, PoiId::fa(name, arity), range.start, range.end);

        let body = self.masked()[range.clone()].to_string();
        let mut heads = HashSet::new();
        for caps in CLAUSE_HEAD.captures_iter(&body) {
            let Some(m) = caps.get(1) else { continue };
            let start = range.start + m.start();
            let at_line_start = start == 0 || self.masked().as_bytes()[start - 1] == b'\n';
            if m.as_str() != name || !at_line_start {
                continue;
            }
            let Some(whole) = caps.get(0) else { continue };
            if let Some((clause_arity, _)) = count_args(self.masked(), range.start + whole.end() - 1) {
                if clause_arity == arity {
                    heads.insert(start);
                    self.push(PoiKind::FunctionClause, PoiId::fa(name, arity), start, range.start + m.end());
                }
            }
        }

        if let Some(comment) = self.leading_comment(name, arity, range.start, spec_spans) {
            self.out.comments.push(FunctionFact::new(name, arity, comment));
        }

        self.scan_calls(range.clone(), PoiKind::Application, &heads, local);
        self.scan_implicit_funs(range.clone());
        self.scan_uses(range);
    }

    fn scan_calls(
        &mut self,
        range: Range<usize>,
        kind: PoiKind,
        skip: &HashSet<usize>,
        local: &HashSet<(String, u32)>,
    ) {
        let body = self.masked()[range.clone()].to_string();
        for caps in CALL.captures_iter(&body) {
            let (Some(whole), Some(function)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let start = range.start + whole.start();
            let fn_start = range.start + function.start();
            if skip.contains(&fn_start) {
                continue;
            }
            if KEYWORDS.contains(&function.as_str()) {
                continue;
            }
            let before = self.masked()[..start].trim_end();
            if before.ends_with('?') || before.ends_with('#') {
                continue;
            }
            let implicit_module = caps.get(1).is_none() && before.ends_with(':');
            if implicit_module && !before[..before.len() - 1].trim_end().ends_with("?MODULE") {
                // Dynamic `Mod:f(...)`; the module is unknown statically.
                continue;
            }
            let Some((arity, close)) = count_args(self.masked(), range.start + whole.end() - 1) else {
                continue;
            };
            let function = function.as_str();
            let id = match caps.get(1) {
                Some(module) => PoiId::Mfa(Mfa::new(module.as_str(), function, arity)),
                None if kind == PoiKind::Application
                    && !implicit_module
                    && AUTO_IMPORTED.contains(&(function, arity))
                    && !local.contains(&(function.to_string(), arity)) =>
                {
                    PoiId::Mfa(Mfa::new("erlang", function, arity))
                }
                None => PoiId::fa(function, arity),
            };
            self.push(kind.clone(), id, start, close + 1);
        }
    }

    fn scan_implicit_funs(&mut self, range: Range<usize>) {
        let body = self.masked()[range.clone()].to_string();
        for caps in IMPLICIT_FUN.captures_iter(&body) {
            let (Some(whole), Ok(arity)) = (caps.get(0), caps[3].parse::<u32>()) else {
                continue;
            };
            let id = match caps.get(1) {
                Some(module) => PoiId::Mfa(Mfa::new(module.as_str(), &caps[2], arity)),
                None => PoiId::fa(&caps[2], arity),
            };
            self.push(PoiKind::ImplicitFun, id, range.start + whole.start(), range.start + whole.end());
        }
    }

    fn scan_uses(&mut self, range: Range<usize>) {
        let body = self.masked()[range.clone()].to_string();
        for caps in MACRO_USE.captures_iter(&body) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            self.push(
                PoiKind::MacroUse,
                PoiId::name(name.as_str()),
                range.start + whole.start(),
                range.start + whole.end(),
            );
        }
        for caps in RECORD_USE.captures_iter(&body) {
            let Some(name) = caps.get(1) else { continue };
            self.push(
                PoiKind::RecordUse,
                PoiId::name(name.as_str()),
                range.start + name.start() - 1,
                range.start + name.end(),
            );
        }
    }

    /// The `%` block directly above a function, or above its spec when the
    /// spec sits right on top of the function.
    fn leading_comment(
        &self,
        name: &str,
        arity: u32,
        start: usize,
        spec_spans: &HashMap<(String, u32), (u32, u32)>,
    ) -> Option<String> {
        let mut line = self.lines.line_of(start).checked_sub(1)?;
        if let Some(&(spec_start, spec_end)) = spec_spans.get(&(name.to_string(), arity)) {
            if spec_end == line {
                line = spec_start.checked_sub(1)?;
            }
        }
        let mut block = Vec::new();
        while line > 0 {
            let Some(raw) = self.masked.comment_lines.get(&line) else {
                break;
            };
            block.push(clean_comment_line(raw));
            line -= 1;
        }
        block.reverse();
        let text = block.join("\n").trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    /// Original text of `start..end` with comments removed.
    fn uncommented(&self, start: usize, end: usize) -> String {
        let mut text = String::new();
        let mut cursor = start;
        for comment in &self.masked.comments {
            if comment.end <= cursor || comment.start >= end {
                continue;
            }
            text.push_str(&self.original[cursor..comment.start.max(cursor)]);
            cursor = comment.end.min(end);
        }
        text.push_str(&self.original[cursor..end]);
        text
    }
}
