//! Incremental detection of tool-call syntax inside a live text stream.
//!
//! Backends that emit tool calls as embedded text rather than structured
//! fields need their deltas scanned as they arrive. The parser classifies
//! every byte of backend output exactly once: plain text is emitted
//! immediately, candidate tool-call spans are buffered until balanced, and
//! each completed candidate becomes either a parsed [`ToolCall`] or a
//! `failed` event carrying the raw span verbatim. Concatenating all text
//! deltas and all raw spans reproduces the backend output exactly.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::{
    ChatCompletionRequest, ChunkEvent, ToolCall, ToolCallDelta, ToolChoice, ToolPromptFormat,
};

/// Hard bound on a single candidate. A candidate that grows past this is
/// flushed as a parse failure rather than buffered indefinitely.
pub const MAX_CANDIDATE_BYTES: usize = 16 * 1024;

/// One classified span of backend output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// Plain text, emitted as soon as it is known not to start a candidate.
    Text { delta: String },
    /// A successfully parsed tool call and the raw span it came from.
    ToolCall {
        tool_call: ToolCall,
        raw_text: String,
    },
    /// A candidate that did not parse; the buffer is surfaced verbatim.
    Failed { raw_text: String },
}

impl From<ParserEvent> for ChunkEvent {
    fn from(event: ParserEvent) -> Self {
        match event {
            ParserEvent::Text { delta } => ChunkEvent::Text { delta },
            ParserEvent::ToolCall { tool_call, .. } => {
                ChunkEvent::ToolCall(ToolCallDelta::Succeeded { tool_call })
            }
            ParserEvent::Failed { raw_text } => {
                ChunkEvent::ToolCall(ToolCallDelta::Failed { raw_text })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    Scanning,
    InsideCandidate,
}

/// Stateful incremental parser over a sequence of raw text deltas.
///
/// Each inference call owns its own parser instance; the parser itself is
/// single-pass and never buffers beyond the current candidate.
#[derive(Debug)]
pub struct ToolCallParser {
    format: ToolPromptFormat,
    tools_in_scope: bool,
    mode: ParseMode,
    buffer: String,
    depth: u32,
    in_string: bool,
    quote: char,
    escaped: bool,
}

impl ToolCallParser {
    pub fn new(format: ToolPromptFormat, tools_in_scope: bool) -> Self {
        Self {
            format,
            tools_in_scope,
            mode: ParseMode::Scanning,
            buffer: String::new(),
            depth: 0,
            in_string: false,
            quote: '"',
            escaped: false,
        }
    }

    /// Build a parser for a request: candidate scanning only has meaning
    /// when tools are offered and tool use is not disabled.
    pub fn for_request(request: &ChatCompletionRequest) -> Self {
        let tools_in_scope =
            !request.tools.is_empty() && request.tool_choice != ToolChoice::None;
        let format = request.tool_prompt_format.unwrap_or(ToolPromptFormat::Json);
        Self::new(format, tools_in_scope)
    }

    /// Consume one incoming delta, returning every event it completes.
    ///
    /// Text ahead of a candidate marker is returned immediately; a marker
    /// split from its candidate body by a chunk boundary is still detected
    /// because candidate state persists across calls.
    pub fn feed(&mut self, delta: &str) -> Vec<ParserEvent> {
        if !self.tools_in_scope {
            if delta.is_empty() {
                return Vec::new();
            }
            return vec![ParserEvent::Text {
                delta: delta.to_string(),
            }];
        }

        let mut events = Vec::new();
        let mut text = String::new();

        for ch in delta.chars() {
            match self.mode {
                ParseMode::Scanning => {
                    if ch == self.start_marker() {
                        if !text.is_empty() {
                            events.push(ParserEvent::Text {
                                delta: std::mem::take(&mut text),
                            });
                        }
                        self.enter_candidate(ch);
                    } else {
                        text.push(ch);
                    }
                }
                ParseMode::InsideCandidate => {
                    self.buffer.push(ch);
                    self.track(ch);
                    if self.depth == 0 {
                        let raw = std::mem::take(&mut self.buffer);
                        events.extend(self.classify(raw));
                        self.mode = ParseMode::Scanning;
                    } else if self.buffer.len() > MAX_CANDIDATE_BYTES {
                        events.push(ParserEvent::Failed {
                            raw_text: std::mem::take(&mut self.buffer),
                        });
                        self.mode = ParseMode::Scanning;
                    }
                }
            }
        }

        if !text.is_empty() {
            events.push(ParserEvent::Text { delta: text });
        }
        events
    }

    /// Signal end of stream. An unterminated candidate is flushed as a
    /// single `failed` event so a truncated stream cannot pass for prose.
    pub fn finish(&mut self) -> Option<ParserEvent> {
        if self.mode == ParseMode::InsideCandidate && !self.buffer.is_empty() {
            self.mode = ParseMode::Scanning;
            return Some(ParserEvent::Failed {
                raw_text: std::mem::take(&mut self.buffer),
            });
        }
        None
    }

    fn start_marker(&self) -> char {
        match self.format {
            ToolPromptFormat::Json => '{',
            ToolPromptFormat::PythonList => '[',
        }
    }

    fn is_quote(&self, ch: char) -> bool {
        match self.format {
            ToolPromptFormat::Json => ch == '"',
            ToolPromptFormat::PythonList => ch == '"' || ch == '\'',
        }
    }

    fn enter_candidate(&mut self, marker: char) {
        self.mode = ParseMode::InsideCandidate;
        self.buffer.push(marker);
        self.depth = 1;
        self.in_string = false;
        self.escaped = false;
    }

    /// Update bracket/string state for one candidate character. The opening
    /// marker is accounted for by `enter_candidate`, not here.
    fn track(&mut self, ch: char) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == self.quote {
                self.in_string = false;
            }
            return;
        }
        if self.is_quote(ch) {
            self.in_string = true;
            self.quote = ch;
            return;
        }
        match ch {
            '(' | '[' | '{' => self.depth += 1,
            ')' | ']' | '}' => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
    }

    /// Structurally parse a balanced candidate into tool-call events, or a
    /// single failure event carrying the buffer verbatim.
    fn classify(&self, raw: String) -> Vec<ParserEvent> {
        match self.format {
            ToolPromptFormat::Json => classify_json(raw),
            ToolPromptFormat::PythonList => classify_python_list(raw),
        }
    }
}

fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// JSON candidates are single objects of the form
/// `{"type": "function", "name": ..., "parameters"|"arguments": {...}}`.
fn classify_json(raw: String) -> Vec<ParserEvent> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw) {
        let name = map.get("name").and_then(Value::as_str);
        let arguments = map
            .get("arguments")
            .or_else(|| map.get("parameters"))
            .and_then(Value::as_object);
        if let (Some(name), Some(arguments)) = (name, arguments) {
            let arguments: HashMap<String, Value> = arguments
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            return vec![ParserEvent::ToolCall {
                tool_call: ToolCall {
                    call_id: new_call_id(),
                    tool_name: name.to_string(),
                    arguments,
                },
                raw_text: raw,
            }];
        }
    }
    vec![ParserEvent::Failed { raw_text: raw }]
}

/// Python-list candidates look like `[name(key=value, ...), ...]`. Each
/// parsed call is emitted as its own event; the events' raw spans partition
/// the candidate buffer so accounting stays lossless.
fn classify_python_list(raw: String) -> Vec<ParserEvent> {
    match parse_python_call_list(&raw) {
        Ok(calls) if !calls.is_empty() => {
            let starts: Vec<usize> = calls.iter().map(|(start, _)| *start).collect();
            calls
                .into_iter()
                .enumerate()
                .map(|(i, (_, tool_call))| {
                    let span_start = if i == 0 { 0 } else { starts[i] };
                    let span_end = starts.get(i + 1).copied().unwrap_or(raw.len());
                    ParserEvent::ToolCall {
                        tool_call,
                        raw_text: raw[span_start..span_end].to_string(),
                    }
                })
                .collect()
        }
        _ => vec![ParserEvent::Failed { raw_text: raw }],
    }
}

// --- Python call-list grammar ---

struct PyError;

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self { s, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            return true;
        }
        false
    }

    fn expect(&mut self, expected: char) -> Result<(), PyError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(PyError)
        }
    }

    fn ident(&mut self) -> Result<String, PyError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return Err(PyError),
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Ok(self.s[start..self.pos].to_string())
    }
}

/// Parse `[name(key=value, ...), ...]`, returning each call together with
/// the byte offset where its expression starts.
fn parse_python_call_list(raw: &str) -> Result<Vec<(usize, ToolCall)>, PyError> {
    let mut cursor = Cursor::new(raw);
    cursor.expect('[')?;
    cursor.skip_ws();

    let mut calls = Vec::new();
    if cursor.peek() != Some(']') {
        loop {
            cursor.skip_ws();
            let start = cursor.pos;
            let call = parse_python_call(&mut cursor)?;
            calls.push((start, call));
            cursor.skip_ws();
            if !cursor.eat(',') {
                break;
            }
        }
    }
    cursor.expect(']')?;
    cursor.skip_ws();
    if cursor.pos != raw.len() {
        return Err(PyError);
    }
    Ok(calls)
}

fn parse_python_call(cursor: &mut Cursor<'_>) -> Result<ToolCall, PyError> {
    let tool_name = cursor.ident()?;
    cursor.skip_ws();
    cursor.expect('(')?;
    cursor.skip_ws();

    let mut arguments = HashMap::new();
    if cursor.peek() != Some(')') {
        loop {
            cursor.skip_ws();
            let key = cursor.ident()?;
            cursor.skip_ws();
            cursor.expect('=')?;
            cursor.skip_ws();
            let value = parse_python_value(cursor)?;
            arguments.insert(key, value);
            cursor.skip_ws();
            if !cursor.eat(',') {
                break;
            }
        }
    }
    cursor.expect(')')?;
    Ok(ToolCall {
        call_id: new_call_id(),
        tool_name,
        arguments,
    })
}

fn parse_python_value(cursor: &mut Cursor<'_>) -> Result<Value, PyError> {
    match cursor.peek().ok_or(PyError)? {
        '\'' | '"' => parse_python_string(cursor).map(Value::String),
        '[' => {
            cursor.bump();
            let mut items = Vec::new();
            cursor.skip_ws();
            if cursor.peek() != Some(']') {
                loop {
                    cursor.skip_ws();
                    items.push(parse_python_value(cursor)?);
                    cursor.skip_ws();
                    if !cursor.eat(',') {
                        break;
                    }
                }
            }
            cursor.expect(']')?;
            Ok(Value::Array(items))
        }
        '{' => {
            cursor.bump();
            let mut map = serde_json::Map::new();
            cursor.skip_ws();
            if cursor.peek() != Some('}') {
                loop {
                    cursor.skip_ws();
                    let key = match cursor.peek().ok_or(PyError)? {
                        '\'' | '"' => parse_python_string(cursor)?,
                        _ => cursor.ident()?,
                    };
                    cursor.skip_ws();
                    cursor.expect(':')?;
                    cursor.skip_ws();
                    let value = parse_python_value(cursor)?;
                    map.insert(key, value);
                    cursor.skip_ws();
                    if !cursor.eat(',') {
                        break;
                    }
                }
            }
            cursor.expect('}')?;
            Ok(Value::Object(map))
        }
        c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
            parse_python_number(cursor)
        }
        c if c.is_ascii_alphabetic() || c == '_' => match cursor.ident()?.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            _ => Err(PyError),
        },
        _ => Err(PyError),
    }
}

fn parse_python_string(cursor: &mut Cursor<'_>) -> Result<String, PyError> {
    let quote = cursor.bump().ok_or(PyError)?;
    let mut out = String::new();
    loop {
        match cursor.bump().ok_or(PyError)? {
            '\\' => match cursor.bump().ok_or(PyError)? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                other => out.push(other),
            },
            c if c == quote => return Ok(out),
            c => out.push(c),
        }
    }
}

fn parse_python_number(cursor: &mut Cursor<'_>) -> Result<Value, PyError> {
    let start = cursor.pos;
    while matches!(
        cursor.peek(),
        Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
    ) {
        cursor.bump();
    }
    let literal = &cursor.s[start..cursor.pos];
    if let Ok(n) = literal.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    let n = literal.parse::<f64>().map_err(|_| PyError)?;
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or(PyError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Concatenate every event's accounted span.
    fn account(events: &[ParserEvent]) -> String {
        events
            .iter()
            .map(|event| match event {
                ParserEvent::Text { delta } => delta.as_str(),
                ParserEvent::ToolCall { raw_text, .. } => raw_text.as_str(),
                ParserEvent::Failed { raw_text } => raw_text.as_str(),
            })
            .collect()
    }

    fn feed_all(parser: &mut ToolCallParser, deltas: &[&str]) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        for delta in deltas {
            events.extend(parser.feed(delta));
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn python_list_call_split_across_deltas() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let events = feed_all(
            &mut parser,
            &["I'll check. ", "[get_weather(", "location='SF')]", " Done."],
        );

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            ParserEvent::Text {
                delta: "I'll check. ".to_string()
            }
        );
        match &events[1] {
            ParserEvent::ToolCall {
                tool_call,
                raw_text,
            } => {
                assert_eq!(tool_call.tool_name, "get_weather");
                assert_eq!(tool_call.arguments["location"], json!("SF"));
                assert_eq!(raw_text, "[get_weather(location='SF')]");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(
            events[2],
            ParserEvent::Text {
                delta: " Done.".to_string()
            }
        );
    }

    #[test]
    fn accounting_is_lossless_for_any_delta_boundaries() {
        let source = "Sure. [get_weather(location='San Francisco, CA', units='f')] then [broken(x";
        for size in 1..=source.len() {
            let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
            let mut events = Vec::new();
            let bytes = source.as_bytes();
            for chunk in bytes.chunks(size) {
                events.extend(parser.feed(std::str::from_utf8(chunk).unwrap()));
            }
            events.extend(parser.finish());
            assert_eq!(account(&events), source, "chunk size {size}");
        }
    }

    #[test]
    fn no_tools_short_circuits_to_text() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, false);
        let events = feed_all(&mut parser, &["see [1, 2, 3] and ", "{4: 5}"]);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| matches!(event, ParserEvent::Text { .. })));
        assert_eq!(account(&events), "see [1, 2, 3] and {4: 5}");
    }

    #[test]
    fn truncated_candidate_flushes_as_single_failure() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let mut events = parser.feed("thinking [get_weather(location=");
        events.extend(parser.finish());

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ParserEvent::Text {
                delta: "thinking ".to_string()
            }
        );
        assert_eq!(
            events[1],
            ParserEvent::Failed {
                raw_text: "[get_weather(location=".to_string()
            }
        );
        // Flush is idempotent.
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn json_candidate_parses_name_and_parameters() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::Json, true);
        let events = feed_all(
            &mut parser,
            &[
                "{\"type\": \"function\", \"name\": \"get_weather\", ",
                "\"parameters\": {\"location\": \"SF\"}}",
            ],
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParserEvent::ToolCall { tool_call, .. } => {
                assert_eq!(tool_call.tool_name, "get_weather");
                assert_eq!(tool_call.arguments["location"], json!("SF"));
                assert!(!tool_call.call_id.is_empty());
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_candidate_fails_with_verbatim_buffer() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::Json, true);
        let events = feed_all(&mut parser, &["{not json at all}"]);
        assert_eq!(
            events,
            vec![ParserEvent::Failed {
                raw_text: "{not json at all}".to_string()
            }]
        );
    }

    #[test]
    fn multiple_calls_partition_the_candidate_buffer() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let source = "[get_weather(location='SF'), get_time(zone='PST')]";
        let events = feed_all(&mut parser, &[source]);

        assert_eq!(events.len(), 2);
        let names: Vec<&str> = events
            .iter()
            .map(|event| match event {
                ParserEvent::ToolCall { tool_call, .. } => tool_call.tool_name.as_str(),
                other => panic!("expected tool call, got {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["get_weather", "get_time"]);
        assert_eq!(account(&events), source);
    }

    #[test]
    fn nested_literals_parse_into_json_values() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let events =
            feed_all(&mut parser, &["[configure(levels=[1, 2.5], flags={'dry_run': True, 'tag': None})]"]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParserEvent::ToolCall { tool_call, .. } => {
                assert_eq!(tool_call.arguments["levels"], json!([1, 2.5]));
                assert_eq!(
                    tool_call.arguments["flags"],
                    json!({"dry_run": true, "tag": null})
                );
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn brackets_inside_string_literals_do_not_close_the_candidate() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let source = "[note(text='list: [a, b] end')]";
        let events = feed_all(&mut parser, &[source]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParserEvent::ToolCall {
                tool_call,
                raw_text,
            } => {
                assert_eq!(tool_call.arguments["text"], json!("list: [a, b] end"));
                assert_eq!(raw_text, source);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn ordinary_bracket_text_becomes_a_failed_candidate() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let events = feed_all(&mut parser, &["choose [1, 2, 3] now"]);
        assert_eq!(
            events,
            vec![
                ParserEvent::Text {
                    delta: "choose ".to_string()
                },
                ParserEvent::Failed {
                    raw_text: "[1, 2, 3]".to_string()
                },
                ParserEvent::Text {
                    delta: " now".to_string()
                },
            ]
        );
    }

    #[test]
    fn oversized_candidate_is_flushed_as_failure() {
        let mut parser = ToolCallParser::new(ToolPromptFormat::PythonList, true);
        let big = format!("[fill(data='{}'", "x".repeat(MAX_CANDIDATE_BYTES));
        let events = parser.feed(&big);
        match &events[0] {
            ParserEvent::Failed { raw_text } => assert!(raw_text.len() > MAX_CANDIDATE_BYTES),
            other => panic!("expected failure, got {other:?}"),
        }
        // Whatever followed the flush is re-scanned as ordinary text.
        assert!(events[1..]
            .iter()
            .all(|event| matches!(event, ParserEvent::Text { .. })));
        assert_eq!(account(&events), big);
    }

    #[test]
    fn for_request_disables_scanning_without_tools() {
        use crate::model::{ChatCompletionRequest, Message};

        let request = ChatCompletionRequest::new("m", vec![Message::user("hi")]);
        let mut parser = ToolCallParser::for_request(&request);
        let events = parser.feed("[not(a='call')]");
        assert_eq!(
            events,
            vec![ParserEvent::Text {
                delta: "[not(a='call')]".to_string()
            }]
        );
    }
}
