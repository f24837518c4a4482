//! CFI Parser
//!
//! Parses EPUB CFI strings into decoded [`EpubCfi`] values.
//!
//! Grammar accepted (simplified):
//! ```text
//! cfi       = ["epubcfi("] chapter ["!" path] [offset] [range] [")"]
//! chapter   = step step step*
//! path      = ["/"] number [id] ("/" number [id])* ["/"]
//! step      = "/" number [id]
//! id        = "[" text "]"
//! offset    = ":" number [assertion]
//! range     = "," ...            (only the first endpoint is decoded)
//! ```
//!
//! The wrapper and the leading slash of the path are optional because older
//! bookmarks were written without them.

use thiserror::Error;
use tracing::{debug, warn};

use super::types::*;

/// CFI parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfiParseError {
    #[error("Empty CFI string")]
    Empty,

    #[error("CFI must end with ')'")]
    MissingClosingParen,

    #[error("Missing chapter component")]
    MissingChapter,

    #[error("Invalid spine step {0}")]
    InvalidSpineStep(u32),

    #[error("Expected number at position {0}")]
    ExpectedNumber(usize),

    #[error("Unclosed bracket at position {0}")]
    UnclosedBracket(usize),

    #[error("Text step must be the last step (position {0})")]
    TextStepNotTerminal(usize),

    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
}

/// Parser state
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

/// A step as written: raw number plus optional assertion
struct RawStep {
    value: u32,
    id: Option<String>,
    at: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_digit(&self) -> bool {
        self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false)
    }

    /// Parse a sequence of digits as u32
    fn parse_number(&mut self) -> Result<u32, CfiParseError> {
        let start = self.pos;
        while self.peek_digit() {
            self.advance();
        }

        if self.pos == start {
            return Err(CfiParseError::ExpectedNumber(start));
        }

        self.input[start..self.pos]
            .parse()
            .map_err(|_| CfiParseError::ExpectedNumber(start))
    }

    /// Parse text inside brackets, handling `^` escapes
    fn parse_bracket_content(&mut self) -> Result<String, CfiParseError> {
        let start = self.pos;
        let mut result = String::new();
        let mut escaped = false;

        while let Some(ch) = self.advance() {
            if escaped {
                result.push(ch);
                escaped = false;
            } else if ch == '^' {
                escaped = true;
            } else if ch == ']' {
                return Ok(result);
            } else {
                result.push(ch);
            }
        }

        Err(CfiParseError::UnclosedBracket(start))
    }

    fn parse_assertion(&mut self) -> Result<Option<String>, CfiParseError> {
        if !self.skip_if('[') {
            return Ok(None);
        }
        let content = self.parse_bracket_content()?;
        Ok(if content.is_empty() { None } else { Some(content) })
    }

    /// Parse `number [id]`, the part of a step after its slash
    fn parse_raw_step(&mut self) -> Result<RawStep, CfiParseError> {
        let at = self.pos;
        let value = self.parse_number()?;
        let id = self.parse_assertion()?;
        Ok(RawStep { value, id, at })
    }

    /// Chapter component: the package step and the spine item step
    fn parse_chapter(&mut self) -> Result<Vec<RawStep>, CfiParseError> {
        let mut steps = Vec::new();
        while self.skip_if('/') {
            steps.push(self.parse_raw_step()?);
        }
        Ok(steps)
    }

    /// Steps inside the content document.
    ///
    /// A comma inside the path starts a range; the parent path and the start
    /// path are joined and the end path is dropped.
    fn parse_path(&mut self, steps: &mut Vec<RawStep>) -> Result<(), CfiParseError> {
        let mut in_range = false;
        if self.peek_digit() {
            steps.push(self.parse_raw_step()?);
        }
        loop {
            if self.skip_if('/') {
                if !self.peek_digit() {
                    // Trailing slash (`!/4/`) is the legacy root-element form
                    continue;
                }
                steps.push(self.parse_raw_step()?);
            } else if self.peek() == Some(',') {
                if in_range {
                    break;
                }
                warn!(cfi = self.input, "CFI ranges are not supported");
                in_range = true;
                self.advance();
            } else {
                break;
            }
        }
        Ok(())
    }
}

fn strip_wrapper(input: &str) -> Result<&str, CfiParseError> {
    match input.strip_prefix("epubcfi(") {
        Some(inner) => inner
            .strip_suffix(')')
            .ok_or(CfiParseError::MissingClosingParen),
        None => Ok(input),
    }
}

/// Parse a CFI string, reporting why it failed
pub fn try_parse(input: &str) -> Result<EpubCfi, CfiParseError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(CfiParseError::Empty);
    }
    let inner = strip_wrapper(raw)?;
    let mut parser = Parser::new(inner);

    // Chapter component
    let chapter_steps = parser.parse_chapter()?;
    let chapter = inner[..parser.pos].to_string();
    let spine_step = chapter_steps.get(1).ok_or(CfiParseError::MissingChapter)?;
    if spine_step.value == 0 || spine_step.value % 2 != 0 {
        return Err(CfiParseError::InvalidSpineStep(spine_step.value));
    }
    let spine_pos = i32::try_from(spine_step.value / 2 - 1)
        .map_err(|_| CfiParseError::InvalidSpineStep(spine_step.value))?;

    // Path component
    let mut raw_steps = Vec::new();
    if parser.skip_if('!') {
        parser.parse_path(&mut raw_steps)?;
    }

    let mut steps = Vec::with_capacity(raw_steps.len());
    let last = raw_steps.len().saturating_sub(1);
    for (i, step) in raw_steps.into_iter().enumerate() {
        let decoded = CfiStep::from_encoded(step.value, step.id);
        if decoded.is_text() && i != last {
            return Err(CfiParseError::TextStepNotTerminal(step.at));
        }
        steps.push(decoded);
    }

    // Terminal offset
    let mut character_offset = None;
    let mut text_assertion = None;
    if parser.skip_if(':') {
        character_offset = Some(parser.parse_number()?);
        text_assertion = parser.parse_assertion()?;
    }

    if parser.peek() == Some(',') {
        debug!(cfi = raw, "ignoring range end of CFI");
    } else if !parser.at_end() {
        return Err(CfiParseError::UnexpectedChar(
            parser.peek().unwrap_or('\0'),
            parser.pos,
        ));
    }

    Ok(EpubCfi {
        raw: raw.to_string(),
        chapter,
        spine_pos,
        spine_id: spine_step.id.clone(),
        steps,
        character_offset,
        text_assertion,
    })
}

/// Parse a CFI string.
///
/// Never fails: malformed input is logged and returned as the
/// `spine_pos == -1` sentinel.
pub fn parse(input: &str) -> EpubCfi {
    match try_parse(input) {
        Ok(cfi) => cfi,
        Err(e) => {
            warn!(cfi = input, error = %e, "invalid CFI");
            EpubCfi::invalid(input)
        }
    }
}

/// True for strings that look like a wrapped CFI
pub fn is_cfi_string(target: &str) -> bool {
    let t = target.trim();
    t.starts_with("epubcfi(") && t.ends_with(')')
}
