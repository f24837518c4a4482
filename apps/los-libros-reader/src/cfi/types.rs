//! CFI (Canonical Fragment Identifier) types for EPUB
//!
//! A decoded CFI splits into the chapter reference (package step plus spine
//! item) and the path inside that chapter's content document.
//! Format: epubcfi(/6/4[chap01ref]!/4/2/22/3:268)
//!
//! Reference: <https://idpf.org/epub/linking/cfi/epub-cfi.html>

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a step inside a content document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Element step (even CFI number)
    Element,
    /// Text step (odd CFI number)
    Text,
}

/// A single decoded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfiStep {
    pub kind: StepKind,
    /// 0-based index among element siblings (element steps) or text
    /// siblings (text steps)
    pub index: u32,
    /// Optional id assertion `[id]`
    pub id: Option<String>,
}

impl CfiStep {
    pub fn element(index: u32) -> Self {
        Self {
            kind: StepKind::Element,
            index,
            id: None,
        }
    }

    pub fn element_with_id(index: u32, id: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Element,
            index,
            id: Some(id.into()),
        }
    }

    pub fn text(index: u32) -> Self {
        Self {
            kind: StepKind::Text,
            index,
            id: None,
        }
    }

    /// Decode a raw CFI step number: even numbers are elements, odd are text
    pub fn from_encoded(value: u32, id: Option<String>) -> Self {
        if value % 2 == 0 {
            Self {
                kind: StepKind::Element,
                index: (value / 2).saturating_sub(1),
                id,
            }
        } else {
            Self {
                kind: StepKind::Text,
                index: (value - 1) / 2,
                id,
            }
        }
    }

    /// The raw CFI step number
    pub fn encoded(&self) -> u32 {
        match self.kind {
            StepKind::Element => (self.index + 1) * 2,
            StepKind::Text => self.index * 2 + 1,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == StepKind::Text
    }
}

impl fmt::Display for CfiStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.encoded())?;
        if let Some(ref id) = self.id {
            write!(f, "[{}]", escape_assertion(id))?;
        }
        Ok(())
    }
}

/// A decoded EPUB CFI
///
/// `spine_pos == -1` marks input that could not be parsed; every other field
/// is then empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpubCfi {
    /// The string this CFI was parsed from
    pub raw: String,
    /// Chapter component, e.g. `/6/2[ch01]`
    pub chapter: String,
    /// Index into the spine, -1 when invalid
    pub spine_pos: i32,
    /// Id asserted on the spine item step
    pub spine_id: Option<String>,
    /// Steps inside the content document
    pub steps: Vec<CfiStep>,
    /// Offset into the terminal text node
    pub character_offset: Option<u32>,
    /// Text location assertion after the offset
    pub text_assertion: Option<String>,
}

impl EpubCfi {
    /// The "could not parse" sentinel
    pub fn invalid(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            chapter: String::new(),
            spine_pos: -1,
            spine_id: None,
            steps: Vec::new(),
            character_offset: None,
            text_assertion: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.spine_pos >= 0
    }

    /// Spine position as an index, `None` when invalid
    pub fn spine_index(&self) -> Option<usize> {
        usize::try_from(self.spine_pos).ok()
    }

    /// The last step, if any
    pub fn terminal(&self) -> Option<&CfiStep> {
        self.steps.last()
    }

    /// True when the path ends in a text step
    pub fn ends_in_text(&self) -> bool {
        self.terminal().map(CfiStep::is_text).unwrap_or(false)
    }

    /// Path component without the chapter, e.g. `/4/2/1:0`
    pub fn path_string(&self) -> String {
        let mut out: String = self.steps.iter().map(|s| s.to_string()).collect();
        if let Some(offset) = self.character_offset {
            out.push_str(&format!(":{}", offset));
            if let Some(ref assertion) = self.text_assertion {
                out.push_str(&format!("[{}]", escape_assertion(assertion)));
            }
        }
        out
    }
}

impl fmt::Display for EpubCfi {
    /// Re-encodes the decoded form. The result addresses the same node and
    /// offset but need not be byte-identical to `raw`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "{}", self.raw);
        }
        write!(f, "epubcfi({}!{})", self.chapter, self.path_string())
    }
}

/// Escape CFI special characters inside an assertion
pub(crate) fn escape_assertion(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '^' | '[' | ']' | '(' | ')' | ',' | ';' | '=') {
            out.push('^');
        }
        out.push(ch);
    }
    out
}
