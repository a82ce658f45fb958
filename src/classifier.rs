//! Filename analysis: tokens, token classes, signatures and folder inference.
//!
//! Everything here is pure. Persisting what was learned is the allocator's job.

use std::path::Path;

use regex::Regex;
use serde::Serialize;

use crate::util::sanitize_folder_name;

/// Folder used for names that carry no category tokens.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Tag for tokens no rule matches.
pub const MIXED_TAG: &str = "MIXED";

/// Built-in token classes, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Year,
    YearMonth,
    FullDate,
    Number,
    Text,
    Alphanumeric,
    Mixed,
}

impl TokenClass {
    pub fn tag(&self) -> &'static str {
        match self {
            TokenClass::Year => "YEAR",
            TokenClass::YearMonth => "YEARMONTH",
            TokenClass::FullDate => "FULLDATE",
            TokenClass::Number => "NUMBER",
            TokenClass::Text => "TEXT",
            TokenClass::Alphanumeric => "ALPHANUMERIC",
            TokenClass::Mixed => MIXED_TAG,
        }
    }

    /// Pattern for the class, `None` for the catch-all.
    fn pattern(&self) -> Option<&'static str> {
        match self {
            TokenClass::Year => Some(r"^[0-9]{4}$"),
            TokenClass::YearMonth => Some(r"^[0-9]{6}$"),
            TokenClass::FullDate => Some(r"^[0-9]{8}$"),
            TokenClass::Number => Some(r"^[0-9]+$"),
            TokenClass::Text => Some(r"^\p{Alphabetic}+$"),
            // Letter-led: "2025Q3" is deliberately left to MIXED.
            TokenClass::Alphanumeric => Some(r"^\p{Alphabetic}[\p{Alphabetic}0-9]*$"),
            TokenClass::Mixed => None,
        }
    }
}

const BUILTIN_ORDER: &[TokenClass] = &[
    TokenClass::Year,
    TokenClass::YearMonth,
    TokenClass::FullDate,
    TokenClass::Number,
    TokenClass::Text,
    TokenClass::Alphanumeric,
];

/// One entry of the ordered rule list: a tag and the pattern a whole token
/// must match to receive it.
#[derive(Debug, Clone)]
pub struct ClassRule {
    tag: String,
    pattern: Regex,
}

impl ClassRule {
    pub fn new(tag: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            tag: tag.into(),
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn matches(&self, token: &str) -> bool {
        self.pattern.is_match(token)
    }
}

/// Everything derived from one filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilenameAnalysis {
    pub original_filename: String,
    pub stem: String,
    /// Extension including the leading dot, or empty.
    pub extension: String,
    pub tokens: Vec<String>,
    pub signature: String,
    pub suggested_structure: Vec<String>,
}

/// Splits filenames on a delimiter and tags each token with the first
/// matching rule.
#[derive(Debug, Clone)]
pub struct Classifier {
    delimiter: String,
    rules: Vec<ClassRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(crate::DEFAULT_DELIMITER)
    }
}

impl Classifier {
    pub fn new(delimiter: &str) -> Self {
        let rules = BUILTIN_ORDER
            .iter()
            .map(|class| {
                let pattern = class.pattern().expect("built-in classes carry a pattern");
                ClassRule::new(class.tag(), pattern).expect("Invalid token class regex")
            })
            .collect();

        Self {
            delimiter: delimiter.to_string(),
            rules,
        }
    }

    /// Insert a rule at `position` in the precedence list (clamped to the end).
    pub fn with_rule(mut self, position: usize, rule: ClassRule) -> Self {
        let position = position.min(self.rules.len());
        self.rules.insert(position, rule);
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn rules(&self) -> &[ClassRule] {
        &self.rules
    }

    /// Tag of the first rule matching `token`, or `MIXED`.
    pub fn token_tag(&self, token: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(token))
            .map(ClassRule::tag)
            .unwrap_or(MIXED_TAG)
    }

    /// Split a stem into tokens. An empty delimiter keeps the stem whole.
    pub fn tokenize(&self, stem: &str) -> Vec<String> {
        if self.delimiter.is_empty() {
            return vec![stem.to_string()];
        }
        stem.split(self.delimiter.as_str()).map(str::to_string).collect()
    }

    /// Signature of a token sequence. Depends only on count and classes.
    pub fn signature(&self, tokens: &[String]) -> String {
        tokens
            .iter()
            .map(|token| self.token_tag(token))
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }

    pub fn analyze(&self, filename: &str) -> FilenameAnalysis {
        let path = Path::new(filename);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let tokens = self.tokenize(&stem);
        let signature = self.signature(&tokens);
        let suggested_structure = infer_structure(&tokens);

        FilenameAnalysis {
            original_filename: filename.to_string(),
            stem,
            extension,
            tokens,
            signature,
            suggested_structure,
        }
    }

    /// Name the file keeps once `depth` tokens have become folders.
    pub fn residual_name(&self, analysis: &FilenameAnalysis, depth: usize) -> String {
        if analysis.tokens.len() > depth {
            format!(
                "{}{}",
                analysis.tokens[depth..].join(&self.delimiter),
                analysis.extension
            )
        } else {
            analysis.original_filename.clone()
        }
    }
}

/// Default folder levels for a token sequence.
pub fn infer_structure(tokens: &[String]) -> Vec<String> {
    match tokens.len() {
        0 | 1 => vec![UNCATEGORIZED.to_string()],
        2 => vec![tokens[0].clone()],
        3 => tokens[..2].to_vec(),
        n => tokens[..n - 1].to_vec(),
    }
}

/// Fill a stored structure with the tokens of the current filename.
///
/// Level `i` takes token `i` when there is one and the stored placeholder
/// otherwise. Single-token names stay in the stored folders as they are.
/// Every level is sanitized.
pub fn instantiate(structure: &[String], tokens: &[String]) -> Vec<String> {
    if tokens.len() < 2 {
        return structure.iter().map(|s| sanitize_folder_name(s)).collect();
    }

    structure
        .iter()
        .enumerate()
        .map(|(i, placeholder)| match tokens.get(i) {
            Some(token) => sanitize_folder_name(token),
            None => sanitize_folder_name(placeholder),
        })
        .collect()
}
