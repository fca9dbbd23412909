//! Descriptor template for new OBS meta projects.
//!
//! The template is plain text with `{{ .Project }}` placeholders. It is
//! compiled once while the configuration is validated and then only
//! rendered, never re-parsed.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Error;
use crate::result::Result;

static ACTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok());

const PROJECT_FIELD: &str = "Project";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Project,
}

/// A compiled descriptor template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTemplate {
    segments: Vec<Segment>,
}

impl ProjectTemplate {
    /// Read and compile a template file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` if the file cannot be read and
    /// `TemplateInvalid` if it does not compile.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, format!("read template file failed: {e}")))?;
        Self::compile(&source).map_err(|reason| Error::template_invalid(path, reason))
    }

    /// Compile template source text.
    ///
    /// # Errors
    ///
    /// Returns a description of the first unsupported or unterminated action.
    pub fn compile(source: &str) -> std::result::Result<Self, String> {
        let action = ACTION
            .as_ref()
            .ok_or_else(|| "template action pattern failed to build".to_string())?;

        let mut segments = Vec::new();
        let mut cursor = 0usize;

        for caps in action.captures_iter(source) {
            let (Some(whole), Some(field)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let literal = source.get(cursor..whole.start()).unwrap_or_default();
            push_text(&mut segments, literal)?;

            if field.as_str() != PROJECT_FIELD {
                return Err(format!(
                    "unknown field '.{}' at byte {}",
                    field.as_str(),
                    whole.start()
                ));
            }
            segments.push(Segment::Project);
            cursor = whole.end();
        }

        push_text(&mut segments, source.get(cursor..).unwrap_or_default())?;
        Ok(Self { segments })
    }

    /// Render the template for one project.
    #[must_use]
    pub fn render(&self, project: &str) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.as_str(),
                Segment::Project => project,
            })
            .collect()
    }
}

fn push_text(segments: &mut Vec<Segment>, literal: &str) -> std::result::Result<(), String> {
    if let Some(pos) = literal.find("{{") {
        return Err(format!("unsupported or unterminated action near '{}'", excerpt(literal, pos)));
    }
    if !literal.is_empty() {
        segments.push(Segment::Text(literal.to_string()));
    }
    Ok(())
}

fn excerpt(text: &str, from: usize) -> String {
    text.get(from..)
        .unwrap_or_default()
        .chars()
        .take(24)
        .collect()
}
