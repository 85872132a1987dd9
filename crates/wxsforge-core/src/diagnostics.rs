use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use wxsforge_contracts::WXSFORGE_REPORT_SCHEMA_VERSION;

use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Precheck,
    Allocate,
    AutoElements,
    Normalize,
    Emit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticCode {
    WXS0001BuildSummary,
    WXS0002AllocatorMisuse,
    WXS0100UnresolvedDirective,
    WXS0101InvalidDirective,
    WXS0200MissingProduct,
    WXS0201MultipleProducts,
    WXS0202MultipleInstallDirs,
    WXS0203UnknownEnvironmentConstant,
    WXS0204DuplicateId,
    WXS0300SourceBaseDir,
}

impl DiagnosticCode {
    pub fn code_str(self) -> &'static str {
        match self {
            DiagnosticCode::WXS0001BuildSummary => "WXS0001",
            DiagnosticCode::WXS0002AllocatorMisuse => "WXS0002",
            DiagnosticCode::WXS0100UnresolvedDirective => "WXS0100",
            DiagnosticCode::WXS0101InvalidDirective => "WXS0101",
            DiagnosticCode::WXS0200MissingProduct => "WXS0200",
            DiagnosticCode::WXS0201MultipleProducts => "WXS0201",
            DiagnosticCode::WXS0202MultipleInstallDirs => "WXS0202",
            DiagnosticCode::WXS0203UnknownEnvironmentConstant => "WXS0203",
            DiagnosticCode::WXS0204DuplicateId => "WXS0204",
            DiagnosticCode::WXS0300SourceBaseDir => "WXS0300",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, severity: Severity, stage: Stage, message: impl Into<String>) -> Self {
        Diagnostic {
            code: code.code_str().to_string(),
            severity,
            stage,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Error diagnostic for a failed build.
    pub fn from_build_error(err: &BuildError) -> Self {
        let (code, stage) = match err {
            BuildError::UnresolvedDirective { .. } => {
                (DiagnosticCode::WXS0100UnresolvedDirective, Stage::AutoElements)
            }
            BuildError::InvalidDirective { .. } => {
                (DiagnosticCode::WXS0101InvalidDirective, Stage::AutoElements)
            }
            BuildError::MissingProduct => (DiagnosticCode::WXS0200MissingProduct, Stage::Precheck),
            BuildError::MultipleProducts(_) => {
                (DiagnosticCode::WXS0201MultipleProducts, Stage::Precheck)
            }
            BuildError::MultipleInstallDirs(_) => {
                (DiagnosticCode::WXS0202MultipleInstallDirs, Stage::Precheck)
            }
            BuildError::UnknownEnvironmentConstant { .. } => {
                (DiagnosticCode::WXS0203UnknownEnvironmentConstant, Stage::Precheck)
            }
            BuildError::DuplicateId { .. } => (DiagnosticCode::WXS0204DuplicateId, Stage::Precheck),
            BuildError::SourceBaseDir(_) => (DiagnosticCode::WXS0300SourceBaseDir, Stage::Normalize),
        };
        Diagnostic::new(code, Severity::Error, stage, err.to_string())
    }
}

/// Which invariant caused an automatic insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Directive,
    KeyPath,
    CreateFolder,
    RemoveFolder,
    PlaceholderComponent,
    UserProfileRegistry,
    FileKeyPath,
    WorkingDirectory,
    FeatureMapping,
    ShortcutIcon,
    AbsoluteInstallRoot,
    Platform,
    DummyDirectory,
    MergeModule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insertion {
    pub rule: Rule,
    /// Location of the node that was created or changed.
    pub target: String,
    pub detail: String,
}

/// Record of every automatic change made to the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InsertionLog {
    entries: Vec<Insertion>,
}

impl InsertionLog {
    pub fn record(&mut self, rule: Rule, target: impl Into<String>, detail: impl Into<String>) {
        let entry = Insertion {
            rule,
            target: target.into(),
            detail: detail.into(),
        };
        tracing::debug!(rule = ?entry.rule, target = %entry.target, "{}", entry.detail);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Insertion] {
        &self.entries
    }

    pub fn count(&self, rule: Rule) -> usize {
        self.entries.iter().filter(|e| e.rule == rule).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "InsertionLog::is_empty")]
    pub insertions: InsertionLog,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl Report {
    pub fn ok() -> Self {
        Self {
            schema_version: WXSFORGE_REPORT_SCHEMA_VERSION.to_string(),
            ok: true,
            diagnostics: Vec::new(),
            insertions: InsertionLog::default(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_diagnostics(mut self, mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            a.stage
                .cmp(&b.stage)
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_insertions(mut self, insertions: InsertionLog) -> Self {
        self.insertions = insertions;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_flip_ok_and_diagnostics_sort_by_stage() {
        let report = Report::ok().with_diagnostics(vec![
            Diagnostic::from_build_error(&BuildError::MissingProduct),
            Diagnostic::new(
                DiagnosticCode::WXS0002AllocatorMisuse,
                Severity::Warning,
                Stage::Allocate,
                "early ids",
            ),
        ]);
        assert!(!report.ok);
        assert_eq!(report.diagnostics[0].code, "WXS0200");
        assert_eq!(report.diagnostics[1].code, "WXS0002");
    }

    #[test]
    fn report_serializes_insertions_as_a_list() {
        let mut log = InsertionLog::default();
        log.record(Rule::KeyPath, "Product/Component[A]", "KeyPath=yes");
        let report = Report::ok().with_insertions(log).with_meta("sha256", "00");
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["schema_version"], "wxsforge.report@0.1.0");
        assert_eq!(v["insertions"][0]["rule"], "key_path");
        assert_eq!(v["meta"]["sha256"], "00");
    }
}
