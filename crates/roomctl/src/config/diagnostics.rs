use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig {
        file_path: PathBuf,
    },

    /// A failover instance failed validation and will not be used.
    SkippedInstance {
        name: String,
        reason: String,
        location: Option<FieldLocation>,
    },

    /// An instance is defined but missing from `hub.order`.
    UnlistedInstance {
        name: String,
        location: Option<FieldLocation>,
    },
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// Error type for merge conflicts
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<FieldLocation>,
}

/// Where a field was defined
#[derive(Debug, Clone)]
pub struct FieldLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

impl FieldLocation {
    pub fn new(source: &SourceInfo, span: Range<usize>) -> Self {
        Self {
            file_path: source.file_path.clone(),
            span,
            content: source.content.clone(),
        }
    }
}

/// Error type for validation failures
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub location: Option<FieldLocation>,
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Option<&FieldLocation>) -> Self {
        self.location = location.cloned();
        self
    }
}

/// Error type for config loading failures (parse errors, IO errors, etc.)
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", path.display(), cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

impl Diagnostic {
    /// Returns true if this diagnostic is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    /// Returns true if this diagnostic is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

/// Write a single-location report, or a plain line when the location is
/// unknown.
fn write_located(
    output: &mut Vec<u8>,
    kind: ariadne::ReportKind<'_>,
    message: String,
    label: &str,
    location: Option<&FieldLocation>,
) {
    use ariadne::Color;
    use ariadne::Label;
    use ariadne::Report;
    use ariadne::Source;

    let Some(location) = location else {
        let prefix = match kind {
            ariadne::ReportKind::Error => "Error",
            _ => "Warning",
        };
        output.extend_from_slice(format!("{}: {}\n", prefix, message).as_bytes());
        return;
    };

    let file_id = location.file_path.to_string_lossy().to_string();
    let color = match kind {
        ariadne::ReportKind::Error => Color::Red,
        _ => Color::Yellow,
    };

    Report::build(kind, (file_id.clone(), location.span.clone()))
        .with_message(message)
        .with_label(
            Label::new((file_id.clone(), location.span.clone()))
                .with_message(label)
                .with_color(color),
        )
        .finish()
        .write((file_id, Source::from(&location.content)), &mut *output)
        .ok();
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    use ariadne::Color;
    use ariadne::Label;
    use ariadne::Report;
    use ariadne::ReportKind;
    use ariadne::Source;

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(warning) => match warning {
                Warning::EmptyConfig { file_path } => {
                    let warning_msg = format!(
                        "Warning: Config file '{}' is empty and has no effect\n",
                        file_path.display()
                    );
                    output.extend_from_slice(warning_msg.as_bytes());
                }
                Warning::SkippedInstance {
                    name,
                    reason,
                    location,
                } => write_located(
                    &mut output,
                    ReportKind::Warning,
                    format!("Skipping Home Assistant instance '{}': {}", name, reason),
                    "defined here",
                    location.as_ref(),
                ),
                Warning::UnlistedInstance { name, location } => write_located(
                    &mut output,
                    ReportKind::Warning,
                    format!(
                        "Home Assistant instance '{}' is not listed in hub.order and will not be used",
                        name
                    ),
                    "defined here",
                    location.as_ref(),
                ),
            },
            Diagnostic::Error(error) => match error {
                Error::Merge(merge_error) => {
                    let Some(first_conflict) = merge_error.conflicts.first() else {
                        continue;
                    };

                    let mut report = Report::build(
                        ReportKind::Error,
                        (
                            first_conflict.file_path.to_string_lossy().to_string(),
                            first_conflict.span.clone(),
                        ),
                    )
                    .with_message(format!("Merge conflict in field '{}'", merge_error.field_path))
                    .with_note(&merge_error.message);

                    for (idx, conflict) in merge_error.conflicts.iter().enumerate() {
                        let label_msg = if idx == 0 {
                            "first definition here"
                        } else {
                            "conflicts with this definition"
                        };

                        report = report.with_label(
                            Label::new((
                                conflict.file_path.to_string_lossy().to_string(),
                                conflict.span.clone(),
                            ))
                            .with_message(label_msg)
                            .with_color(if idx == 0 { Color::Red } else { Color::Yellow }),
                        );
                    }

                    let finished_report = report.finish();

                    // Write to each unique source file
                    let mut written_files = std::collections::HashSet::new();
                    for conflict in &merge_error.conflicts {
                        let file_id = conflict.file_path.to_string_lossy().to_string();
                        if written_files.insert(file_id.clone()) {
                            let source = Source::from(&conflict.content);
                            finished_report
                                .write((file_id, source), &mut output)
                                .ok();
                        }
                    }
                }
                Error::Validation(validation_error) => write_located(
                    &mut output,
                    ReportKind::Error,
                    format!(
                        "Validation error in '{}': {}",
                        validation_error.field_path, validation_error.message
                    ),
                    &validation_error.message,
                    validation_error.location.as_ref(),
                ),
            },
        }
    }

    String::from_utf8_lossy(&output).to_string()
}
