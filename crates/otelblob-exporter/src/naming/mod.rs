//! Blob name generation
//!
//! A pattern is either a plain strftime format or, in template mode, a
//! [`Template`] whose rendered output is then time-formatted. A template that
//! fails to parse or render falls back to the pattern with its actions
//! removed. Every name ends with a random serial, placed before the file
//! extension when configured.

mod functions;
mod template;

pub use self::functions::{Env, Value};
pub use self::template::{Expr, Template, TemplateError};

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use otelblob_common::config::{is_valid_time_format, strip_template_actions, BlobNameFormat};
use otelblob_common::error::NamingError;
use otelblob_common::{metrics, SignalKind, TelemetryBatch};
use rand::Rng;

pub struct BlobNameGenerator {
    format: BlobNameFormat,
    templates: HashMap<SignalKind, Template>,
}

impl BlobNameGenerator {
    /// Parse the per-signal templates. A template that does not parse is
    /// reported once here and its signal uses the static pattern from then on.
    pub fn new(format: &BlobNameFormat) -> Self {
        let mut templates = HashMap::new();
        if format.template_enabled {
            for signal in SignalKind::ALL {
                let pattern = format.pattern_for(signal);
                if pattern.is_empty() {
                    continue;
                }
                match Template::parse(pattern) {
                    Ok(template) => {
                        templates.insert(signal, template);
                    }
                    Err(e) => {
                        tracing::warn!(
                            signal = %signal,
                            pattern,
                            error = %e,
                            "Invalid blob name template, using static pattern"
                        );
                    }
                }
            }
        }

        Self {
            format: format.clone(),
            templates,
        }
    }

    /// Name for a blob holding `batch`, written at `now`.
    pub fn generate(
        &self,
        signal: SignalKind,
        batch: &TelemetryBatch,
        now: DateTime<Utc>,
    ) -> Result<String, NamingError> {
        let pattern = self.format.pattern_for(signal);
        if pattern.is_empty() {
            return Err(NamingError::MissingPattern(signal.to_string()));
        }
        if self.format.serial_num_range <= 0 {
            return Err(NamingError::InvalidSerialRange(self.format.serial_num_range));
        }

        let layout = match self.templates.get(&signal) {
            Some(template) => {
                let env = Env {
                    batch,
                    params: &self.format.params,
                };
                match template.render(&env) {
                    Ok(rendered) if is_valid_time_format(&rendered) => rendered,
                    Ok(rendered) => self.fallback(
                        signal,
                        &NamingError::InvalidTimeFormat(rendered),
                        "Rendered blob name is not a valid time format, using static pattern",
                    ),
                    Err(e) => self.fallback(
                        signal,
                        &e,
                        "Failed to render blob name template, using static pattern",
                    ),
                }
            }
            None => self.static_pattern(signal),
        };

        let name = format_time(&layout, &now)?;
        let serial = rand::thread_rng().gen_range(0..self.format.serial_num_range);

        if self.format.serial_num_before_extension {
            let (stem, ext) = split_extension(&name);
            Ok(format!("{stem}_{serial}{ext}"))
        } else {
            Ok(format!("{name}_{serial}"))
        }
    }

    fn fallback(
        &self,
        signal: SignalKind,
        error: &dyn std::fmt::Display,
        message: &'static str,
    ) -> String {
        tracing::warn!(signal = %signal, error = %error, "{}", message);
        metrics::record_template_fallback(signal);
        self.static_pattern(signal)
    }

    fn static_pattern(&self, signal: SignalKind) -> String {
        let pattern = self.format.pattern_for(signal);
        if self.format.template_enabled {
            strip_template_actions(pattern)
        } else {
            pattern.to_string()
        }
    }
}

fn format_time(layout: &str, now: &DateTime<Utc>) -> Result<String, NamingError> {
    if !is_valid_time_format(layout) {
        return Err(NamingError::InvalidTimeFormat(layout.to_string()));
    }
    let mut out = String::with_capacity(layout.len() + 16);
    write!(out, "{}", now.format(layout))
        .map_err(|_| NamingError::InvalidTimeFormat(layout.to_string()))?;
    Ok(out)
}

/// Split at the last `.` of the final path segment, keeping the dot with
/// the extension.
fn split_extension(name: &str) -> (&str, &str) {
    let segment = name.rfind('/').map_or(0, |i| i + 1);
    match name[segment..].rfind('.') {
        Some(dot) => name.split_at(segment + dot),
        None => (name, ""),
    }
}
