// src/context.rs

//! Run-scoped context shared (read-only) by every task in a run.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::errors::TemplateError;

/// Parameters for a single pipeline run.
///
/// Built once before the run starts and then handed to every task behind an
/// `Arc`. There are no mutating methods besides the consuming builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    run_id: String,
    logical_date: NaiveDateTime,
    params: BTreeMap<String, String>,
}

impl RunContext {
    /// New context for the given logical date, with a derived run id.
    pub fn new(logical_date: NaiveDateTime) -> Self {
        let run_id = format!("scheduled__{}", logical_date.format("%Y-%m-%dT%H:%M:%S"));
        Self {
            run_id,
            logical_date,
            params: BTreeMap::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.params.insert(k.into(), v.into());
        }
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn logical_date(&self) -> NaiveDateTime {
        self.logical_date
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Resolve a single template field such as `execution_date.year`.
    pub fn lookup(&self, field: &str) -> Option<String> {
        let date = self.logical_date;
        let value = match field {
            "execution_date" | "ts" => date.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "execution_date.year" => date.year().to_string(),
            "execution_date.month" => date.month().to_string(),
            "execution_date.day" => date.day().to_string(),
            "execution_date.hour" => date.hour().to_string(),
            "execution_date.minute" => date.minute().to_string(),
            "ds" => date.format("%Y-%m-%d").to_string(),
            "ds_nodash" => date.format("%Y%m%d").to_string(),
            "run_id" => self.run_id.clone(),
            other => {
                let key = other.strip_prefix("params.")?;
                return self.params.get(key).cloned();
            }
        };
        Some(value)
    }

    /// Render `{field}` placeholders in `template`.
    ///
    /// `{{` and `}}` produce literal braces. Unknown fields and unbalanced
    /// braces are errors.
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for fc in chars.by_ref() {
                        match fc {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(malformed(template, "nested '{'"));
                            }
                            other => field.push(other),
                        }
                    }
                    if !closed {
                        return Err(malformed(template, "unterminated '{'"));
                    }
                    let field = field.trim();
                    let value = self.lookup(field).ok_or_else(|| TemplateError::UnknownField {
                        field: field.to_string(),
                        template: template.to_string(),
                    })?;
                    out.push_str(&value);
                }
                '}' => return Err(malformed(template, "stray '}'")),
                other => out.push(other),
            }
        }

        Ok(out)
    }
}

fn malformed(template: &str, reason: &str) -> TemplateError {
    TemplateError::Malformed {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}
