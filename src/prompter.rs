use std::collections::VecDeque;
use std::io::{BufRead, Write};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use argen_script::{InputKind, Value};

use crate::error::EngineError;

/// One question put to the user.
pub struct Question<'a> {
    pub path: &'a str,
    pub kind: &'a InputKind,
    pub label: Option<&'a str>,
    pub help: Option<&'a str>,
    /// `(value, label)` pairs for enum and list inputs.
    pub options: Vec<(&'a str, Option<&'a str>)>,
    pub default: Option<&'a str>,
}

/// Asks questions and returns raw answers. The resolver validates and
/// coerces; invalid answers come back as another prompt for the same input.
pub trait Prompter {
    /// May fail with [`EngineError::Cancelled`].
    fn prompt(&mut self, question: &Question) -> Result<String, EngineError>;
}

/// Interactive stdin/stdout prompter.
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn print_question(&self, question: &Question) -> Result<(), EngineError> {
        let mut out = StandardStream::stdout(ColorChoice::Auto);
        let mut bold = ColorSpec::new();
        bold.set_bold(true);
        out.set_color(&bold)?;
        write!(out, "{}", question.label.unwrap_or(question.path))?;
        out.reset()?;
        if let Some(help) = question.help {
            let mut dim = ColorSpec::new();
            dim.set_fg(Some(Color::Cyan));
            out.set_color(&dim)?;
            write!(out, "  ({})", help.trim())?;
            out.reset()?;
        }
        writeln!(out)?;
        for (i, (value, label)) in question.options.iter().enumerate() {
            match label {
                Some(label) => writeln!(out, "  ({}) {value} - {label}", i + 1)?,
                None => writeln!(out, "  ({}) {value}", i + 1)?,
            }
        }
        match question.default {
            Some(default) => write!(out, "{} (default: {default}): ", question.path)?,
            None => write!(out, "{}: ", question.path)?,
        }
        out.flush()?;
        Ok(())
    }
}

impl Prompter for TerminalPrompter {
    fn prompt(&mut self, question: &Question) -> Result<String, EngineError> {
        self.print_question(question)?;
        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            // EOF on stdin is a user cancellation
            return Err(EngineError::Cancelled);
        }
        Ok(line.trim().to_owned())
    }
}

/// Replays canned answers; exhausting them cancels. Used by tests and by
/// batch drivers that want prompt semantics without a terminal.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> ScriptedPrompter {
        ScriptedPrompter {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt(&mut self, _question: &Question) -> Result<String, EngineError> {
        self.answers.pop_front().ok_or(EngineError::Cancelled)
    }
}

/// Coerces a raw prompt answer per input kind. Booleans accept
/// `y/yes/n/no/true/false`, enums accept a value or 1-based ordinal, lists
/// accept comma-separated values or ordinals, text falls back to the
/// default.
pub fn coerce_answer(
    raw: &str,
    kind: &InputKind,
    options: &[(String, Option<String>)],
    default: Option<&str>,
) -> Result<Value, String> {
    let raw = raw.trim();
    match kind {
        InputKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "" => match default {
                Some(d) => Value::parse_bool(d)
                    .map(Value::Bool)
                    .map_err(|_| format!("bad default {d:?}")),
                None => Err("answer yes or no".to_owned()),
            },
            "y" | "yes" | "true" => Ok(Value::Bool(true)),
            "n" | "no" | "false" => Ok(Value::Bool(false)),
            other => Err(format!("{other:?} is not a yes/no answer")),
        },
        InputKind::Enum => {
            if raw.is_empty() {
                return match default {
                    Some(d) => Ok(Value::from(d)),
                    None => Err("choose an option".to_owned()),
                };
            }
            resolve_choice(raw, options).map(Value::String)
        }
        InputKind::List { .. } => {
            if raw.is_empty() {
                return match default {
                    Some(d) => Ok(Value::parse_list(Some(d))),
                    None => Ok(Value::List(Vec::new())),
                };
            }
            let mut selected = Vec::new();
            for part in raw.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                selected.push(resolve_choice(part, options)?);
            }
            Ok(Value::List(selected))
        }
        InputKind::Text { placeholder } => {
            if raw.is_empty() {
                match default.or(placeholder.as_deref()) {
                    Some(text) => Ok(Value::from(text)),
                    None => Err("a value is required".to_owned()),
                }
            } else {
                Ok(Value::from(raw))
            }
        }
    }
}

/// An option value, or a 1-based ordinal into the option list.
fn resolve_choice(raw: &str, options: &[(String, Option<String>)]) -> Result<String, String> {
    if options.iter().any(|(value, _)| value == raw) {
        return Ok(raw.to_owned());
    }
    if let Ok(ordinal) = raw.parse::<usize>() {
        if (1..=options.len()).contains(&ordinal) {
            return Ok(options[ordinal - 1].0.clone());
        }
    }
    Err(format!("{raw:?} is not one of the offered options"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(values: &[&str]) -> Vec<(String, Option<String>)> {
        values.iter().map(|v| (v.to_string(), None)).collect()
    }

    #[test]
    fn boolean_answers() {
        for yes in ["y", "YES", "true"] {
            assert_eq!(
                coerce_answer(yes, &InputKind::Boolean, &[], None).unwrap(),
                Value::Bool(true)
            );
        }
        assert_eq!(
            coerce_answer("no", &InputKind::Boolean, &[], None).unwrap(),
            Value::Bool(false)
        );
        assert!(coerce_answer("maybe", &InputKind::Boolean, &[], None).is_err());
        assert_eq!(
            coerce_answer("", &InputKind::Boolean, &[], Some("true")).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn enum_accepts_value_or_ordinal() {
        let opts = options(&["java", "kotlin"]);
        assert_eq!(
            coerce_answer("kotlin", &InputKind::Enum, &opts, None).unwrap(),
            Value::from("kotlin")
        );
        assert_eq!(
            coerce_answer("2", &InputKind::Enum, &opts, None).unwrap(),
            Value::from("kotlin")
        );
        assert!(coerce_answer("3", &InputKind::Enum, &opts, None).is_err());
        assert!(coerce_answer("rust", &InputKind::Enum, &opts, None).is_err());
    }

    #[test]
    fn list_accepts_mixed_values_and_ordinals() {
        let opts = options(&["db", "web", "metrics"]);
        let kind = InputKind::List {
            min: None,
            max: None,
        };
        assert_eq!(
            coerce_answer("db, 3", &kind, &opts, None).unwrap(),
            Value::List(vec!["db".into(), "metrics".into()])
        );
        assert!(coerce_answer("db, nope", &kind, &opts, None).is_err());
    }

    #[test]
    fn text_falls_back_to_placeholder() {
        let kind = InputKind::Text {
            placeholder: Some("com.example".into()),
        };
        assert_eq!(
            coerce_answer("", &kind, &[], None).unwrap(),
            Value::from("com.example")
        );
        assert_eq!(coerce_answer("org.acme", &kind, &[], None).unwrap(), Value::from("org.acme"));
    }

    #[test]
    fn scripted_prompter_cancels_when_exhausted() {
        let mut prompter = ScriptedPrompter::new(["one"]);
        let kind = InputKind::Text { placeholder: None };
        let question = Question {
            path: "p",
            kind: &kind,
            label: None,
            help: None,
            options: vec![],
            default: None,
        };
        assert_eq!(prompter.prompt(&question).unwrap(), "one");
        assert!(matches!(
            prompter.prompt(&question).unwrap_err(),
            EngineError::Cancelled
        ));
    }
}
