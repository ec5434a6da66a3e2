//! Command templates.

use crate::errors::TemplateError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// `{name}` placeholders plus `{{` / `}}` escapes.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([a-z_][a-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// Values substituted into command templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style [`TemplateVars::set`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Returns a variable value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Iterates over variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every variable of `other` into this set.
    pub fn extend(&mut self, other: &Self) {
        self.values
            .extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Replaces placeholders in `text`.
    pub fn substitute(&self, text: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            match caps.get(1) {
                Some(name) => {
                    let value = self.get(name.as_str()).ok_or_else(|| {
                        TemplateError::UnknownPlaceholder {
                            name: name.as_str().to_string(),
                            template: text.to_string(),
                        }
                    })?;
                    out.push_str(value);
                }
                // `{{` or `}}`
                None => out.push_str(&whole.as_str()[..1]),
            }
            last = whole.end();
        }

        out.push_str(&text[last..]);
        Ok(out)
    }
}

/// A command with unresolved `{placeholder}` references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// The program to execute.
    pub program: String,
    /// Arguments, each rendered independently.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment additions, values rendered.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandTemplate {
    /// Creates a template for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Creates a template running `script` through `sh -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The unrendered command line, used for idempotency keys.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Names of the placeholders referenced by the program, arguments or
    /// environment values.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<String> {
        std::iter::once(&self.program)
            .chain(&self.args)
            .chain(self.env.values())
            .flat_map(|text| {
                placeholder_regex()
                    .captures_iter(text)
                    .filter_map(|caps| caps.get(1).map(|name| name.as_str().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Substitutes every placeholder.
    pub fn render(&self, vars: &TemplateVars) -> Result<RenderedCommand, TemplateError> {
        let program = vars.substitute(&self.program)?;
        if program.trim().is_empty() {
            return Err(TemplateError::EmptyProgram);
        }

        let args = self
            .args
            .iter()
            .map(|a| vars.substitute(a))
            .collect::<Result<Vec<_>, _>>()?;

        let env = self
            .env
            .iter()
            .map(|(k, v)| Ok((k.clone(), vars.substitute(v)?)))
            .collect::<Result<BTreeMap<_, _>, TemplateError>>()?;

        Ok(RenderedCommand { program, args, env })
    }
}

/// A fully rendered command ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    /// The program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment additions.
    pub env: BTreeMap<String, String>,
}

impl RenderedCommand {
    /// A shell-like rendering for logs and diagnostics.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_substitutes_program_args_and_env() {
        let template = CommandTemplate::new("{tool}")
            .args(["-j", "{jobs}", "-C", "{stage_dir}/build"])
            .env("CFLAGS", "-O{opt}");
        let vars = TemplateVars::new()
            .with("tool", "ninja")
            .with("jobs", "8")
            .with("stage_dir", "/w/build")
            .with("opt", "2");

        let rendered = template.render(&vars).unwrap();

        assert_eq!(rendered.program, "ninja");
        assert_eq!(rendered.args, vec!["-j", "8", "-C", "/w/build/build"]);
        assert_eq!(rendered.env.get("CFLAGS").map(String::as_str), Some("-O2"));
        assert_eq!(rendered.command_line(), "ninja -j 8 -C /w/build/build");
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let template = CommandTemplate::new("make").arg("-j{jobz}");
        let err = template.render(&TemplateVars::new().with("jobs", "4")).unwrap_err();

        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                name: "jobz".to_string(),
                template: "-j{jobz}".to_string(),
            }
        );
    }

    #[test]
    fn test_escaped_braces_and_shell_variables_pass_through() {
        let template = CommandTemplate::shell("echo {{literal}} ${HOME} {trial}");
        let rendered = template.render(&TemplateVars::new().with("trial", "3")).unwrap();

        assert_eq!(rendered.args[1], "echo {literal} ${HOME} 3");
    }

    #[test]
    fn test_placeholders_skip_escapes() {
        let template = CommandTemplate::shell("make -j{jobs} {{not_a_var}} -C {stage_dir}")
            .env("CC", "{cc}");
        let names: Vec<String> = template.placeholders().into_iter().collect();

        assert_eq!(names, vec!["cc", "jobs", "stage_dir"]);
    }

    #[test]
    fn test_empty_program_rejected() {
        let template = CommandTemplate::new("{tool}");
        let err = template.render(&TemplateVars::new().with("tool", "")).unwrap_err();
        assert_eq!(err, TemplateError::EmptyProgram);
    }

    #[test]
    fn test_describe_is_stable() {
        let template = CommandTemplate::new("cmake").arg("-G").arg("Ninja").env("CC", "clang");
        assert_eq!(template.describe(), "CC=clang cmake -G Ninja");
    }

    #[test]
    fn test_command_line_quotes_whitespace() {
        let rendered = CommandTemplate::shell("echo hi")
            .render(&TemplateVars::new())
            .unwrap();
        assert_eq!(rendered.command_line(), "sh -c 'echo hi'");
    }
}
