//! `${name}` placeholders in job paths.

use anyhow::{Result, bail};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Prefix of environment variables that supply placeholder values.
pub const VAR_ENV_PREFIX: &str = "PATCHGUARD_VAR_";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .unwrap_or_else(|err| panic!("invalid placeholder regex: {err}"))
});

/// Placeholder values given on the command line, consulted before the
/// environment and the config file's `[vars]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarSet {
    overrides: IndexMap<String, String>,
}

impl VarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=value` assignments.
    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vars = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let Some((name, value)) = assignment.split_once('=') else {
                bail!("Variable assignment '{assignment}' is missing '='");
            };
            let name = name.trim();
            if name.is_empty() {
                bail!("Variable assignment '{assignment}' has an empty name");
            }
            vars.set(name, value);
        }
        Ok(vars)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(name.into(), value.into());
    }

    /// Look `name` up: overrides, then `PATCHGUARD_VAR_<NAME>`, then `file_vars`.
    pub fn lookup(&self, name: &str, file_vars: &IndexMap<String, String>) -> Option<String> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| std::env::var(env_key(name)).ok())
            .or_else(|| file_vars.get(name).cloned())
    }

    /// Replace every `${name}` in `template`. Unknown names are an error.
    pub fn expand(&self, template: &str, file_vars: &IndexMap<String, String>) -> Result<String> {
        let mut unknown = Vec::new();
        let expanded = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            self.lookup(name, file_vars).unwrap_or_else(|| {
                unknown.push(name.to_string());
                String::new()
            })
        });
        if !unknown.is_empty() {
            bail!("undefined variable(s): {}", unknown.join(", "));
        }
        Ok(expanded.into_owned())
    }
}

fn env_key(name: &str) -> String {
    format!("{VAR_ENV_PREFIX}{}", name.to_ascii_uppercase())
}
