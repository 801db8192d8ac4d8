//! Build flags and the gates derived from them.

use anyhow::{Context, Result};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Environment variable holding extra build flags, split like a shell would.
pub const BUILD_FLAGS_ENV: &str = "PATCHGUARD_BUILD_FLAGS";

/// Normalise a define so `-DNAME`, `-D NAME` and `-D  NAME` compare equal.
pub fn normalize_flag(flag: &str) -> String {
    let flag = flag.trim();
    match flag.strip_prefix("-D") {
        Some(name) => format!("-D {}", name.trim_start()),
        None => flag.to_string(),
    }
}

/// Set of build flags in normalised form, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    flags: IndexSet<String>,
}

impl BuildFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags from [`BUILD_FLAGS_ENV`], or none when it is unset.
    pub fn from_env() -> Result<Self> {
        let mut flags = Self::new();
        if let Ok(value) = std::env::var(BUILD_FLAGS_ENV) {
            flags
                .extend_from_str(&value)
                .with_context(|| format!("Failed to parse {BUILD_FLAGS_ENV}"))?;
        }
        Ok(flags)
    }

    /// Add the flags in a shell-style string. A lone `-D` takes the next word.
    pub fn extend_from_str(&mut self, text: &str) -> Result<()> {
        let words = shell_words::split(text)
            .with_context(|| format!("Invalid build flag string '{text}'"))?;
        let mut words = words.into_iter();
        while let Some(word) = words.next() {
            if word == "-D" {
                match words.next() {
                    Some(name) => self.insert(&format!("-D {name}")),
                    None => self.insert(&word),
                }
            } else {
                self.insert(&word);
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, flag: &str) {
        self.flags.insert(normalize_flag(flag));
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.flags.contains(&normalize_flag(flag))
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }
}

/// `gate = { any_flag = [...], all_flags = [...] }` on a job.
///
/// Both lists must be satisfied; an empty list is satisfied trivially.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    #[serde(default)]
    pub any_flag: Vec<String>,
    #[serde(default)]
    pub all_flags: Vec<String>,
}

impl GateConfig {
    pub fn evaluate(&self, flags: &BuildFlags) -> bool {
        let any = self.any_flag.is_empty() || self.any_flag.iter().any(|f| flags.contains(f));
        let all = self.all_flags.iter().all(|f| flags.contains(f));
        any && all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn flags(text: &str) -> BuildFlags {
        let mut flags = BuildFlags::new();
        flags
            .extend_from_str(text)
            .unwrap_or_else(|err| panic!("bad flags {text}: {err}"));
        flags
    }

    #[test]
    fn define_spellings_are_equivalent() {
        assert_eq!(normalize_flag("-DUSB_MTPDISK"), "-D USB_MTPDISK");
        assert_eq!(normalize_flag("  -D   USB_MTPDISK "), "-D USB_MTPDISK");
        assert_eq!(normalize_flag("-O2"), "-O2");
    }

    #[test]
    fn lone_define_joins_next_word() {
        let parsed = flags("-D USB_MTPDISK_SERIAL -DTEENSY_OPT_SMALLEST_CODE -Wall");
        assert!(parsed.contains("-D USB_MTPDISK_SERIAL"));
        assert!(parsed.contains("-DTEENSY_OPT_SMALLEST_CODE"));
        assert!(parsed.contains("-Wall"));
        assert!(!parsed.contains("-D USB_MTPDISK"));
    }

    #[test]
    fn quoted_defines_survive_splitting() {
        let parsed = flags("'-D USB_MTPDISK' -DVERSION=\"1 2\"");
        assert!(parsed.contains("-DUSB_MTPDISK"));
        assert!(parsed.contains("-D VERSION=1 2"));
    }

    #[test]
    fn any_flag_gate() {
        let gate = GateConfig {
            any_flag: vec!["-D USB_MTPDISK_SERIAL".into(), "-D USB_MTPDISK".into()],
            all_flags: Vec::new(),
        };
        assert!(gate.evaluate(&flags("-DUSB_MTPDISK")));
        assert!(!gate.evaluate(&flags("-D USB_SERIAL")));
        assert!(!gate.evaluate(&BuildFlags::new()));
    }

    #[test]
    fn all_flags_gate() {
        let gate = GateConfig {
            any_flag: Vec::new(),
            all_flags: vec!["-D A".into(), "-D B".into()],
        };
        assert!(gate.evaluate(&flags("-DA -DB")));
        assert!(!gate.evaluate(&flags("-DA")));
        assert!(GateConfig::default().evaluate(&BuildFlags::new()));
    }

    #[test]
    #[serial]
    fn reads_flags_from_environment() -> Result<()> {
        // SAFETY: serialised with every other test touching the environment.
        unsafe { std::env::set_var(BUILD_FLAGS_ENV, "-D USB_MTPDISK -O2") };
        let parsed = BuildFlags::from_env();
        unsafe { std::env::remove_var(BUILD_FLAGS_ENV) };

        let parsed = parsed?;
        assert!(parsed.contains("-DUSB_MTPDISK"));
        assert_eq!(parsed.iter().count(), 2);
        Ok(())
    }
}
