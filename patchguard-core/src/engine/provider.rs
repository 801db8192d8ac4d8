use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Command;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{BuiltinEngine, EngineSpec, ExternalToolEngine, PatchEngine};
use crate::error::{PatchError, PatchResult};
use crate::patch::PatchFormat;

/// Hands out patch engines on request.
pub trait EngineProvider {
    fn acquire(&self, spec: &EngineSpec, format: PatchFormat)
    -> PatchResult<Box<dyn PatchEngine>>;
}

impl<P: EngineProvider + ?Sized> EngineProvider for &P {
    fn acquire(
        &self,
        spec: &EngineSpec,
        format: PatchFormat,
    ) -> PatchResult<Box<dyn PatchEngine>> {
        (**self).acquire(spec, format)
    }
}

#[derive(Default)]
struct ResolverState {
    resolved: HashMap<String, PathBuf>,
    installs_attempted: HashSet<String>,
    cache_hits: usize,
    cache_misses: usize,
}

/// Builtin engines on demand; external programs resolved on `PATH` once per
/// provider, with at most one install attempt per program.
#[derive(Default)]
pub struct DefaultEngineProvider {
    state: Mutex<ResolverState>,
}

impl DefaultEngineProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(hits, misses)` of the program resolution cache.
    pub fn cache_stats(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.cache_hits, state.cache_misses)
    }

    fn resolve(&self, program: &str) -> Option<PathBuf> {
        let mut state = self.state.lock();
        if let Some(path) = state.resolved.get(program) {
            let path = path.clone();
            state.cache_hits += 1;
            return Some(path);
        }
        state.cache_misses += 1;

        match which::which(program) {
            Ok(path) => {
                debug!(program, path = %path.display(), "Resolved patch engine");
                state.resolved.insert(program.to_string(), path.clone());
                Some(path)
            }
            Err(err) => {
                debug!(program, error = %err, "Patch engine not on PATH");
                None
            }
        }
    }

    fn install(&self, program: &str, command: &str) -> PatchResult<()> {
        if !self
            .state
            .lock()
            .installs_attempted
            .insert(program.to_string())
        {
            return Err(PatchError::EngineUnavailable {
                program: program.to_string(),
                reason: format!("not found on PATH; '{command}' already ran without providing it"),
            });
        }

        let argv = shell_words::split(command).map_err(|err| PatchError::EngineUnavailable {
            program: program.to_string(),
            reason: format!("cannot parse install command '{command}': {err}"),
        })?;
        let Some((exe, args)) = argv.split_first() else {
            return Err(PatchError::EngineUnavailable {
                program: program.to_string(),
                reason: "install command is empty".to_string(),
            });
        };

        info!(program, command, "Installing missing patch engine");
        let status = Command::new(exe)
            .args(args)
            .status()
            .map_err(|err| PatchError::EngineUnavailable {
                program: program.to_string(),
                reason: format!("failed to run '{command}': {err}"),
            })?;

        if !status.success() {
            warn!(program, command, ?status, "Install command failed");
            return Err(PatchError::EngineUnavailable {
                program: program.to_string(),
                reason: format!("'{command}' exited with {status}"),
            });
        }
        Ok(())
    }
}

impl EngineProvider for DefaultEngineProvider {
    fn acquire(
        &self,
        spec: &EngineSpec,
        format: PatchFormat,
    ) -> PatchResult<Box<dyn PatchEngine>> {
        let (program, install) = match spec {
            EngineSpec::Builtin => return Ok(Box::new(BuiltinEngine::new(format))),
            EngineSpec::External { program, install } => (program, install),
        };

        if let Some(path) = self.resolve(program) {
            return Ok(Box::new(ExternalToolEngine::new(path)));
        }

        let Some(command) = install else {
            return Err(PatchError::EngineUnavailable {
                program: program.clone(),
                reason: "not found on PATH and no install command configured".to_string(),
            });
        };

        self.install(program, command)?;
        self.resolve(program)
            .map(|path| Box::new(ExternalToolEngine::new(path)) as Box<dyn PatchEngine>)
            .ok_or_else(|| PatchError::EngineUnavailable {
                program: program.clone(),
                reason: format!("still not found on PATH after running '{command}'"),
            })
    }
}
