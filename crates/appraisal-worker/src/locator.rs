//! Launch descriptors and the executable-locator seam.
//!
//! [`ExecutableLocator`] is the boundary between the supervisor and whatever
//! knows where the worker lives on this install. The supervisor depends only
//! on the returned [`LaunchDescriptor`] and never inspects platform or
//! packaging layout itself, apart from [`resolve_program_path`], which
//! validates the descriptor's path right before spawning.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Extensions never chosen as the executable when scanning a directory.
const SCRIPT_EXTENSIONS: &[&str] = &[
    "py", "pyc", "sh", "bat", "cmd", "ps1", "js", "json", "txt", "md", "toml", "cfg", "log",
];

/// How the worker is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    /// An interpreter running a module, e.g. `python3 -m report_automation`.
    InterpreterInvocation,
    /// A self-contained executable.
    DirectExecutable,
}

impl fmt::Display for LaunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterpreterInvocation => f.write_str("interpreter-invocation"),
            Self::DirectExecutable => f.write_str("direct-executable"),
        }
    }
}

/// Everything needed to spawn the worker. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    pub kind: LaunchKind,
    pub executable_path: PathBuf,
    pub argv: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl LaunchDescriptor {
    /// Descriptor for a self-contained executable with no arguments.
    pub fn direct(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: LaunchKind::DirectExecutable,
            executable_path: executable_path.into(),
            argv: Vec::new(),
            working_directory: None,
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Resolves which program to run for the current install.
#[async_trait]
pub trait ExecutableLocator: Send + Sync + fmt::Debug {
    async fn locate(&self) -> anyhow::Result<LaunchDescriptor>;
}

/// Locator that always returns the same descriptor.
#[derive(Debug, Clone)]
pub struct FixedLocator {
    descriptor: LaunchDescriptor,
}

impl FixedLocator {
    pub fn new(descriptor: LaunchDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl ExecutableLocator for FixedLocator {
    async fn locate(&self) -> anyhow::Result<LaunchDescriptor> {
        Ok(self.descriptor.clone())
    }
}

/// Locator that builds the descriptor from [`WorkerConfig`].
///
/// With `interpreter` set the worker runs as `<interpreter> [-m <module>]
/// <args...>`; otherwise `executable` is run directly with `args`.
#[derive(Debug, Clone)]
pub struct ConfiguredLocator {
    config: WorkerConfig,
}

impl ConfiguredLocator {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn descriptor(&self) -> LaunchDescriptor {
        let cfg = &self.config;
        let (kind, executable_path, mut argv) = match cfg.interpreter.as_deref() {
            Some(interpreter) => {
                let mut argv = Vec::new();
                if let Some(ref module) = cfg.module {
                    argv.push("-m".to_string());
                    argv.push(module.clone());
                }
                (
                    LaunchKind::InterpreterInvocation,
                    PathBuf::from(interpreter),
                    argv,
                )
            }
            None => (
                LaunchKind::DirectExecutable,
                PathBuf::from(&cfg.executable),
                Vec::new(),
            ),
        };
        argv.extend(cfg.args.iter().cloned());
        LaunchDescriptor {
            kind,
            executable_path,
            argv,
            working_directory: cfg.working_dir.clone(),
            env: cfg.env.clone(),
        }
    }
}

#[async_trait]
impl ExecutableLocator for ConfiguredLocator {
    async fn locate(&self) -> anyhow::Result<LaunchDescriptor> {
        Ok(self.descriptor())
    }
}

/// Validate and normalize the program path of a descriptor.
///
/// - A bare program name (no directory separators) is returned unchanged and
///   left to the OS `PATH` lookup at spawn time.
/// - A path to a regular file is returned unchanged.
/// - A path to a directory is normalized by scanning its entries in
///   lexicographic order: first a file whose stem equals the directory name,
///   then the first executable-looking file, then the first regular file.
///
/// # Errors
///
/// [`WorkerError::SpawnFailed`] when the path does not exist, is neither file
/// nor directory, or names a directory with no usable file.
pub fn resolve_program_path(descriptor: &LaunchDescriptor) -> Result<PathBuf, WorkerError> {
    let path = &descriptor.executable_path;
    let fail = |reason: String| WorkerError::SpawnFailed {
        path: path.display().to_string(),
        reason,
    };

    if is_bare_name(path) {
        return Ok(path.clone());
    }

    let meta = fs::metadata(path).map_err(|e| fail(format!("cannot access executable: {e}")))?;
    if meta.is_file() {
        return Ok(path.clone());
    }
    if !meta.is_dir() {
        return Err(fail("not a regular file".to_string()));
    }

    match normalize_directory(path) {
        Ok(Some(found)) => {
            tracing::info!(
                dir = %path.display(),
                executable = %found.display(),
                "resolved executable inside directory"
            );
            Ok(found)
        }
        Ok(None) => Err(fail("directory contains no executable file".to_string())),
        Err(e) => Err(fail(format!("cannot scan directory: {e}"))),
    }
}

fn is_bare_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

fn normalize_directory(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let dir_name = dir.file_name().and_then(|n| n.to_str());
    if let Some(name) = dir_name {
        if let Some(same) = files
            .iter()
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(name) && !is_script(p))
        {
            return Ok(Some(same.clone()));
        }
    }

    if let Some(exe) = files.iter().find(|p| looks_executable(p)) {
        return Ok(Some(exe.clone()));
    }

    Ok(files.into_iter().next())
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SCRIPT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(unix)]
fn looks_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if is_script(path) {
        return false;
    }
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn looks_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("exe"))
        .unwrap_or(false)
}
