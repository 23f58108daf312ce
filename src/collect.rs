//! File-set selection and the external tools that turn a file set into a
//! bundle.
//!
//! Usage figures come from `du -sh` and bundles from `tar -cf`; both are run
//! as child processes and a non-zero exit is reported as
//! [`CollectorError::ToolFailed`].

use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::SelectionMode;
use crate::error::{CollectorError, Result};

/// Paths bundled for one trigger, plus the generated files to remove
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    pub files: Vec<PathBuf>,
    pub temporaries: Vec<PathBuf>,
}

impl FileSet {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            temporaries: Vec::new(),
        }
    }
}

/// List the entries of `dir` selected by `selection`, sorted by name within
/// each directory. `dir` itself is never included.
pub fn collect_files(dir: &Path, selection: SelectionMode) -> Result<Vec<PathBuf>> {
    info!("Collecting selected files from {}", dir.display());

    if !dir.is_dir() {
        return Err(CollectorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a directory: {}", dir.display()),
        )));
    }

    let mut walker = WalkBuilder::new(dir);
    walker
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    if selection == SelectionMode::FilesOnly {
        walker.max_depth(Some(1));
    }

    let mut files = Vec::new();
    for result in walker.build() {
        match result {
            Ok(entry) => {
                if entry.depth() == 0 {
                    continue;
                }
                let keep = match selection {
                    SelectionMode::FilesOnly => entry.path().is_file(),
                    SelectionMode::FilesAndDirectoriesRecursive => true,
                };
                if keep {
                    files.push(entry.into_path());
                }
            }
            Err(err) => {
                warn!("Error walking directory: {}", err);
            }
        }
    }

    debug!("Selected {} entries from {}", files.len(), dir.display());
    Ok(files)
}

fn run_tool(program: &str, args: &[&OsStr]) -> Result<Output> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| CollectorError::ToolSpawn {
            tool: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(CollectorError::ToolFailed {
            tool: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Append one human-readable usage line per file to `<report_dir>/<report_name>`
/// using `usage_program -sh`.
///
/// The report is registered in both `set.files` and `set.temporaries` before
/// anything is written, so it is cleaned up even if a measurement fails. A
/// report left over from an earlier pass is not measured and not listed twice.
pub fn collect_disk_usage(
    set: &mut FileSet,
    report_dir: &Path,
    report_name: &str,
    usage_program: &str,
) -> Result<PathBuf> {
    let report = report_dir.join(report_name);
    info!("Writing disk usage information to {}", report.display());

    set.files.retain(|file| file != &report);
    let measured = set.files.clone();
    set.files.push(report.clone());
    set.temporaries.push(report.clone());

    let mut out = OpenOptions::new().create(true).append(true).open(&report)?;
    for file in &measured {
        let output = run_tool(usage_program, &[OsStr::new("-sh"), file.as_os_str()])?;
        out.write_all(&output.stdout)?;
    }
    out.flush()?;

    Ok(report)
}

/// Bundle `set.files` into `output_file` with `archive_program -cf`, then
/// remove the temporaries if `delete_temporaries` is set.
///
/// Temporaries are removed even when archiving fails. A cleanup failure is
/// logged and never replaces the archiving outcome.
pub fn store_files(
    set: &FileSet,
    output_file: &Path,
    archive_program: &str,
    delete_temporaries: bool,
) -> Result<()> {
    info!(
        "Storing collected data as tar archive in {}",
        output_file.display()
    );

    let mut args: Vec<&OsStr> = Vec::with_capacity(set.files.len() + 2);
    args.push(OsStr::new("-cf"));
    args.push(output_file.as_os_str());
    args.extend(set.files.iter().map(|file| file.as_os_str()));

    let archived = run_tool(archive_program, &args).map(|_| ());

    if delete_temporaries {
        if let Err(err) = remove_temporaries(&set.temporaries) {
            warn!("Failed to remove temporaries: {}", err);
        }
    }
    archived
}

/// Delete generated files. Entries that are already gone are ignored.
pub fn remove_temporaries(temporaries: &[PathBuf]) -> Result<()> {
    for path in temporaries {
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match removed {
            Ok(()) => debug!("Removed temporary {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Deterministic tag for a trigger's base name: the first 8 bytes of its
/// SHA-256, hex encoded.
pub fn archive_tag(name: &OsStr) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name_bytes(name));
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[cfg(unix)]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    name.to_string_lossy().into_owned().into_bytes()
}

/// `<output_dir>/archive.<tag>.tar` for `trigger`. Triggers sharing a base
/// name share an archive path.
pub fn archive_path(output_dir: &Path, trigger: &Path) -> PathBuf {
    let name = trigger
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from(trigger.as_os_str()));
    output_dir.join(format!("archive.{}.tar", archive_tag(&name)))
}
