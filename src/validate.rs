//! Pre-spawn validation.
//!
//! Checks the configured program before any process is spawned, providing a
//! single aggregated error listing every violation. Runs synchronously and
//! never during a live run.

use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::LeashError;

/// Collect violation descriptions for `config`; an empty list means valid.
///
/// With the injection check disabled only a non-empty program name is
/// required. With it enabled (the default) the program must also resolve to
/// an existing executable file, contain no embedded spaces, and not be
/// flagged as derived from untrusted input. `replace_process` is always
/// rejected. Violations accumulate rather than short-circuiting.
pub fn violations(config: &RunConfig) -> Vec<String> {
    violations_with(config, std::env::var_os("PATH"))
}

/// Validate `config`, aggregating any violations into a single error.
pub fn validate(config: &RunConfig) -> Result<(), LeashError> {
    let found = violations(config);
    if found.is_empty() {
        Ok(())
    } else {
        Err(LeashError::Validation {
            program: config.program.clone(),
            violations: found.join(", "),
        })
    }
}

/// Testable inner implementation that accepts an explicit `PATH` value.
fn violations_with(config: &RunConfig, path_var: Option<std::ffi::OsString>) -> Vec<String> {
    let mut found = Vec::new();

    if config.replace_process {
        found.push("process replacement mode is not supported".to_owned());
    }

    if config.program.is_empty() {
        found.push("program is empty".to_owned());
        return found;
    }

    if !config.injection_check {
        return found;
    }

    if config.program.contains(' ') {
        found.push("program path contains a space".to_owned());
    }
    if config.untrusted_input {
        found.push("program path came from untrusted input".to_owned());
    }

    if is_explicit_path(&config.program) {
        let path = Path::new(&config.program);
        if !path.exists() {
            found.push(format!("path '{}' does not exist", config.program));
        } else if !is_executable(path) {
            found.push(format!("path '{}' is not executable", config.program));
        }
    } else if resolve_on_path(&config.program, path_var).is_none() {
        found.push(format!("'{}' not found on PATH", config.program));
    }

    found
}

fn is_explicit_path(program: &str) -> bool {
    program.contains(std::path::MAIN_SEPARATOR) || program.contains('/')
}

/// Search each `PATH` directory for an executable file named `program`.
fn resolve_on_path(
    program: &str,
    path_var: Option<std::ffi::OsString>,
) -> Option<PathBuf> {
    let paths = path_var?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            if Path::new(program).extension().is_none() {
                let with_exe = dir.join(format!("{program}.exe"));
                if is_executable(&with_exe) {
                    return Some(with_exe);
                }
            }
        }
    }
    None
}

/// Returns `true` when `path` exists and is a regular file.
///
/// On Unix this additionally checks the executable permission bits via
/// `std::os::unix::fs::PermissionsExt`.
pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn accepts_program_on_real_path() {
        let config = RunConfig::new("echo");
        assert!(violations(&config).is_empty());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_nonexistent_explicit_path() {
        let config = RunConfig::new("/no/such/binary");
        let found = violations(&config);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("does not exist"), "got: {found:?}");
    }

    #[test]
    fn rejects_name_missing_from_path() {
        let config = RunConfig::new("leash-nonexistent-binary-xyz-999");
        let found = violations(&config);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("not found on PATH"), "got: {found:?}");
    }

    #[test]
    fn rejects_empty_program() {
        let config = RunConfig::new("");
        assert_eq!(violations(&config), vec!["program is empty".to_owned()]);
    }

    #[test]
    fn empty_program_rejected_even_without_injection_check() {
        let config = RunConfig::new("").injection_check(false);
        assert_eq!(violations(&config).len(), 1);
    }

    #[test]
    fn space_in_path_rejected_only_with_injection_check() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("my tool");
        write_executable(&bin);
        let program = bin.to_str().unwrap().to_owned();

        let checked = RunConfig::new(program.clone());
        let found = violations(&checked);
        assert!(
            found.iter().any(|v| v.contains("space")),
            "expected space violation, got: {found:?}"
        );

        let unchecked = RunConfig::new(program).injection_check(false);
        assert!(violations(&unchecked).is_empty());
    }

    #[test]
    fn untrusted_input_flag_is_a_violation() {
        let config = RunConfig::new("echo").untrusted_input(true);
        let found = violations(&config);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("untrusted"), "got: {found:?}");
    }

    #[test]
    fn replace_process_is_always_rejected() {
        let mut config = RunConfig::new("echo");
        config.replace_process = true;
        let found = violations(&config);
        assert!(
            found.iter().any(|v| v.contains("not supported")),
            "got: {found:?}"
        );
    }

    #[test]
    fn violations_accumulate_and_join() {
        let mut config = RunConfig::new("/no/such/bin ary").untrusted_input(true);
        config.replace_process = true;
        let err = validate(&config).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("not supported"), "got: {msg}");
        assert!(msg.contains("space"), "got: {msg}");
        assert!(msg.contains("untrusted"), "got: {msg}");
        assert!(msg.contains("does not exist"), "got: {msg}");
        assert!(msg.contains(", "), "violations are comma-joined: {msg}");
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_a_violation() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("no-exec");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();

        let config = RunConfig::new(bin.to_str().unwrap());
        let found = violations(&config);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("not executable"), "got: {found:?}");
    }

    #[test]
    fn directory_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_executable(dir.path()));
    }

    #[test]
    fn bare_name_resolution_honors_given_path_var() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("my-tool");
        write_executable(&bin);

        let config = RunConfig::new("my-tool");
        let path_var = Some(OsString::from(dir.path().as_os_str()));
        assert!(violations_with(&config, path_var).is_empty());
        assert_eq!(violations_with(&config, None).len(), 1);
    }

    fn write_executable(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .mode(0o755)
                .open(path)
                .unwrap();
        }
        #[cfg(not(unix))]
        {
            std::fs::write(path, "").unwrap();
        }
    }
}
