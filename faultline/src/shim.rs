//! Staging the interception runtime into the campaign working
//! directory.
//!
//! The preload environment entry references `./fault_inject.so`, so the
//! built cdylib is copied next to the protocol files for the life of the
//! campaign and removed again by cleanup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use faultline_protocol::SHIM_FILE;

/// Environment override naming the interception library to stage; also
/// the hook for supplying a 32-bit build when the target needs one.
pub const SHIM_ENV: &str = "FAULTLINE_SHIM";

const BUILT_NAME: &str = "libfault_inject.so";

/// Finds the built interception library: the `FAULTLINE_SHIM` override,
/// then next to the orchestrator executable (where cargo places sibling
/// artifacts), then the working directory itself.
pub fn locate() -> Result<PathBuf> {
    if let Ok(path) = env::var(SHIM_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        bail!("{SHIM_ENV} points at {}, which does not exist", path.display());
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(BUILT_NAME);
            if sibling.is_file() {
                return Ok(sibling);
            }
        }
    }

    let local = PathBuf::from(SHIM_FILE);
    if local.is_file() {
        return Ok(local);
    }

    bail!("cannot locate the interception library; set {SHIM_ENV} to the built {BUILT_NAME}")
}

/// Copies the located library into `dir` under its campaign name and
/// returns the staged path.
pub fn stage(dir: &Path) -> Result<PathBuf> {
    let source = locate()?;
    let staged = dir.join(SHIM_FILE);
    if source != staged {
        fs::copy(&source, &staged).with_context(|| {
            format!(
                "could not stage {} as {}",
                source.display(),
                staged.display()
            )
        })?;
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_copies_into_the_campaign_directory() {
        let source_dir = tempfile::tempdir().unwrap();
        let campaign_dir = tempfile::tempdir().unwrap();
        let built = source_dir.path().join(BUILT_NAME);
        fs::write(&built, b"not really a shared object").unwrap();

        // Env-var plumbing is process-global; keep it scoped to the test.
        unsafe { env::set_var(SHIM_ENV, &built) };
        let staged = stage(campaign_dir.path()).unwrap();
        unsafe { env::remove_var(SHIM_ENV) };

        assert_eq!(staged, campaign_dir.path().join(SHIM_FILE));
        assert_eq!(fs::read(&staged).unwrap(), b"not really a shared object");
    }
}
