//! Inspection of the binary under test and process-level preparation for
//! a campaign.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use nix::sys::personality::{self, Persona};
use object::Object;

/// ELF class of the target, which decides which interception runtime
/// build can be preloaded into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bitness {
    Elf32,
    Elf64,
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bitness::Elf32 => f.write_str("32 bit"),
            Bitness::Elf64 => f.write_str("64 bit"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TargetInfo {
    pub bitness: Bitness,
    /// Whether DWARF line information is present. Its absence is a soft
    /// condition: the campaign still runs, symbolization degrades to the
    /// unknown sentinel.
    pub has_debug_info: bool,
}

/// Reads the target's object header and debug sections.
pub fn inspect(path: &Path) -> Result<TargetInfo> {
    let data = fs::read(path)
        .with_context(|| format!("could not read target binary {}", path.display()))?;
    let bitness = match object::FileKind::parse(&*data)
        .with_context(|| format!("{} is not an object file", path.display()))?
    {
        object::FileKind::Elf32 => Bitness::Elf32,
        object::FileKind::Elf64 => Bitness::Elf64,
        other => bail!("unsupported target format {other:?}"),
    };
    let has_debug_info = object::File::parse(&*data)
        .map(|file| file.section_by_name(".debug_line").is_some())
        .unwrap_or(false);
    Ok(TargetInfo {
        bitness,
        has_debug_info,
    })
}

/// Turns off address-space layout randomization for this process and
/// everything it forks. The call-site addresses recorded while profiling
/// must stay valid across every later injection run; without a fixed
/// load base that correlation breaks.
pub fn disable_aslr() -> Result<()> {
    let persona = personality::get().context("could not read personality")?;
    personality::set(persona | Persona::ADDR_NO_RANDOMIZE)
        .context("could not turn off ASLR")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Minimal ELF header: magic, class, data encoding, version; the
    // rest may stay zero for FileKind detection.
    fn elf_header(class: u8) -> [u8; 64] {
        let mut header = [0u8; 64];
        header[0..4].copy_from_slice(b"\x7fELF");
        header[4] = class;
        header[5] = 1;
        header[6] = 1;
        header
    }

    #[test]
    fn detects_the_elf_class() {
        let dir = tempfile::tempdir().unwrap();
        for (class, expected) in [(1u8, Bitness::Elf32), (2u8, Bitness::Elf64)] {
            let path = dir.path().join(format!("victim{class}"));
            let mut file = fs::File::create(&path).unwrap();
            file.write_all(&elf_header(class)).unwrap();
            drop(file);
            assert_eq!(inspect(&path).unwrap().bitness, expected);
        }
    }

    #[test]
    fn non_object_input_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        assert!(inspect(&path).is_err());
    }

    #[test]
    fn missing_target_is_a_setup_error() {
        assert!(inspect(Path::new("/nonexistent/victim")).is_err());
    }
}
