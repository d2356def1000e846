//! Address-to-source symbolization through an external address-to-line
//! tool.

use std::fmt;
use std::process::Command;

/// A resolved source position, or the explicit unknown sentinel when
/// debug information is missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub function: String,
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn unknown() -> SourceLocation {
        SourceLocation {
            function: "??".to_owned(),
            file: "unknown".to_owned(),
            line: 0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.file != "unknown"
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) line {}", self.function, self.file, self.line)
    }
}

/// Resolves an address inside a binary to a source position. A trait so
/// reports can be rendered under test without a toolchain present.
pub trait Symbolizer {
    fn resolve(&self, binary: &str, address: u64) -> SourceLocation;
}

/// The production symbolizer: shells out to `addr2line`.
pub struct Addr2Line;

impl Symbolizer for Addr2Line {
    fn resolve(&self, binary: &str, address: u64) -> SourceLocation {
        let output = Command::new("addr2line")
            .args(["-C", "-e", binary, "-s", "-f", "-i"])
            .arg(format!("{address:x}"))
            .output();
        match output {
            Ok(output) if output.status.success() => {
                parse_output(&String::from_utf8_lossy(&output.stdout))
            }
            _ => SourceLocation::unknown(),
        }
    }
}

/// Parses addr2line's two-line answer: the demangled function name, then
/// `file:line`. Inlined-frame output repeats the pair; the first pair is
/// the innermost frame and is the one reported.
pub fn parse_output(text: &str) -> SourceLocation {
    let mut lines = text.lines();
    let Some(function) = lines.next() else {
        return SourceLocation::unknown();
    };
    let Some(location) = lines.next() else {
        return SourceLocation::unknown();
    };
    if function.is_empty() || location.starts_with('?') {
        return SourceLocation::unknown();
    }

    let Some((file, rest)) = location.split_once(':') else {
        return SourceLocation::unknown();
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let Ok(line) = digits.parse::<u32>() else {
        return SourceLocation::unknown();
    };

    SourceLocation {
        function: function.to_owned(),
        file: file.to_owned(),
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_two_line_answer() {
        let location = parse_output("do_mem\ntest.c:21\n");
        assert_eq!(location.function, "do_mem");
        assert_eq!(location.file, "test.c");
        assert_eq!(location.line, 21);
        assert!(location.is_known());
    }

    #[test]
    fn keeps_the_innermost_inlined_frame() {
        let location = parse_output("helper\ntest.c:7\ndo_mem\ntest.c:21\n");
        assert_eq!(location.function, "helper");
        assert_eq!(location.line, 7);
    }

    #[test]
    fn discriminator_suffixes_do_not_break_the_line_number() {
        let location = parse_output("main\ntest.c:33 (discriminator 2)\n");
        assert_eq!(location.line, 33);
    }

    #[test]
    fn missing_debug_info_degrades_to_unknown() {
        assert_eq!(parse_output("??\n??:0\n"), SourceLocation::unknown());
        assert_eq!(parse_output(""), SourceLocation::unknown());
        assert_eq!(parse_output("main\n"), SourceLocation::unknown());
        assert!(!SourceLocation::unknown().is_known());
    }
}
