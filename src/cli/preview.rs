//! Inline image previews for terminals that speak the kitty graphics protocol.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::io::{self, Write};
use std::path::Path;

/// True for kitty itself and for terminals that implement its graphics protocol
pub fn is_kitty_compatible(term: &str, term_program: &str) -> bool {
    term.to_lowercase().contains("kitty") || term_program.to_lowercase().contains("ghostty")
}

/// Check the current terminal via `TERM` / `TERM_PROGRAM`
pub fn terminal_supports_preview() -> bool {
    let term = std::env::var("TERM").unwrap_or_default();
    let term_program = std::env::var("TERM_PROGRAM").unwrap_or_default();
    is_kitty_compatible(&term, &term_program)
}

/// Escape sequence asking the terminal to read and display a PNG from disk.
///
/// `a=T` transmits and displays, `t=f` passes a file path (base64), `f=100` is PNG.
pub fn kitty_escape(path: &Path) -> String {
    let encoded = STANDARD.encode(path.to_string_lossy().as_bytes());
    format!("\x1b_Gf=100,a=T,t=f;{}\x1b\\", encoded)
}

/// Draw `path` inline; does nothing on unsupported terminals
pub fn show(path: &Path) -> io::Result<()> {
    if !terminal_supports_preview() {
        return Ok(());
    }

    let absolute = std::path::absolute(path)?;
    let mut stdout = io::stdout().lock();
    write!(stdout, "{}", kitty_escape(&absolute))?;
    writeln!(stdout)?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_detection() {
        assert!(is_kitty_compatible("xterm-kitty", ""));
        assert!(is_kitty_compatible("xterm-256color", "ghostty"));
        assert!(is_kitty_compatible("XTERM-KITTY", ""));
        assert!(!is_kitty_compatible("xterm-256color", "iTerm.app"));
        assert!(!is_kitty_compatible("", ""));
    }

    #[test]
    fn test_escape_sequence() {
        let escape = kitty_escape(Path::new("/tmp/a.png"));
        assert_eq!(escape, "\x1b_Gf=100,a=T,t=f;L3RtcC9hLnBuZw==\x1b\\");
    }
}
