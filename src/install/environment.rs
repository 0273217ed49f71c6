//! Terminal detection for choosing between progress bars and plain log output

use std::io::IsTerminal;

/// Check whether progress can be drawn interactively
///
/// Returns `false` if any of:
/// - stdout is not a TTY (piped, redirected, service context)
/// - `TERM` is `dumb`
/// - `CI` is set
pub fn is_interactive_terminal() -> bool {
    if !std::io::stdout().is_terminal() {
        return false;
    }
    if std::env::var("TERM").is_ok_and(|t| t == "dumb") {
        return false;
    }
    std::env::var_os("CI").is_none()
}
