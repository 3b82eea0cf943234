//! Colored status lines for the terminal

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_marked(out: &mut impl Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message to stderr in red
pub fn print_error(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message to stderr in yellow
pub fn print_warning(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
///
/// Goes to stderr so that command output on stdout stays clean.
pub fn print_info(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Cyan, "ℹ ", msg);
}
