//! Single-line, TTY-only progress renderer

use std::io::{IsTerminal as _, Write as _};

use crate::pipeline::Step;

/// Is stdout a TTY? Checked once at startup; the HUD is disabled entirely otherwise
/// and the existing `log::info!` step-boundary lines remain the only progress output.
pub(crate) fn enabled() -> bool {
    std::io::stdout().is_terminal()
}

/// Render one status line: step, cycle, percent, rate, temperature
pub(crate) fn render(step: Step, cycle: u32, cycles: u32, percent: u8, rate_bytes_per_sec: Option<f64>, temp_c: Option<f64>) {
    let rate = rate_bytes_per_sec.map_or_else(|| "-".to_owned(), |r| format!("{:.1} MB/s", r / 1_000_000.0));
    let temp = temp_c.map_or_else(|| "unknown".to_owned(), |t| format!("{t:.1}\u{b0}C"));
    print!("\r{step} [{cycle}/{cycles}] {percent:>3}% {rate} temp={temp}   ");
    let _ = std::io::stdout().flush();
}

/// Clear the current HUD line, called once a step completes
pub(crate) fn clear_line() {
    print!("\r\x1b[2K");
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_does_not_panic_without_data() {
        render(Step::PreRead, 1, 3, 0, None, None);
    }
}
