use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// A bar drawn to stderr, or nowhere when `hidden`.
pub fn bar(header: String, length: u64, hidden: bool) -> ProgressBar {
    let pb = ProgressBar::hidden();
    pb.set_prefix(header);
    pb.set_length(length);
    pb.set_style(
        ProgressStyle::with_template("{prefix}...\n[{wide_bar:.cyan/blue}] {pos}/{len}")
            .expect("incorrect progress bar format string")
            .progress_chars("#>-"),
    );
    if !hidden {
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(4));
    }
    pb
}
