//! `TerminalReporter`, the presentation-layer [`ProgressSink`].
//!
//! Wraps `&OutputContext` so application services can narrate progress
//! without depending on any presentation type directly.

use indicatif::ProgressBar;
use owo_colors::OwoColorize as _;

use crate::application::events::ProgressEvent;
use crate::application::ports::ProgressSink;
use crate::output::OutputContext;

pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
    spinner: Option<ProgressBar>,
}

impl<'a> TerminalReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx, spinner: None }
    }

    /// Reporter that narrates above a live spinner. Completed actions print
    /// above the bar and the spinner message tracks the step in flight.
    #[must_use]
    pub fn with_spinner(ctx: &'a OutputContext, spinner: ProgressBar) -> Self {
        Self {
            ctx,
            spinner: Some(spinner),
        }
    }
}

impl ProgressSink for TerminalReporter<'_> {
    fn emit(&self, event: ProgressEvent) {
        if self.ctx.quiet {
            return;
        }
        let mark = if event.success {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        let line = format!("  {mark} [{}] {}", event.step, event.message);
        if let Some(pb) = &self.spinner {
            pb.set_message(event.step.clone());
            pb.println(line);
        } else {
            println!("{line}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn spinner_message_tracks_the_current_step() {
        let ctx = OutputContext::new(true, false);
        let pb = ProgressBar::hidden();
        let reporter = TerminalReporter::with_spinner(&ctx, pb.clone());
        reporter.emit(ProgressEvent::new("runtime-install", "npm install done", true));
        assert_eq!(pb.message(), "runtime-install");
    }

    #[test]
    fn quiet_context_leaves_the_spinner_untouched() {
        let ctx = OutputContext::new(true, true);
        let pb = ProgressBar::hidden();
        let reporter = TerminalReporter::with_spinner(&ctx, pb.clone());
        reporter.emit(ProgressEvent::new("readiness", "host answered", true));
        assert_eq!(pb.message(), "");
    }
}
