use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::jobs::{Job, JobEvent, JobEventKind, StepStatus};
use crate::pipeline::{FileCategory, ReviewReport};
use crate::ui::icons::{CHECK, CROSS, FILE_NEW, FOLDER, REVIEW, RUNNING, SPARKLE};

/// Terminal UI for one generation job, driven by its event stream.
///
/// Two bars are stacked: overall progress (0-100) and a spinner naming the
/// running step. Finished steps are printed above the bars.
pub struct JobProgressUI {
    multi: MultiProgress,
    job_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
    /// Number of steps already printed as finished.
    printed_steps: Mutex<usize>,
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl JobProgressUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let job_bar = multi.add(ProgressBar::new(100));
        job_bar.set_style(
            bar_style("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .progress_chars("█▓▒░"),
        );
        job_bar.set_prefix("   Job");

        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(bar_style("{prefix:.bold.dim} {spinner} {msg}"));
        step_bar.set_prefix("  Step");

        Self {
            multi,
            job_bar,
            step_bar,
            verbose,
            printed_steps: Mutex::new(0),
        }
    }

    /// Hidden bars for non-interactive output.
    pub fn hidden(verbose: bool) -> Self {
        let ui = Self::new(verbose);
        ui.multi
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        ui
    }

    /// Print above the bars; plain stderr when the bars are not drawn.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn start(&self, prompt: &str, mode: &str) {
        self.job_bar
            .set_message(format!("{} {}", style(mode).yellow(), style(prompt).dim()));
        self.step_bar.set_message("queued");
        self.step_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Apply one event for the watched job.
    pub fn handle_event(&self, event: &JobEvent) {
        self.job_bar.set_position(u64::from(event.progress));

        let mut printed = self
            .printed_steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for step in event.steps.iter().skip(*printed) {
            match step.status {
                StepStatus::Running => break,
                StepStatus::Completed => {
                    self.print_line(format!("  {}{}", CHECK, style(&step.name).green()));
                }
                StepStatus::Failed => {
                    self.print_line(format!("  {}{}", CROSS, style(&step.name).red().bold()));
                }
            }
            *printed += 1;
        }

        if let Some(running) = event
            .steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Running)
        {
            self.step_bar
                .set_message(format!("{}{}", RUNNING, style(&running.name).cyan()));
        }

        if self.verbose && event.kind != JobEventKind::Completed {
            self.print_line(format!(
                "    {} {} {}%",
                style("→").dim(),
                style(event.status.as_str()).dim(),
                event.progress
            ));
        }
    }

    pub fn finish_success(&self, job: &Job) {
        self.step_bar.finish_and_clear();
        self.job_bar.set_position(100);
        self.job_bar
            .finish_with_message(format!("{}{}", SPARKLE, style("done").green().bold()));

        let Some(result) = &job.result else { return };
        self.print_line(format!(
            "\n{} {} ({} mode, {} files{})",
            CHECK,
            style(result.domain).green().bold(),
            result.mode.as_str(),
            result.files.len(),
            if result.from_cache { ", cached" } else { "" }
        ));
        if let Some(quality) = result.quality {
            self.print_line(format!("  quality {:.1}/10", quality));
        }
        if let Some(review) = &result.review {
            self.show_review(review);
        }
    }

    pub fn finish_failure(&self, error: &str) {
        self.step_bar.finish_and_clear();
        self.job_bar.abandon_with_message(format!("{}failed", CROSS));
        self.print_line(format!("\n{} {}", CROSS, style(error).red()));
    }

    fn show_review(&self, review: &ReviewReport) {
        let score = style(format!("{}/100", review.score));
        let score = if review.score >= 80 {
            score.green()
        } else {
            score.yellow()
        };
        self.print_line(format!("  {}review {}", REVIEW, score.bold()));
        if self.verbose {
            for issue in &review.issues {
                self.print_line(format!("    - {}", style(issue).dim()));
            }
        }
    }

    /// List files written under `root`, grouped by category in verbose mode.
    pub fn show_written(&self, root: &Path, paths: &[&str]) {
        self.print_line(format!(
            "{}{} files written to {}",
            FOLDER,
            style(paths.len()).cyan().bold(),
            root.display()
        ));
        if !self.verbose {
            return;
        }
        for path in paths {
            self.print_line(format!(
                "    {}{} {}",
                FILE_NEW,
                path,
                style(format!("({:?})", FileCategory::of(path)).to_lowercase()).dim()
            ));
        }
    }
}
