use super::state::RunStatus;
use tokio::sync::broadcast;

/// Run events for real-time updates
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        suite: String,
        profiles: Vec<String>,
    },
    RunFinished {
        passed: bool,
        degraded: bool,
    },

    ProfileStarted {
        profile: String,
        step_count: usize,
    },
    ProfileFinished {
        profile: String,
        status: RunStatus,
        duration_ms: u64,
    },

    StepStarted {
        profile: String,
        index: usize,
        step: String,
    },
    StepPassed {
        profile: String,
        index: usize,
        duration_ms: u64,
        notes: Vec<String>,
    },
    StepFailed {
        profile: String,
        index: usize,
        error: String,
        soft: bool,
        duration_ms: u64,
    },
    StepSkipped {
        profile: String,
        step: String,
        reason: String,
    },

    /// Non-fatal trouble worth surfacing next to the step output
    Log {
        profile: String,
        message: String,
    },
}

/// Event emitter for broadcasting run events. Cheap to clone; every
/// profile run holds its own handle.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<RunEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<RunEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // Hidden draw target when piped, to avoid terminal escape codes
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        // One spinner per profile; profiles may run in parallel
        let mut spinners: HashMap<String, (ProgressBar, String)> = HashMap::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                RunEvent::RunStarted {
                    run_id,
                    suite,
                    profiles,
                } => {
                    multi
                        .println(format!(
                            "\n{} {} [{}] run {}",
                            "▶".green().bold(),
                            suite.white().bold(),
                            profiles.join(", ").cyan(),
                            run_id.dimmed()
                        ))
                        .ok();
                }

                RunEvent::RunFinished { passed, degraded } => {
                    for (_, (pb, _)) in spinners.drain() {
                        pb.finish();
                    }
                    let verdict = match (passed, degraded) {
                        (true, false) => "PASS".green().bold(),
                        (true, true) => "PASS (degraded)".yellow().bold(),
                        (false, _) => "FAIL".red().bold(),
                    };
                    println!("\n{} Run finished: {}", "■".blue().bold(), verdict);
                }

                RunEvent::ProfileStarted {
                    profile,
                    step_count,
                } => {
                    multi
                        .println(format!(
                            "\n  {} Profile: {} ({} steps)",
                            "→".blue(),
                            profile.white().bold(),
                            step_count
                        ))
                        .ok();
                }

                RunEvent::ProfileFinished {
                    profile,
                    status,
                    duration_ms,
                } => {
                    if let Some((pb, _)) = spinners.remove(&profile) {
                        pb.finish_and_clear();
                    }
                    let status_str = match status {
                        RunStatus::Passed => "PASSED".green().bold(),
                        RunStatus::Degraded { soft_failures } => {
                            format!("DEGRADED ({} soft failures)", soft_failures)
                                .yellow()
                                .bold()
                        }
                        RunStatus::Failed { hard_failures } => {
                            format!("FAILED ({} hard)", hard_failures).red().bold()
                        }
                    };
                    multi
                        .println(format!(
                            "  {} Profile {} [{}] {}ms",
                            "←".blue(),
                            profile,
                            status_str,
                            duration_ms
                        ))
                        .ok();
                }

                RunEvent::StepStarted {
                    profile,
                    index,
                    step,
                } => {
                    if let Some((pb, _)) = spinners.remove(&profile) {
                        pb.finish_and_clear();
                    }
                    let pb = multi.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("    {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }
                    let body = format!("[{}:{}] {}", profile, index, step.dimmed());
                    pb.set_message(body.clone());
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinners.insert(profile, (pb, body));
                }

                RunEvent::StepPassed {
                    profile,
                    duration_ms,
                    notes,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&profile) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {} ({}ms)", "✓".green(), body, duration_ms))
                            .ok();
                    }
                    for note in notes {
                        multi
                            .println(format!("        {} {}", "ℹ".blue(), note.dimmed()))
                            .ok();
                    }
                }

                RunEvent::StepFailed {
                    profile,
                    error,
                    soft,
                    duration_ms,
                    ..
                } => {
                    let mark = if soft { "⚠".yellow() } else { "✗".red() };
                    if let Some((pb, body)) = spinners.remove(&profile) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {} ({}ms)", mark, body, duration_ms))
                            .ok();
                    }
                    multi
                        .println(format!("        {}", error.red()))
                        .ok();
                }

                RunEvent::StepSkipped {
                    profile,
                    step,
                    reason,
                } => {
                    multi
                        .println(format!(
                            "    {} [{}] {} ({})",
                            "○".yellow(),
                            profile,
                            step,
                            reason.dimmed()
                        ))
                        .ok();
                }

                RunEvent::Log { profile, message } => {
                    multi
                        .println(format!("      [{}] {}", profile, message.yellow()))
                        .ok();
                }
            }
        }
    }
}
