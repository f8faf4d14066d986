//! Terminal shell for a voice session
//!
//! Enter taps the primary control, `r` re-enters voice mode, `q` (or
//! Ctrl-C) exits. Session changes are printed as they are published.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::backend::CourseContext;
use crate::controller::VoiceController;
use crate::session::{SessionState, SessionView, Speaker};

/// Interactive terminal front end
pub struct Shell {
    controller: VoiceController,
    course: CourseContext,
}

impl Shell {
    #[must_use]
    pub const fn new(controller: VoiceController, course: CourseContext) -> Self {
        Self { controller, course }
    }

    /// Enter voice mode and run until the student quits
    ///
    /// # Errors
    ///
    /// Returns error if stdin cannot be read
    pub async fn run(self) -> crate::Result<()> {
        let mut updates = self.controller.subscribe();
        let mut shown = updates.borrow_and_update().clone();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("Voice mode: Enter = talk/stop, r = restart, q = quit");
        self.controller.enter_voice_mode(self.course.clone()).await;

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = updates.borrow_and_update().clone();
                    for line in render_update(&shown, &next) {
                        println!("{line}");
                    }
                    shown = next;
                }
                line = lines.next_line() => {
                    match line?.as_deref().map(str::trim) {
                        None | Some("q" | "quit") => break,
                        Some("r") => {
                            self.controller.exit_voice_mode().await;
                            self.controller.enter_voice_mode(self.course.clone()).await;
                        }
                        Some("") => self.controller.primary_control_tapped().await,
                        Some(other) => println!("unknown command: {other}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.controller.exit_voice_mode().await;
        println!("Left voice mode");
        Ok(())
    }
}

/// Lines to print for the change from `prev` to `next`
#[must_use]
pub fn render_update(prev: &SessionView, next: &SessionView) -> Vec<String> {
    let mut out = Vec::new();

    // A shorter transcript means a fresh session
    let seen = if next.transcript.len() < prev.transcript.len() {
        0
    } else {
        prev.transcript.len()
    };
    for entry in next.transcript.iter().skip(seen) {
        let who = match entry.speaker {
            Speaker::User => "You",
            Speaker::Assistant => "Tutor",
        };
        out.push(format!("{who}: {}", entry.text));
    }

    if next.last_error != prev.last_error {
        if let Some(err) = &next.last_error {
            out.push(format!("! {err} (Enter to dismiss)"));
        }
    }

    if next.state != prev.state || next.active != prev.active {
        let status = match (next.active, next.state) {
            (false, _) => "voice mode off",
            (true, SessionState::Idle) => "idle, press Enter to talk",
            (true, SessionState::Greeting) => "saying hello...",
            (true, SessionState::Listening) => "listening...",
            (true, SessionState::Thinking) => "thinking...",
            (true, SessionState::Speaking) => "speaking, press Enter to interrupt",
            (true, SessionState::Error) => "something went wrong",
        };
        out.push(format!("[{}] {status} ({})", next.state, next.emotion));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::Emotion;
    use crate::session::{ErrorKind, SessionError, TranscriptEntry};

    fn view(state: SessionState, lines: &[(Speaker, &str)]) -> SessionView {
        SessionView {
            state,
            active: true,
            transcript: lines
                .iter()
                .map(|(speaker, text)| TranscriptEntry {
                    speaker: *speaker,
                    text: (*text).to_string(),
                })
                .collect(),
            emotion: Emotion::Encouraging,
            last_error: None,
        }
    }

    #[test]
    fn test_prints_only_new_lines() {
        let prev = view(SessionState::Thinking, &[(Speaker::User, "what is entropy")]);
        let next = view(
            SessionState::Speaking,
            &[
                (Speaker::User, "what is entropy"),
                (Speaker::Assistant, "A measure of disorder."),
            ],
        );

        let lines = render_update(&prev, &next);
        assert_eq!(lines[0], "Tutor: A measure of disorder.");
        assert!(lines[1].starts_with("[speaking]"));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_no_change_prints_nothing() {
        let v = view(SessionState::Listening, &[]);
        assert!(render_update(&v, &v).is_empty());
    }

    #[test]
    fn test_error_is_shown_once() {
        let prev = view(SessionState::Listening, &[]);
        let mut next = view(SessionState::Error, &[]);
        next.last_error = Some(SessionError {
            kind: ErrorKind::Capture,
            message: "no speech detected".to_string(),
        });

        let lines = render_update(&prev, &next);
        assert!(lines.iter().any(|l| l.contains("no speech detected")));
        assert!(render_update(&next, &next).is_empty());
    }

    #[test]
    fn test_fresh_session_reprints() {
        let prev = view(
            SessionState::Speaking,
            &[(Speaker::User, "a"), (Speaker::Assistant, "b")],
        );
        let next = view(SessionState::Speaking, &[(Speaker::Assistant, "hello again")]);
        assert_eq!(render_update(&prev, &next), vec!["Tutor: hello again"]);
    }
}
