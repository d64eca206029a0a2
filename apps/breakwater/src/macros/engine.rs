use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::time::sleep;
use tracing::debug;

use crate::proto::MenuKind;

use super::{MacroStep, StateExpect, StepSend};

/// The slice of the session a running macro may observe.
pub trait MacroTerminal: Send + Sync {
    fn current_state(&self) -> MenuKind;
    fn row_matches(&self, row: i32, pattern: &str) -> bool;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MacroError {
    #[error("timed out waiting for the screen to change")]
    Timeout,
    #[error("expected state {expected:?}, but in {actual:?}")]
    UnexpectedState {
        expected: Vec<MenuKind>,
        actual: MenuKind,
    },
    #[error("retry budget exhausted")]
    RetryExhausted,
    #[error("macro cancelled")]
    Cancelled,
    #[error("send path closed")]
    TransportGone,
}

/// State carried across the steps of one script run.
pub struct MacroContext {
    /// Fires when a settled screen has been classified.
    pub signal: Arc<Notify>,
    /// Per-step wait for that signal.
    pub wait_interval: Duration,
    /// Flips to true to cancel the run at its next wait point.
    pub cancel: watch::Receiver<bool>,

    resend: Option<Vec<u8>>,
    retries_left: u32,
    last_state: Option<Vec<MenuKind>>,
}

impl MacroContext {
    pub fn new(
        signal: Arc<Notify>,
        wait_interval: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            signal,
            wait_interval,
            cancel,
            resend: None,
            retries_left: 0,
            last_state: None,
        }
    }
}

enum Verdict {
    Proceed,
    /// Re-issue the original payload.
    Retry,
    /// Re-issue this payload instead.
    Reissue(Vec<u8>),
    Fail(MacroError),
}

fn resolve(expect: &StateExpect, ctx: &MacroContext) -> Vec<MenuKind> {
    match expect {
        StateExpect::OneOf(states) => states.clone(),
        StateExpect::FromLast => ctx.last_state.clone().unwrap_or_default(),
    }
}

/// An empty requirement (a `FromLast` with no history) passes.
fn verify(states: &[MenuKind], actual: MenuKind) -> bool {
    states.is_empty() || states.contains(&actual)
}

fn assess(
    step: &MacroStep,
    terminal: &dyn MacroTerminal,
    timeouted: bool,
    ctx: &mut MacroContext,
) -> Verdict {
    let actual = terminal.current_state();
    let expected = step
        .to_state
        .as_ref()
        .map(|e| resolve(e, ctx))
        .unwrap_or_default();
    let state_ok = verify(&expected, actual);

    // timeout continuation: the remote did not repaint (or we are mid-nudge);
    // re-issue the configured payload while the budget lasts
    if step.timeout_ok && step.resend.is_some() && step.retry > 0 {
        if (timeouted || ctx.resend.is_some()) && (!state_ok || timeouted) {
            if ctx.retries_left > 0 {
                ctx.retries_left -= 1;
                debug!(target: "breakwater::macro", left = ctx.retries_left, "resend");
                return Verdict::Reissue(step.resend.clone().unwrap_or_default());
            }
            return Verdict::Fail(MacroError::RetryExhausted);
        }
    }

    if !state_ok {
        return Verdict::Fail(MacroError::UnexpectedState { expected, actual });
    }

    if let Some(pattern) = &step.pattern {
        if step.retry > 0 && !terminal.row_matches(step.row, pattern) {
            if ctx.retries_left > 0 {
                ctx.retries_left -= 1;
                debug!(target: "breakwater::macro", left = ctx.retries_left, pattern, "row retry");
                return if timeouted {
                    match &step.resend {
                        Some(resend) => Verdict::Reissue(resend.clone()),
                        None => Verdict::Retry,
                    }
                } else {
                    Verdict::Retry
                };
            }
            return Verdict::Fail(MacroError::RetryExhausted);
        }
    }

    Verdict::Proceed
}

async fn run_step(
    step: &MacroStep,
    terminal: &dyn MacroTerminal,
    sender: &mpsc::Sender<Vec<u8>>,
    ctx: &mut MacroContext,
) -> Result<(), MacroError> {
    if let Some(expect) = &step.in_state {
        let expected = resolve(expect, ctx);
        let actual = terminal.current_state();
        if !verify(&expected, actual) {
            return Err(MacroError::UnexpectedState { expected, actual });
        }
    }

    ctx.retries_left = step.retry;
    ctx.resend = None;

    loop {
        let payload = match &ctx.resend {
            Some(resend) => resend.clone(),
            None => match &step.send {
                StepSend::Bytes(bytes) => bytes.clone(),
                StepSend::PerState(map) => {
                    let state = terminal.current_state();
                    match map.iter().find(|(k, _)| *k == state) {
                        Some((_, bytes)) => bytes.clone(),
                        None => {
                            // no payload for this state: fine if the step's
                            // goal is already met
                            let expected = step
                                .to_state
                                .as_ref()
                                .map(|e| resolve(e, ctx))
                                .unwrap_or_default();
                            if verify(&expected, state) {
                                break;
                            }
                            return Err(MacroError::UnexpectedState {
                                expected,
                                actual: state,
                            });
                        }
                    }
                }
            },
        };

        sender
            .send(payload)
            .await
            .map_err(|_| MacroError::TransportGone)?;

        let mut cancel = ctx.cancel.clone();
        let timeouted = tokio::select! {
            _ = cancel.changed() => return Err(MacroError::Cancelled),
            _ = ctx.signal.notified() => false,
            _ = sleep(ctx.wait_interval) => {
                if step.timeout_ok {
                    true
                } else {
                    return Err(MacroError::Timeout);
                }
            }
        };

        match assess(step, terminal, timeouted, ctx) {
            Verdict::Proceed => break,
            Verdict::Retry => {
                ctx.resend = None;
                continue;
            }
            Verdict::Reissue(bytes) => {
                ctx.resend = Some(bytes);
                continue;
            }
            Verdict::Fail(err) => return Err(err),
        }
    }

    ctx.last_state = step.to_state.as_ref().map(|e| resolve(e, ctx));
    Ok(())
}

/// Replay a whole script. Aborts on the first failing step; the caller's
/// completion hook is responsible for re-enabling whatever the run
/// suspended.
pub async fn run_script(
    script: &[MacroStep],
    terminal: &dyn MacroTerminal,
    sender: &mpsc::Sender<Vec<u8>>,
    ctx: &mut MacroContext,
) -> Result<(), MacroError> {
    for (n, step) in script.iter().enumerate() {
        debug!(target: "breakwater::macro", step = n, "macro step");
        if *ctx.cancel.borrow() {
            return Err(MacroError::Cancelled);
        }
        run_step(step, terminal, sender, ctx).await?;
    }
    Ok(())
}
