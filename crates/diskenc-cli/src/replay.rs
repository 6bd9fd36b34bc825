//! Offline replay of captured agent traffic.

use anyhow::Result;
use diskenc_core::registry::JobKey;
use diskenc_core::signal::decode_line;
use diskenc_core::{
    DeviceId, DeviceJob, Dispatched, Inbound, NotificationDispatcher, Operation, Outcome,
    Presentation,
};
use diskenc_provider::{Presenter, ProgressSurface, SessionManager};
use log::warn;
use std::io::BufRead;

#[derive(Debug, Clone)]
pub(crate) struct ReplayedResult {
    pub(crate) device: DeviceId,
    pub(crate) operation: Operation,
    pub(crate) outcome: Outcome,
    pub(crate) presentation: Presentation,
}

#[derive(Debug, Default)]
pub(crate) struct ReplaySummary {
    pub(crate) signals: usize,
    pub(crate) skipped: usize,
    pub(crate) requests: usize,
    pub(crate) results: Vec<ReplayedResult>,
    pub(crate) active: Vec<DeviceJob>,
}

/// Feed every notification in `input` through `dispatcher`.
///
/// Malformed lines are skipped. Password requests are counted but never
/// answered, since replaying them would prompt for real credentials.
pub(crate) fn replay<I, S, N, R>(
    input: I,
    dispatcher: &mut NotificationDispatcher<S, N, R>,
) -> Result<ReplaySummary>
where
    I: BufRead,
    S: ProgressSurface,
    N: Presenter,
    R: SessionManager,
{
    let mut summary = ReplaySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(&line) {
            Ok(Inbound::Signal(signal)) => {
                summary.signals += 1;
                if let Dispatched::Terminal(report) = dispatcher.dispatch(signal) {
                    summary.results.push(ReplayedResult {
                        device: report.device,
                        operation: report.verdict.operation,
                        outcome: report.verdict.outcome,
                        presentation: report.presentation,
                    });
                }
            }
            Ok(Inbound::Request(_)) => summary.requests += 1,
            Err(err) => {
                warn!("line {}: {err}", index + 1);
                summary.skipped += 1;
            }
        }
    }

    summary.active = dispatcher.registry().jobs().cloned().collect();
    summary.active.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(summary)
}

pub(crate) fn print_summary(summary: &ReplaySummary) {
    for result in &summary.results {
        println!(
            "{}: {} -> {}{}",
            result.device,
            result.operation,
            result.outcome,
            match result.presentation {
                Presentation::RebootRequested => " (reboot requested)",
                Presentation::RebootDeclined => " (reboot postponed)",
                Presentation::RebootFailed => " (reboot request failed)",
                Presentation::RebootPending => " (reboot question pending)",
                Presentation::Notice => "",
            }
        );
    }

    println!(
        "{} notification(s) replayed, {} malformed line(s) skipped, {} password request(s) ignored.",
        summary.signals, summary.skipped, summary.requests
    );

    if summary.active.is_empty() {
        println!("No jobs in flight.");
        return;
    }
    println!("Jobs still in flight:");
    for job in &summary.active {
        let JobKey { device, kind } = &job.key;
        println!("  {kind} {device} [{}] {:.0}%", job.label(), job.progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskenc_core::registry::JobRegistry;
    use diskenc_core::{JobKind, OutcomePresenter};
    use diskenc_system::{CommandSession, LogProgress, TerminalPresenter};
    use std::io::Cursor;
    use std::time::Duration;

    const CAPTURE: &str = concat!(
        "{\"signal\":\"EncryptProgress\",\"args\":[\"/dev/sda1\",\"root\",0.0]}\n",
        "{\"signal\":\"EncryptProgress\",\"args\":[\"/dev/sda1\",\"root\",50.0]}\n",
        "{\"signal\":\"DecryptProgress\",\"args\":[\"/dev/sdb1\",\"data\",20.0]}\n",
        "garbage\n",
        "{\"request\":\"AcquireDevicePassword\",\"device\":\"/dev/sdb1\"}\n",
        "{\"signal\":\"EncryptDiskResult\",\"args\":[\"/dev/sda1\",\"root\",0]}\n",
        "{\"signal\":\"DecryptDiskResult\",\"args\":[\"/dev/sdc1\",\"home\",\"\",-1]}\n",
    );

    #[test]
    fn replay_reports_results_and_leftover_jobs() {
        let mut dispatcher = NotificationDispatcher::new(
            JobRegistry::new(Duration::from_secs(3)),
            LogProgress,
            OutcomePresenter::new(TerminalPresenter::new(false), CommandSession::new(&[])),
        );

        let summary = replay(Cursor::new(CAPTURE), &mut dispatcher).unwrap();
        assert_eq!(summary.signals, 5);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.requests, 1);

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].outcome, Outcome::Success);
        assert_eq!(summary.results[1].outcome, Outcome::RebootRequired);
        assert_eq!(summary.results[1].presentation, Presentation::RebootDeclined);

        assert_eq!(summary.active.len(), 1);
        assert_eq!(summary.active[0].key.kind, JobKind::Decrypt);
        assert_eq!(summary.active[0].progress, 20.0);
    }
}
