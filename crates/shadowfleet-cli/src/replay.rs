//! Replays a JSON-lines message log through an in-process monitor.
//!
//! Each line is either a [`FleetMessage`] or a timeout marker
//! `{"type":"timeout","agent_id":"...","at":"<rfc3339>"}`. Deliveries are
//! applied in file order at the time they carry, so a replay is
//! deterministic regardless of how long it takes to run. A line without a
//! timestamp takes the time of the latest stamped line before it.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use shadowfleet_kernel::heartbeat::{self, HeartbeatSummary};
use shadowfleet_kernel::{Delivery, FleetMonitor};
use shadowfleet_types::agent::AgentId;
use shadowfleet_types::event::{FleetEvent, FleetEventKind};
use shadowfleet_types::message::FleetMessage;
use std::io::BufRead;
use tracing::{debug, warn};

/// One parsed log line.
#[derive(Debug)]
pub struct ReplayEntry {
    pub delivery: Delivery,
    /// When the delivery happened, if the line says.
    pub at: Option<DateTime<Utc>>,
}

/// Parse a single log line.
pub fn parse_line(line: &str) -> Result<ReplayEntry> {
    let value: Value = serde_json::from_str(line)?;

    if value.get("type").and_then(Value::as_str) == Some("timeout") {
        let agent_id = value
            .get("agent_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("timeout line without agent_id"))?;
        let at = match value.get("at") {
            Some(raw) => Some(serde_json::from_value::<DateTime<Utc>>(raw.clone())?),
            None => None,
        };
        return Ok(ReplayEntry {
            delivery: Delivery::Timeout(AgentId::new(agent_id)),
            at,
        });
    }

    // `sent_at` defaults to now when absent, which would break determinism.
    let stamped = value.get("sent_at").is_some();
    let message: FleetMessage = serde_json::from_value(value)?;
    Ok(ReplayEntry {
        at: stamped.then_some(message.sent_at),
        delivery: Delivery::Message(message),
    })
}

/// What a replay did.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: usize,
    pub dropped: usize,
    /// Time of the latest delivery in the log.
    pub clock: Option<DateTime<Utc>>,
    pub sweep: Option<HeartbeatSummary>,
}

/// Feed every line of `reader` to the monitor, then optionally deliver
/// timeouts to agents that were overdue when the log ended.
pub async fn replay(
    monitor: &FleetMonitor,
    reader: impl BufRead,
    sweep: bool,
) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry = match parse_line(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed line");
                report.skipped += 1;
                continue;
            }
        };

        let at = entry.at.or(report.clock).unwrap_or_else(Utc::now);
        report.clock = Some(report.clock.map_or(at, |c| c.max(at)));
        let events = monitor.dispatcher().apply(entry.delivery, at);
        report.applied += 1;
        publish(monitor, events, &mut report).await;
    }

    if sweep {
        let at = report.clock.unwrap_or_else(Utc::now);
        let statuses = heartbeat::check_shadows(monitor.registry(), at);
        for status in statuses.iter().filter(|s| s.overdue) {
            let overdue = Delivery::Overdue {
                agent_id: status.agent_id.clone(),
                silent_since: status.silent_since,
            };
            let events = monitor.dispatcher().apply(overdue, at);
            publish(monitor, events, &mut report).await;
        }
        report.sweep = Some(heartbeat::summarize(&statuses));
    }

    debug!(
        applied = report.applied,
        skipped = report.skipped,
        dropped = report.dropped,
        "Replay finished"
    );
    Ok(report)
}

async fn publish(monitor: &FleetMonitor, events: Vec<FleetEvent>, report: &mut ReplayReport) {
    report.dropped += events
        .iter()
        .filter(|e| matches!(e.kind, FleetEventKind::EventDropped { .. }))
        .count();
    monitor.bus().publish_all(events).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowfleet_types::agent::ShadowState;
    use shadowfleet_types::config::FleetConfig;
    use shadowfleet_types::message::MessageKind;
    use std::io::Cursor;

    const LOG: &str = r#"
# two agents, one goes quiet
{"agent_id":"a1","type":"onboarding_request","sent_at":"2024-05-01T10:00:00Z"}
{"agent_id":"a1","type":"onboarding_ack","sent_at":"2024-05-01T10:00:01Z"}
{"agent_id":"a1","type":"heartbeat","sent_at":"2024-05-01T10:00:02Z"}
{"agent_id":"a2","type":"onboarding_request","sent_at":"2024-05-01T10:00:00Z"}
{"agent_id":"a2","type":"onboarding_ack","sent_at":"2024-05-01T10:00:01Z"}
{"agent_id":"a2","type":"heartbeat","sent_at":"2024-05-01T10:00:02Z"}
not json at all
{"agent_id":"ghost","type":"heartbeat","sent_at":"2024-05-01T10:01:00Z"}
{"agent_id":"a2","type":"heartbeat","sent_at":"2024-05-01T10:03:20Z"}
"#;

    #[test]
    fn test_parse_message_line() {
        let entry =
            parse_line(r#"{"agent_id":"a1","type":"heartbeat","sent_at":"2024-05-01T10:00:00Z"}"#)
                .unwrap();
        assert!(matches!(
            entry.delivery,
            Delivery::Message(FleetMessage {
                kind: MessageKind::Heartbeat,
                ..
            })
        ));
        assert!(entry.at.is_some());
    }

    #[test]
    fn test_parse_timeout_line() {
        let entry = parse_line(r#"{"type":"timeout","agent_id":"a1"}"#).unwrap();
        assert!(matches!(entry.delivery, Delivery::Timeout(ref id) if id.as_str() == "a1"));
        assert!(entry.at.is_none());

        assert!(parse_line(r#"{"type":"timeout"}"#).is_err());
        assert!(parse_line(r#"{"type":"teleport","agent_id":"a1"}"#).is_err());
    }

    #[tokio::test]
    async fn test_replay_with_sweep() {
        let monitor = FleetMonitor::new(FleetConfig::default());
        let report = replay(&monitor, Cursor::new(LOG), true).await.unwrap();

        assert_eq!(report.applied, 8);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.sweep.as_ref().map(|s| s.overdue), Some(1));

        let a1 = monitor.registry().get(&"a1".into()).unwrap();
        let a2 = monitor.registry().get(&"a2".into()).unwrap();
        assert_eq!(a1.state(), ShadowState::Inactive);
        assert_eq!(a2.state(), ShadowState::Active);
        assert!(monitor.registry().get(&"ghost".into()).is_none());
    }

    #[test]
    fn test_parse_message_line_without_timestamp() {
        let entry = parse_line(r#"{"agent_id":"a1","type":"heartbeat"}"#).unwrap();
        assert!(matches!(entry.delivery, Delivery::Message(_)));
        assert!(entry.at.is_none());
    }

    #[tokio::test]
    async fn test_unstamped_lines_follow_log_clock() {
        let log = r#"
{"agent_id":"a1","type":"onboarding_request","sent_at":"2024-05-01T10:00:00Z"}
{"agent_id":"a1","type":"onboarding_ack","sent_at":"2024-05-01T10:00:01Z"}
{"agent_id":"a2","type":"onboarding_request","sent_at":"2024-05-01T10:00:00Z"}
{"agent_id":"a2","type":"onboarding_ack","sent_at":"2024-05-01T10:03:20Z"}
{"agent_id":"a1","type":"heartbeat"}
"#;
        let monitor = FleetMonitor::new(FleetConfig::default());
        let report = replay(&monitor, Cursor::new(log), true).await.unwrap();

        let last_stamp: DateTime<Utc> = "2024-05-01T10:03:20Z".parse().unwrap();
        assert_eq!(report.applied, 5);
        assert_eq!(report.clock, Some(last_stamp));
        assert_eq!(report.sweep.as_ref().map(|s| s.overdue), Some(0));

        let a1 = monitor.registry().get(&"a1".into()).unwrap();
        assert_eq!(a1.last_seen(), last_stamp);
        assert_eq!(a1.state(), ShadowState::Active);
    }

    #[tokio::test]
    async fn test_replay_without_sweep_keeps_states() {
        let monitor = FleetMonitor::new(FleetConfig::default());
        let report = replay(&monitor, Cursor::new(LOG), false).await.unwrap();
        assert!(report.sweep.is_none());
        let a1 = monitor.registry().get(&"a1".into()).unwrap();
        assert_eq!(a1.state(), ShadowState::Active);
    }
}
