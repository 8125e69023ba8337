//! The wire grammar: parsing inbound event batches and encoding outbound
//! decision batches. Transport-agnostic — [`crate::transport`] hands this
//! module whole message bodies (already length-delimited) to parse, and
//! takes whole encoded bodies back to frame and send.

use crate::error::{Error, Result};
use crate::job::{JobId, ResIdx, Time};

/// The only protocol version this sidecar understands.
pub const PROTOCOL_VERSION: u32 = 0;

/// One `now_event_received_at:TYPE[:data...]` entry in an inbound batch.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    JobSubmission { job_id: JobId },
    JobCompletion { job_id: JobId, finish_time: Time },
    JobRejection,
    Nop,
    PStateChanged { first: ResIdx, last: ResIdx, pstate: u32 },
    EnergyConsumed { joules: f64 },
}

/// A fully parsed inbound message: the simulator's current time plus the
/// ordered list of events that happened at or before it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundBatch {
    pub now: Time,
    pub events: Vec<InboundEvent>,
}

/// One decision to send back to the simulator, each tagged with the
/// simulation time it is valid at (not necessarily `now`: a decision can be
/// dated in the future, e.g. a wakeup request).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a batch of jobs, each on its own resource list.
    StartJobs(Vec<(JobId, Vec<ResIdx>)>),
    ChangePState { first: ResIdx, last: ResIdx, pstate: u32 },
    RequestEnergy,
    WakeMeUpAt(Time),
    Nop,
}

/// Parses one already-length-delimited, UTF-8 decoded message body.
///
/// Grammar: `VERSION:NOW|NOW:TYPE:data|NOW:TYPE:data|...`. The leading
/// `VERSION:NOW` segment carries no event; every segment after the first
/// `|` does.
pub fn parse_inbound(msg: &str) -> Result<InboundBatch> {
    let mut segments = msg.split('|');

    let header = segments
        .next()
        .ok_or_else(|| Error::Protocol("empty message".into()))?;
    let mut header_fields = header.split(':');
    let version: u32 = header_fields
        .next()
        .ok_or_else(|| Error::Protocol("missing version field".into()))?
        .parse()
        .map_err(|_| Error::Protocol(format!("non-numeric version in header {header:?}")))?;
    if version != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let now: Time = header_fields
        .next()
        .ok_or_else(|| Error::Protocol("missing timestamp in header".into()))?
        .parse()
        .map_err(|_| Error::Protocol(format!("non-numeric timestamp in header {header:?}")))?;

    let mut events = vec![];
    for seg in segments {
        if seg.is_empty() {
            continue;
        }
        let mut fields = seg.splitn(3, ':');
        let _timestamp = fields
            .next()
            .ok_or_else(|| Error::Protocol(format!("malformed event segment {seg:?}")))?;
        let kind = fields
            .next()
            .ok_or_else(|| Error::Protocol(format!("missing event type in {seg:?}")))?;
        let data = fields.next();

        let event = match kind {
            "R" => InboundEvent::JobRejection,
            "N" => InboundEvent::Nop,
            "S" => {
                let job_id = parse_job_id(data, seg)?;
                InboundEvent::JobSubmission { job_id }
            }
            "C" => {
                let job_id = parse_job_id(data, seg)?;
                InboundEvent::JobCompletion { job_id, finish_time: now }
            }
            "p" => parse_pstate_event(data, seg)?,
            "e" => {
                let joules: f64 = data
                    .ok_or_else(|| Error::Protocol(format!("missing energy value in {seg:?}")))?
                    .parse()
                    .map_err(|_| Error::Protocol(format!("non-numeric energy value in {seg:?}")))?;
                InboundEvent::EnergyConsumed { joules }
            }
            "J" | "P" | "E" => {
                return Err(Error::Protocol(format!(
                    "received a server-only message type {kind:?} from the simulator"
                )))
            }
            other => return Err(Error::Protocol(format!("unknown event type {other:?}"))),
        };
        events.push(event);
    }

    Ok(InboundBatch { now, events })
}

fn parse_job_id(data: Option<&str>, seg: &str) -> Result<JobId> {
    data.ok_or_else(|| Error::Protocol(format!("missing job id in {seg:?}")))?
        .parse()
        .map_err(|_| Error::Protocol(format!("non-numeric job id in {seg:?}")))
}

fn parse_pstate_event(data: Option<&str>, seg: &str) -> Result<InboundEvent> {
    let data = data.ok_or_else(|| Error::Protocol(format!("missing pstate payload in {seg:?}")))?;
    let (nodes, pstate) = data
        .split_once('=')
        .ok_or_else(|| Error::Protocol(format!("malformed pstate payload in {seg:?}")))?;
    let pstate: u32 = pstate
        .parse()
        .map_err(|_| Error::Protocol(format!("non-numeric pstate in {seg:?}")))?;
    let (first, last) = match nodes.split_once('-') {
        Some((a, b)) => (
            a.parse().map_err(|_| Error::Protocol(format!("bad node range in {seg:?}")))?,
            b.parse().map_err(|_| Error::Protocol(format!("bad node range in {seg:?}")))?,
        ),
        None => {
            let n: ResIdx = nodes
                .parse()
                .map_err(|_| Error::Protocol(format!("bad node id in {seg:?}")))?;
            (n, n)
        }
    };
    Ok(InboundEvent::PStateChanged { first, last, pstate })
}

/// Formats a simulation timestamp with exactly six decimal digits, matching
/// the simulator's own `'%.*f' % (6, t)` formatting.
fn format_time(t: Time) -> String {
    format!("{t:.6}")
}

fn encode_command(cmd: &Command) -> String {
    match cmd {
        Command::StartJobs(jobs) => {
            let mut body = String::from("J:");
            for (id, resources) in jobs {
                body.push_str(&id.to_string());
                body.push('=');
                let list = resources
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                body.push_str(&list);
                body.push(';');
            }
            body.pop(); // trailing ';'
            body
        }
        Command::ChangePState { first, last, pstate } => {
            if first == last {
                format!("P:{first}={pstate}")
            } else {
                format!("P:{first}-{last}={pstate}")
            }
        }
        Command::RequestEnergy => "E".to_string(),
        Command::WakeMeUpAt(t) => format!("n:{}", format_time(*t)),
        Command::Nop => "N".to_string(),
    }
}

/// Encodes an outbound message body: `0:NOW|t1:cmd1|t2:cmd2|...`, or
/// `0:NOW|NOW:N` if nothing is pending, exactly mirroring
/// `Batsim._read_bat_msg`'s reply construction.
pub fn encode_outbound(now: Time, mut decisions: Vec<(Time, Command)>) -> String {
    decisions.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut msg = format!("0:{}|", format_time(now));
    if decisions.is_empty() {
        msg.push_str(&format!("{}:N", format_time(now)));
    } else {
        for (t, cmd) in &decisions {
            msg.push_str(&format!("{}:{}|", format_time(*t), encode_command(cmd)));
        }
        msg.pop(); // trailing '|'
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submission_and_completion() {
        let batch = parse_inbound("0:10.000000|10.000000:S:3|10.000000:C:7").unwrap();
        assert_eq!(batch.now, 10.0);
        assert_eq!(
            batch.events,
            vec![
                InboundEvent::JobSubmission { job_id: 3 },
                InboundEvent::JobCompletion { job_id: 7, finish_time: 10.0 },
            ]
        );
    }

    #[test]
    fn parses_nop_only_message() {
        let batch = parse_inbound("0:5.500000|5.500000:N").unwrap();
        assert_eq!(batch.now, 5.5);
        assert_eq!(batch.events, vec![InboundEvent::Nop]);
    }

    #[test]
    fn rejects_unsupported_version() {
        assert!(matches!(
            parse_inbound("1:0.0|0.0:N"),
            Err(Error::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn parses_pstate_range_and_single_node() {
        let batch = parse_inbound("0:0.0|0.0:p:3-5=2").unwrap();
        assert_eq!(
            batch.events,
            vec![InboundEvent::PStateChanged { first: 3, last: 5, pstate: 2 }]
        );
        let batch = parse_inbound("0:0.0|0.0:p:3=2").unwrap();
        assert_eq!(
            batch.events,
            vec![InboundEvent::PStateChanged { first: 3, last: 3, pstate: 2 }]
        );
    }

    #[test]
    fn encodes_start_jobs_with_comma_and_semicolon_separators() {
        let body = encode_outbound(
            10.0,
            vec![(10.0, Command::StartJobs(vec![(1, vec![0, 1, 2]), (2, vec![3])]))],
        );
        assert_eq!(body, "0:10.000000|10.000000:J:1=0,1,2;2=3");
    }

    #[test]
    fn encodes_idle_tick_as_nop() {
        assert_eq!(encode_outbound(2.5, vec![]), "0:2.500000|2.500000:N");
    }

    #[test]
    fn decisions_are_sorted_by_timestamp() {
        let body = encode_outbound(
            0.0,
            vec![(5.0, Command::Nop), (1.0, Command::RequestEnergy)],
        );
        assert_eq!(body, "0:0.000000|1.000000:E|5.000000:N");
    }
}
