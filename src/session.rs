//! The protocol session: owns the connection to the simulator, the current
//! simulation time, and the job registry, and dispatches each inbound event
//! to the policy. Mirrors `Batsim`'s `_read_bat_msg`/`start`/`do_next_event`
//! trio, minus the parts (workload loading, transport construction) that
//! now live in their own modules.

use std::collections::HashMap;
use std::rc::Rc;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::job::{Job, JobId, Time};
use crate::policy::Policy;
use crate::protocol::{self, Command, InboundEvent};
use crate::transport::Transport;

pub struct Session<T: Transport, P: Policy> {
    transport: T,
    policy: P,
    jobs: HashMap<JobId, Rc<Job>>,
    current_time: Time,
}

impl<T: Transport, P: Policy> Session<T, P> {
    pub fn new(transport: T, policy: P, jobs: HashMap<JobId, Rc<Job>>) -> Self {
        Self { transport, policy, jobs, current_time: 0.0 }
    }

    /// Runs the request/reply loop until the simulator closes the
    /// connection. Each iteration is exactly one round trip: read a batch,
    /// dispatch every event in it, reply with whatever the policy decided.
    pub fn run(&mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }

    /// Processes one inbound batch. Returns `Ok(false)` when the simulator
    /// closed the connection (a clean, non-error termination).
    fn step(&mut self) -> Result<bool> {
        let Some(raw) = self.transport.read_message()? else {
            info!("connection closed by simulator");
            return Ok(false);
        };

        let batch = protocol::parse_inbound(&raw)?;
        self.current_time = batch.now;

        let mut decisions = vec![];
        for event in batch.events {
            self.dispatch(event, &mut decisions)?;
        }

        let reply = protocol::encode_outbound(self.current_time, decisions);
        self.transport.write_message(&reply)?;
        Ok(true)
    }

    fn dispatch(&mut self, event: InboundEvent, decisions: &mut Vec<(Time, Command)>) -> Result<()> {
        match event {
            InboundEvent::JobSubmission { job_id } => {
                let job = self
                    .jobs
                    .get(&job_id)
                    .cloned()
                    .ok_or(Error::UnknownJob(job_id))?;
                let allocs = self.policy.on_submission(job, self.current_time)?;
                self.push_start_jobs(allocs, decisions);
            }
            InboundEvent::JobCompletion { job_id, finish_time } => {
                let allocs = self.policy.on_completion(job_id, finish_time)?;
                self.push_start_jobs(allocs, decisions);
            }
            InboundEvent::JobRejection => {
                warn!("job rejection events are not modeled by this policy, ignoring");
            }
            InboundEvent::Nop => {}
            InboundEvent::PStateChanged { .. } | InboundEvent::EnergyConsumed { .. } => {
                // Passthrough only, per the policy's non-goals: acknowledged
                // on the wire, never acted on.
            }
        }
        Ok(())
    }

    fn push_start_jobs(&self, allocs: Vec<(JobId, Vec<usize>)>, decisions: &mut Vec<(Time, Command)>) {
        if !allocs.is_empty() {
            decisions.push((self.current_time, Command::StartJobs(allocs)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EasyBackfill;
    use crate::transport::Transport;

    struct ScriptedTransport {
        inbound: std::collections::VecDeque<String>,
        outbound: Vec<String>,
    }

    impl Transport for ScriptedTransport {
        fn read_message(&mut self) -> Result<Option<String>> {
            Ok(self.inbound.pop_front())
        }
        fn write_message(&mut self, body: &str) -> Result<()> {
            self.outbound.push(body.to_string());
            Ok(())
        }
    }

    #[test]
    fn single_submission_round_trips_the_scenario_from_the_concrete_example() {
        let job = Job::new(0, 0.0, 5.0, 1, "default".into());
        let mut jobs = HashMap::new();
        jobs.insert(0, job);

        let transport = ScriptedTransport {
            inbound: vec!["0:1.000000|1.000000:S:0".to_string()].into(),
            outbound: vec![],
        };

        let mut session = Session::new(transport, EasyBackfill::new(1), jobs);
        session.run().unwrap();

        assert_eq!(session.transport.outbound, vec!["0:1.000000|1.000000:J:0=0".to_string()]);
    }

    #[test]
    fn unknown_job_id_is_a_fatal_protocol_error() {
        let transport = ScriptedTransport {
            inbound: vec!["0:0.0|0.0:S:99".to_string()].into(),
            outbound: vec![],
        };
        let mut session = Session::new(transport, EasyBackfill::new(4), HashMap::new());
        assert!(matches!(session.run(), Err(Error::UnknownJob(99))));
    }
}
