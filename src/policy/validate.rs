//! A decorator that wraps any [`Policy`] and re-checks its invariants after
//! every event, turning a violation into a fatal [`Error::InvariantViolation`]
//! instead of letting a misbehaving policy silently corrupt the simulation.
//!
//! Reconstructs the intent of the launcher's `--protect` flag (wrapping the
//! scheduler in a validating machine); the validating machine's own source
//! was not available to copy from, so this checks exactly the invariants
//! listed as "testable properties" rather than translating unseen code.

use std::rc::Rc;

use crate::error::Result;
use crate::job::{Job, JobId, ResIdx, Time};

use super::Policy;

pub struct ValidatingPolicy<P: Policy> {
    inner: P,
}

impl<P: Policy> ValidatingPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Policy> Policy for ValidatingPolicy<P> {
    fn on_submission(&mut self, job: Rc<Job>, now: Time) -> Result<Vec<(JobId, Vec<ResIdx>)>> {
        let allocs = self.inner.on_submission(job, now)?;
        self.inner.check_invariants()?;
        Ok(allocs)
    }

    fn on_completion(&mut self, job_id: JobId, now: Time) -> Result<Vec<(JobId, Vec<ResIdx>)>> {
        let allocs = self.inner.on_completion(job_id, now)?;
        self.inner.check_invariants()?;
        Ok(allocs)
    }

    fn check_invariants(&self) -> Result<()> {
        self.inner.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EasyBackfill;

    #[test]
    fn passes_through_allocations_after_validating() {
        let mut p = ValidatingPolicy::new(EasyBackfill::new(4));
        let job = Job::new(0, 0.0, 10.0, 4, "default".into());
        let allocs = p.on_submission(job, 0.0).unwrap();
        assert_eq!(allocs, vec![(0, vec![0, 1, 2, 3])]);
    }
}
