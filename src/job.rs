use std::cell::RefCell;
use std::rc::Rc;

/// Job identifier, as assigned by the workload descriptor / the simulator.
pub type JobId = u32;

/// Logical simulation time, in seconds. The simulator owns the clock; we
/// only ever store and compare values it hands us.
pub type Time = f64;

/// A machine/resource index within `[0, nb_res)`.
pub type ResIdx = usize;

/// Mutable, post-submission scheduling attributes. Kept separate from the
/// immutable submission attributes so that a [`Job`] can be shared (`Rc`)
/// across the waiting queue, running set, and any in-flight reservation
/// projection without needing `&mut` access to the whole struct.
#[derive(Debug, Default, Clone)]
struct Schedule {
    allocation: Option<Vec<ResIdx>>,
    start_time: Option<Time>,
    finish_time: Option<Time>,
}

/// The fundamental unit of interest: a job submitted to the simulator.
///
/// Fields above the `---` are immutable, fixed at submission. Below it,
/// attributes are set once the job is scheduled (and `finish_time` is
/// overwritten again on completion, with the simulator's actual completion
/// time rather than the requested walltime).
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub submit_time: Time,
    pub requested_walltime: Time,
    pub requested_resources: usize,
    pub profile: String,
    // ---
    schedule: RefCell<Schedule>,
}

impl Job {
    pub fn new(
        id: JobId,
        submit_time: Time,
        requested_walltime: Time,
        requested_resources: usize,
        profile: String,
    ) -> Rc<Self> {
        Rc::new(Self {
            id,
            submit_time,
            requested_walltime,
            requested_resources,
            profile,
            schedule: RefCell::new(Schedule::default()),
        })
    }

    pub fn is_scheduled(&self) -> bool {
        self.schedule.borrow().start_time.is_some()
    }

    pub fn allocation(&self) -> Option<Vec<ResIdx>> {
        self.schedule.borrow().allocation.clone()
    }

    pub fn start_time(&self) -> Option<Time> {
        self.schedule.borrow().start_time
    }

    pub fn finish_time(&self) -> Option<Time> {
        self.schedule.borrow().finish_time
    }

    /// Records that the job was just started on `allocation`, projected to
    /// finish at `now + requested_walltime`. Asserts the allocation has
    /// exactly as many resources as requested (see data model invariant).
    pub fn start(&self, allocation: Vec<ResIdx>, now: Time) {
        assert_eq!(
            allocation.len(),
            self.requested_resources,
            "allocation size mismatch for job {}",
            self.id
        );
        let mut s = self.schedule.borrow_mut();
        s.finish_time = Some(now + self.requested_walltime);
        s.start_time = Some(now);
        s.allocation = Some(allocation);
    }

    /// Overwrites `finish_time` with the simulator-reported actual
    /// completion time. Called on `onJobCompletion`.
    pub fn complete_at(&self, actual_finish: Time) {
        self.schedule.borrow_mut().finish_time = Some(actual_finish);
    }

    /// Clears the allocation once the job's resources have been returned to
    /// the free-space list, while keeping `start_time`/`finish_time` around
    /// for bookkeeping/tests.
    pub fn clear_allocation(&self) {
        self.schedule.borrow_mut().allocation = None;
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Job {}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_sets_finish_time_from_walltime() {
        let j = Job::new(0, 0.0, 10.0, 4, "default".into());
        j.start(vec![0, 1, 2, 3], 5.0);
        assert_eq!(j.finish_time(), Some(15.0));
        assert_eq!(j.allocation(), Some(vec![0, 1, 2, 3]));
    }

    #[test]
    #[should_panic(expected = "allocation size mismatch")]
    fn start_panics_on_size_mismatch() {
        let j = Job::new(0, 0.0, 10.0, 4, "default".into());
        j.start(vec![0, 1], 0.0);
    }

    #[test]
    fn complete_at_overwrites_finish_time() {
        let j = Job::new(0, 0.0, 10.0, 1, "default".into());
        j.start(vec![0], 0.0);
        j.complete_at(7.5);
        assert_eq!(j.finish_time(), Some(7.5));
    }
}
