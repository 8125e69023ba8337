//! Loads the startup workload descriptor: cluster size plus the full set of
//! jobs the simulator will submit over the run, keyed by job id, mirroring
//! `Batsim._load_json_workload_profile`.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::job::{Job, JobId};

#[derive(Debug, Deserialize)]
struct JobJson {
    id: JobId,
    subtime: f64,
    walltime: f64,
    res: usize,
    profile: String,
}

#[derive(Debug, Deserialize)]
struct WorkloadJson {
    nb_res: usize,
    jobs: Vec<JobJson>,
}

/// The parsed workload: cluster size and every job, indexed by id for O(1)
/// lookup when the simulator references one by id in a submission/
/// completion event.
pub struct Workload {
    pub nb_res: usize,
    pub jobs: HashMap<JobId, Rc<Job>>,
}

/// Reads and parses `path` into a [`Workload`]. Fails fast on malformed
/// JSON or a job whose `res` exceeds `nb_res` (that job could never be
/// scheduled, so rejecting it at load time surfaces the mistake up front
/// rather than as a silent stall at runtime).
pub fn load<P: AsRef<Path>>(path: P) -> Result<Workload> {
    let text = std::fs::read_to_string(path)?;
    let parsed: WorkloadJson = serde_json::from_str(&text)?;

    let mut jobs = HashMap::with_capacity(parsed.jobs.len());
    for j in parsed.jobs {
        if j.res > parsed.nb_res {
            return Err(Error::Workload(format!(
                "job {} requests {} resources but the cluster only has {}",
                j.id, j.res, parsed.nb_res
            )));
        }
        let job = Job::new(j.id, j.subtime, j.walltime, j.res, j.profile);
        jobs.insert(j.id, job);
    }

    Ok(Workload { nb_res: parsed.nb_res, jobs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_workload() {
        let mut f = tempfile().unwrap();
        writeln!(
            f,
            r#"{{"nb_res": 4, "jobs": [{{"id": 0, "subtime": 0.0, "walltime": 10.0, "res": 2, "profile": "default"}}]}}"#
        )
        .unwrap();

        let w = load(f.path()).unwrap();
        assert_eq!(w.nb_res, 4);
        assert_eq!(w.jobs.len(), 1);
        assert_eq!(w.jobs[&0].requested_resources, 2);
    }

    #[test]
    fn rejects_a_job_wider_than_the_cluster() {
        let mut f = tempfile().unwrap();
        writeln!(
            f,
            r#"{{"nb_res": 2, "jobs": [{{"id": 0, "subtime": 0.0, "walltime": 10.0, "res": 4, "profile": "default"}}]}}"#
        )
        .unwrap();

        assert!(matches!(load(f.path()), Err(Error::Workload(_))));
    }

    fn tempfile() -> std::io::Result<NamedTempFile> {
        NamedTempFile::new()
    }

    struct NamedTempFile {
        path: std::path::PathBuf,
        file: std::fs::File,
    }

    impl NamedTempFile {
        fn new() -> std::io::Result<Self> {
            use std::sync::atomic::{AtomicU32, Ordering};
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "bsidecar-workload-test-{}-{unique}.json",
                std::process::id()
            ));
            let file = std::fs::File::create(&path)?;
            Ok(Self { path, file })
        }

        fn path(&self) -> &std::path::Path {
            &self.path
        }
    }

    impl Write for NamedTempFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.file.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.file.flush()
        }
    }

    impl Drop for NamedTempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
