use serde::{Deserialize, Serialize};

pub const JOBS_SERVICE: &str = "jobs-service";
pub const CHECK_JOB_EXISTS: &str = "check_job_exists";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckJobExists {
    // ---
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    // ---
    pub job_id: String,
    pub exists: bool,
}
