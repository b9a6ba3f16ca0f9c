//! Prometheus metrics for the job queue and status streams.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job system.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "lumen_jobs_enqueued_total";
    /// Total jobs taken by a worker.
    pub const JOBS_DEQUEUED_TOTAL: &str = "lumen_jobs_dequeued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "lumen_jobs_completed_total";
    /// Total jobs failed.
    pub const JOBS_FAILED_TOTAL: &str = "lumen_jobs_failed_total";
    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "lumen_job_duration_seconds";

    /// Active workers count.
    pub const WORKERS_ACTIVE: &str = "lumen_workers_active";

    /// Status streams opened.
    pub const STREAMS_OPENED_TOTAL: &str = "lumen_status_streams_opened_total";
    /// Status streams closed, labelled by outcome.
    pub const STREAMS_CLOSED_TOTAL: &str = "lumen_status_streams_closed_total";
    /// Status streams currently open.
    pub const STREAMS_ACTIVE: &str = "lumen_status_streams_active";
    /// Status polls issued.
    pub const STREAM_POLLS_TOTAL: &str = "lumen_status_stream_polls_total";
    /// Status polls that failed.
    pub const STREAM_POLL_FAILURES_TOTAL: &str = "lumen_status_stream_poll_failures_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(names::JOBS_DEQUEUED_TOTAL, "Total number of jobs taken by a worker");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total number of jobs completed successfully");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");

    describe_gauge!(names::WORKERS_ACTIVE, "Number of jobs currently being processed");

    describe_counter!(names::STREAMS_OPENED_TOTAL, "Total number of job status streams opened");
    describe_counter!(
        names::STREAMS_CLOSED_TOTAL,
        "Total number of job status streams closed, by outcome"
    );
    describe_gauge!(names::STREAMS_ACTIVE, "Number of job status streams currently open");
    describe_counter!(names::STREAM_POLLS_TOTAL, "Total number of job status polls");
    describe_counter!(
        names::STREAM_POLL_FAILURES_TOTAL,
        "Total number of job status polls that failed"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job taken by a worker.
    pub fn job_dequeued(job_name: &str) {
        counter!(names::JOBS_DEQUEUED_TOTAL, "job_name" => job_name.to_string()).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(job_name: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "job_name" => job_name.to_string()).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job failed.
    pub fn job_failed(job_name: &str, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "job_name" => job_name.to_string()).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_name" => job_name.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update the number of in-flight jobs.
    pub fn update_active(pool_id: &str, active: u64) {
        gauge!(names::WORKERS_ACTIVE, "pool_id" => pool_id.to_string()).set(active as f64);
    }
}

/// Status stream metrics recorder.
#[derive(Clone)]
pub struct StreamMetrics;

impl StreamMetrics {
    /// Record a stream opened.
    pub fn stream_opened() {
        counter!(names::STREAMS_OPENED_TOTAL).increment(1);
        gauge!(names::STREAMS_ACTIVE).increment(1.0);
    }

    /// Record a stream closed.
    pub fn stream_closed(outcome: &'static str) {
        counter!(names::STREAMS_CLOSED_TOTAL, "outcome" => outcome).increment(1);
        gauge!(names::STREAMS_ACTIVE).decrement(1.0);
    }

    /// Record a poll and whether it failed.
    pub fn poll(failed: bool) {
        counter!(names::STREAM_POLLS_TOTAL).increment(1);
        if failed {
            counter!(names::STREAM_POLL_FAILURES_TOTAL).increment(1);
        }
    }
}
