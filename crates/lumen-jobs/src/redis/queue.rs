//! Redis job queue implementation.

use super::RedisKeys;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobLogs, NewJob};
use crate::metrics::JobMetrics;
use crate::queue::{JobQueue, UNKNOWN_STATE};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Moves the next waiting ID to the active list and marks its hash active in
/// one step. Replies with the ID followed by the hash fields, just the ID when
/// the hash is gone, or nil when nothing is waiting.
const TAKE_NEXT_SCRIPT: &str = r#"
    local id = redis.call("RPOPLPUSH", KEYS[1], KEYS[2])
    if not id then
        return false
    end
    local key = ARGV[1] .. id
    if redis.call("EXISTS", key) == 0 then
        redis.call("LREM", KEYS[2], 0, id)
        return {id}
    end
    redis.call("HSET", key, "state", "active", "processedOn", ARGV[2])
    redis.call("HINCRBY", key, "attemptsMade", 1)
    local reply = {id}
    for _, value in ipairs(redis.call("HGETALL", key)) do
        table.insert(reply, value)
    end
    return reply
"#;

/// Redis-backed job queue.
///
/// Each job is a hash at `{prefix}:{queue}:{id}` with its log lines in a
/// list beside it. Waiting and active job IDs are kept in two lists.
#[derive(Clone)]
pub struct RedisJobQueue {
    pool: Pool,
    keys: RedisKeys,
    queue_name: String,
}

impl RedisJobQueue {
    /// Create a new Redis job queue.
    pub fn new(pool: Pool, key_prefix: &str, queue_name: &str) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix, queue_name),
            queue_name: queue_name.to_string(),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Marks a job terminal and removes it from the active list.
    async fn finish(&self, id: &JobId, state: &str, fields: Vec<(&'static str, String)>) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let job_key = self.keys.job(id.as_str());

        let exists: bool = conn.exists(&job_key).await?;
        if !exists {
            return Err(JobError::NotFound(id.to_string()));
        }

        let mut items = fields;
        items.push(("state", state.to_string()));
        items.push(("finishedOn", now_millis().to_string()));

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&job_key, &items)
            .lrem(self.keys.active(), 0, id.as_str())
            .query_async(&mut *conn)
            .await?;

        debug!(job_id = %id, state = state, "Job finished");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: NewJob) -> JobResult<JobId> {
        let id = JobId::new();
        let name = job.name.clone();
        let fields = [
            ("name", job.name),
            ("data", serde_json::to_string(&job.data)?),
            ("state", "waiting".to_string()),
            ("progress", "0".to_string()),
            ("attemptsMade", "0".to_string()),
            ("timestamp", now_millis().to_string()),
        ];

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(self.keys.job(id.as_str()), &fields)
            .lpush(self.keys.wait(), id.as_str())
            .query_async(&mut *conn)
            .await?;

        JobMetrics::job_enqueued(&self.queue_name, &name);
        debug!(job_id = %id, queue = %self.queue_name, job_name = %name, "Enqueued job");

        Ok(id)
    }

    async fn get_job(&self, id: &JobId) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.keys.job(id.as_str())).await?;

        if fields.is_empty() {
            return Ok(None);
        }
        job_from_hash(id.clone(), &fields).map(Some)
    }

    async fn get_state(&self, id: &JobId) -> JobResult<String> {
        let mut conn = self.conn().await?;
        let state: Option<String> = conn.hget(self.keys.job(id.as_str()), "state").await?;
        Ok(state.unwrap_or_else(|| UNKNOWN_STATE.to_string()))
    }

    async fn get_job_logs(&self, id: &JobId, start: i64, end: i64) -> JobResult<JobLogs> {
        let mut conn = self.conn().await?;
        let key = self.keys.logs(id.as_str());

        let (logs, count): (Vec<String>, u64) = redis::pipe()
            .lrange(&key, start as isize, end as isize)
            .llen(&key)
            .query_async(&mut *conn)
            .await?;

        Ok(JobLogs { logs, count })
    }

    async fn take_next(&self) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;

        let reply: Option<Vec<String>> = redis::Script::new(TAKE_NEXT_SCRIPT)
            .key(self.keys.wait())
            .key(self.keys.active())
            .arg(self.keys.job_prefix())
            .arg(now_millis())
            .invoke_async(&mut *conn)
            .await?;

        let Some((id, fields)) = reply.and_then(split_dequeued) else {
            return Ok(None);
        };
        if fields.is_empty() {
            warn!(job_id = %id, "Job hash missing for waiting entry, dropped it");
            return Ok(None);
        }

        let job = job_from_hash(id, &fields)?;
        JobMetrics::job_dequeued(&job.name);
        debug!(job_id = %job.id, attempt = job.attempts_made, "Dequeued job");
        Ok(Some(job))
    }

    async fn update_progress(&self, id: &JobId, progress: Value) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .hset(self.keys.job(id.as_str()), "progress", serde_json::to_string(&progress)?)
            .await?;
        Ok(())
    }

    async fn add_log(&self, id: &JobId, line: String) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.rpush(self.keys.logs(id.as_str()), line).await?;
        Ok(count)
    }

    async fn complete(&self, id: &JobId, return_value: Value) -> JobResult<()> {
        let fields = vec![
            ("returnvalue", serde_json::to_string(&return_value)?),
            ("progress", "100".to_string()),
        ];
        self.finish(id, "completed", fields).await
    }

    async fn fail(&self, id: &JobId, reason: String) -> JobResult<()> {
        self.finish(id, "failed", vec![("failedReason", reason)]).await
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_datetime(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.and_then(|v| v.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Parses a JSON field, keeping unparseable text as a JSON string.
fn json_field(raw: Option<&String>) -> Option<Value> {
    raw.map(|text| serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())))
}

/// Splits a dequeue reply into the job ID and its hash fields.
fn split_dequeued(reply: Vec<String>) -> Option<(JobId, HashMap<String, String>)> {
    let mut items = reply.into_iter();
    let id = JobId::from(items.next()?);
    let mut fields = HashMap::new();
    while let (Some(field), Some(value)) = (items.next(), items.next()) {
        fields.insert(field, value);
    }
    Some((id, fields))
}

/// Builds a job from its hash fields.
fn job_from_hash(id: JobId, fields: &HashMap<String, String>) -> JobResult<Job> {
    let timestamp = millis_to_datetime(fields.get("timestamp"))
        .ok_or_else(|| JobError::Internal(format!("Job {} has no valid timestamp", id)))?;

    Ok(Job {
        name: fields.get("name").cloned().unwrap_or_default(),
        data: json_field(fields.get("data")).unwrap_or(Value::Null),
        progress: json_field(fields.get("progress")).unwrap_or_else(|| Value::from(0)),
        return_value: json_field(fields.get("returnvalue")),
        failed_reason: fields.get("failedReason").cloned(),
        attempts_made: fields
            .get("attemptsMade")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        timestamp,
        processed_on: millis_to_datetime(fields.get("processedOn")),
        finished_on: millis_to_datetime(fields.get("finishedOn")),
        id,
    })
}
