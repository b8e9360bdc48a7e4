use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use uuid::Uuid;

use crate::error::{Result, WorkerError};
use crate::store::job::{JobOutcome, JobRecord};
use crate::store::JobStore;

/// Pops pending ids until one is still unclaimed, then claims it in place.
/// KEYS[1] = pending list, ARGV = job key prefix, claimed_by, claimed_at.
/// Returns `{id, HGETALL}` or false.
const CLAIM_SCRIPT: &str = r#"
while true do
  local id = redis.call('LPOP', KEYS[1])
  if not id then return false end
  local key = ARGV[1] .. id
  if redis.call('HGET', key, 'claimed') == '0' then
    redis.call('HSET', key, 'claimed', '1', 'claimed_by', ARGV[2], 'claimed_at', ARGV[3])
    return {id, redis.call('HGETALL', key)}
  end
end
"#;

/// KEYS[1] = job key, ARGV = kind ('ok' | 'err'), duration_us, completed_at, value.
/// Returns -1 for a missing job, 0 for an unclaimed job, 1 on success.
const COMPLETE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
if redis.call('HGET', KEYS[1], 'claimed') ~= '1' then return 0 end
redis.call('HSET', KEYS[1], 'completed', '1', 'duration_us', ARGV[2], 'completed_at', ARGV[3])
if ARGV[1] == 'ok' then
  redis.call('HSET', KEYS[1], 'result', ARGV[4])
  redis.call('HDEL', KEYS[1], 'error')
else
  redis.call('HSET', KEYS[1], 'error', ARGV[4])
  redis.call('HDEL', KEYS[1], 'result')
end
return 1
"#;

/// Fails a claimed job whose record cannot be decoded. An unreadable payload
/// is moved to `invalid_payload` so the record decodes afterwards.
/// KEYS[1] = job key, ARGV = completed_at, error.
const REJECT_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], 'payload')
if raw then
  redis.call('HSET', KEYS[1], 'invalid_payload', raw)
  redis.call('HDEL', KEYS[1], 'payload')
end
redis.call('HSET', KEYS[1], 'completed', '1', 'duration_us', '0', 'completed_at', ARGV[1], 'error', ARGV[2])
redis.call('HDEL', KEYS[1], 'result')
return 1
"#;

/// Job store backed by Redis.
///
/// Key layout under `prefix`:
/// - `<prefix>:job:<id>`: hash holding one job record
/// - `<prefix>:pending`: list of ids not yet claimed, FIFO
/// - `<prefix>:jobs`: sorted set of every id, scored by creation time (ms)
///
/// Claim and completion are Lua scripts, so Redis runs each as one atomic
/// step no matter how many workers share the server. The claim script touches
/// keys it derives from the list contents, so it targets a single Redis node,
/// not Redis Cluster.
#[derive(Clone)]
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisJobStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(prefix, "Connected to Redis job store");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}{}", self.job_key_prefix(), id)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    /// Write a failed completion for a job this instance claimed but cannot
    /// decode, so it is not left claimed forever.
    async fn reject_claimed(&self, raw_id: &str, reason: &WorkerError) -> Result<()> {
        tracing::warn!(job_id = raw_id, error = %reason, "Rejecting undecodable job");
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(REJECT_SCRIPT)
            .arg(1)
            .arg(format!("{}{}", self.job_key_prefix(), raw_id))
            .arg(Utc::now().to_rfc3339())
            .arg(reason.to_string());
        let _: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn try_claim(&self, claimed_by: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        loop {
            let mut cmd = redis::cmd("EVAL");
            cmd.arg(CLAIM_SCRIPT)
                .arg(1)
                .arg(self.pending_key())
                .arg(self.job_key_prefix())
                .arg(claimed_by)
                .arg(Utc::now().to_rfc3339());
            let claimed: Option<(String, HashMap<String, String>)> =
                cmd.query_async(&mut conn).await?;
            let Some((raw_id, fields)) = claimed else {
                return Ok(None);
            };

            // The claim is already committed; a record we cannot read must
            // still end completed, then the next pending job is tried.
            match record_from_fields(&fields) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => self.reject_claimed(&raw_id, &e).await?,
            }
        }
    }

    async fn complete(&self, job_id: Uuid, outcome: &JobOutcome) -> Result<()> {
        let (kind, value) = match outcome {
            JobOutcome::Succeeded { result, .. } => ("ok", result.to_string()),
            JobOutcome::Failed { error, .. } => ("err", error.clone()),
        };
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(COMPLETE_SCRIPT)
            .arg(1)
            .arg(self.job_key(job_id))
            .arg(kind)
            .arg(outcome.duration().as_micros().to_string())
            .arg(Utc::now().to_rfc3339())
            .arg(value);
        let status: i64 = cmd.query_async(&mut conn).await?;
        match status {
            1 => Ok(()),
            0 => Err(WorkerError::NotClaimed(job_id)),
            _ => Err(WorkerError::JobNotFound(job_id)),
        }
    }

    async fn enqueue(&self, payload: Option<i64>) -> Result<JobRecord> {
        let job = JobRecord::new(payload);
        let mut fields = vec![
            ("id", job.id.to_string()),
            ("claimed", "0".to_string()),
            ("completed", "0".to_string()),
            ("created_at", job.created_at.to_rfc3339()),
        ];
        if let Some(payload) = job.payload {
            fields.push(("payload", payload.to_string()));
        }

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(self.job_key(job.id), &fields)
            .ignore()
            .zadd(
                self.index_key(),
                job.id.to_string(),
                job.created_at.timestamp_millis(),
            )
            .ignore()
            .rpush(self.pending_key(), job.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(job_id = %job.id, payload = ?job.payload, "Job enqueued");
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(self.job_key(job_id));
        let fields: HashMap<String, String> = cmd.query_async(&mut conn).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        record_from_fields(&fields).map(Some)
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("ZRANGE");
        cmd.arg(self.index_key()).arg(0).arg(-1);
        let ids: Vec<String> = cmd.query_async(&mut conn).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("HGETALL").arg(format!("{}{}", self.job_key_prefix(), id));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
        rows.iter()
            .filter(|fields| !fields.is_empty())
            .map(record_from_fields)
            .collect()
    }
}

fn malformed(field: &str, value: &str) -> WorkerError {
    WorkerError::MalformedRecord(format!("field '{}' has value '{}'", field, value))
}

fn parse_opt<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>> {
    match fields.get(name).map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| malformed(name, raw)),
    }
}

fn parse_flag(fields: &HashMap<String, String>, name: &str) -> bool {
    fields.get(name).map(String::as_str) == Some("1")
}

fn parse_time(fields: &HashMap<String, String>, name: &str) -> Result<Option<DateTime<Utc>>> {
    match fields.get(name).map(String::as_str) {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| malformed(name, raw)),
    }
}

/// Decode the hash written by `enqueue` and the two scripts.
fn record_from_fields(fields: &HashMap<String, String>) -> Result<JobRecord> {
    let id = fields
        .get("id")
        .ok_or_else(|| WorkerError::MalformedRecord("missing id".to_string()))?;
    let id = Uuid::parse_str(id).map_err(|_| malformed("id", id))?;

    Ok(JobRecord {
        id,
        payload: parse_opt(fields, "payload")?,
        claimed: parse_flag(fields, "claimed"),
        claimed_by: fields.get("claimed_by").cloned(),
        claimed_at: parse_time(fields, "claimed_at")?,
        completed: parse_flag(fields, "completed"),
        result: parse_opt(fields, "result")?,
        error: fields.get("error").cloned(),
        duration: parse_opt::<u64>(fields, "duration_us")?.map(Duration::from_micros),
        completed_at: parse_time(fields, "completed_at")?,
        created_at: parse_time(fields, "created_at")?.unwrap_or_else(Utc::now),
    })
}
