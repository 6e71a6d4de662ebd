//! Lua scripts for the Redis job queue.
//!
//! Enqueue runs as a single script so the existence check and both writes
//! are atomic: two concurrent enqueues with the same job id produce exactly
//! one job.

/// Enqueue a delayed job unless a job with the same id exists.
///
/// Arguments:
/// - KEYS[1]: Job hash key (`{queue}:job:{job_id}`)
/// - KEYS[2]: Delayed set key (`{queue}:delayed`)
/// - ARGV[1]: Job id
/// - ARGV[2]: Job name
/// - ARGV[3]: Payload (JSON)
/// - ARGV[4]: Options (JSON)
/// - ARGV[5]: Enqueue timestamp (epoch ms)
/// - ARGV[6]: Delay (ms)
///
/// Returns:
/// - 1: Enqueued
/// - 0: Duplicate (job id already present)
/// - -1: Error (non-numeric timestamp or delay)
pub const ENQUEUE_DELAYED_JOB: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end

local timestamp = tonumber(ARGV[5])
local delay = tonumber(ARGV[6])
if timestamp == nil or delay == nil then
    return -1
end

redis.call('HSET', KEYS[1],
    'name', ARGV[2],
    'data', ARGV[3],
    'opts', ARGV[4],
    'timestamp', ARGV[5],
    'delay', ARGV[6])

-- Worker promotes members whose score (due time) has passed
redis.call('ZADD', KEYS[2], timestamp + delay, ARGV[1])
return 1
"#;
