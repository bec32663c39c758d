//! Lua scripts executed atomically by the store.
//!
//! Each script mirrors one [`TokenBucketCore`](crate::cores::TokenBucketCore)
//! transition on the hash fields of a single key. All times are integer
//! microseconds since the Unix epoch, which Lua's doubles represent exactly.
//!
//! A script returns `false` (a nil reply) when the key holds no bucket.

use std::fmt;

pub const START_TIME_FIELD: &str = "start_time";
pub const FILL_INTERVAL_FIELD: &str = "fill_interval";
pub const CAPACITY_FIELD: &str = "capacity";
pub const QUANTUM_FIELD: &str = "quantum";
pub const AVAIL_FIELD: &str = "avail";
pub const LATEST_TICK_FIELD: &str = "latest_tick";

/// Reply of [`BucketScript::TryAcquire`] when the wait exceeds the bound.
pub const DENIED: i64 = -1;

/// Largest wait, in microseconds, a script replies with (2^53, about 285
/// years). Longer waits are capped so the reply stays an exact integer and an
/// unbounded request is still granted. A reservation never pushes `avail`
/// below `-MAX_SCRIPT_UNITS`.
pub const MAX_SCRIPT_UNITS: i64 = 1 << 53;

/// The atomic operations a distributed bucket performs.
///
/// | Script | `ARGV` | Reply |
/// |--------|--------|-------|
/// | `Create` | now, fill interval, capacity, quantum, expiry ms | `1` created, `0` already present |
/// | `Acquire` | now, count | tokens granted |
/// | `TryAcquire` | now, count, max wait | wait, or [`DENIED`] |
/// | `Available` | now | available count |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketScript {
    Create,
    Acquire,
    TryAcquire,
    Available,
}

impl BucketScript {
    pub const ALL: [BucketScript; 4] = [
        BucketScript::Create,
        BucketScript::Acquire,
        BucketScript::TryAcquire,
        BucketScript::Available,
    ];

    /// Full Lua source of the script.
    pub fn source(self) -> String {
        match self {
            BucketScript::Create => CREATE.to_string(),
            BucketScript::Acquire => format!("{}{}", COMMON, ACQUIRE),
            BucketScript::TryAcquire => format!("{}{}", COMMON, TRY_ACQUIRE),
            BucketScript::Available => format!("{}{}", COMMON, AVAILABLE),
        }
    }
}

impl fmt::Display for BucketScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BucketScript::Create => "create",
            BucketScript::Acquire => "acquire",
            BucketScript::TryAcquire => "try_acquire",
            BucketScript::Available => "available",
        };
        f.write_str(name)
    }
}

const CREATE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1],
    'start_time', ARGV[1],
    'fill_interval', ARGV[2],
    'capacity', ARGV[3],
    'quantum', ARGV[4],
    'avail', ARGV[3],
    'latest_tick', 0)
local expire_ms = tonumber(ARGV[5])
if expire_ms > 0 then
    redis.call('PEXPIRE', KEYS[1], expire_ms)
end
return 1
"#;

const COMMON: &str = r#"
local MAX_UNITS = 9007199254740992

local function load_bucket(key)
    local f = redis.call('HMGET', key,
        'start_time', 'fill_interval', 'capacity', 'quantum', 'avail', 'latest_tick')
    for i = 1, 6 do
        if not f[i] then
            return nil
        end
    end
    return {
        start_time = tonumber(f[1]),
        fill_interval = tonumber(f[2]),
        capacity = tonumber(f[3]),
        quantum = tonumber(f[4]),
        avail = tonumber(f[5]),
        latest_tick = tonumber(f[6]),
    }
end

local function current_tick(b, now)
    local tick = math.floor((now - b.start_time) / b.fill_interval)
    if tick < b.latest_tick then
        tick = b.latest_tick
    end
    return tick
end

local function adjust(b, tick)
    if b.avail < b.capacity then
        b.avail = math.min(b.avail + (tick - b.latest_tick) * b.quantum, b.capacity)
    end
    b.latest_tick = tick
end

local function save(key, b)
    redis.call('HSET', key, 'avail', b.avail, 'latest_tick', b.latest_tick)
end
"#;

const ACQUIRE: &str = r#"
local b = load_bucket(KEYS[1])
if not b then
    return false
end
local now = tonumber(ARGV[1])
local count = tonumber(ARGV[2])

adjust(b, current_tick(b, now))
local granted = 0
if b.avail > 0 then
    granted = math.min(count, b.avail)
end
b.avail = b.avail - granted
save(KEYS[1], b)
return granted
"#;

const TRY_ACQUIRE: &str = r#"
local b = load_bucket(KEYS[1])
if not b then
    return false
end
local now = tonumber(ARGV[1])
local count = tonumber(ARGV[2])
local max_wait = tonumber(ARGV[3])

local tick = current_tick(b, now)
adjust(b, tick)
local remaining = b.avail - count
if remaining >= 0 then
    b.avail = remaining
    save(KEYS[1], b)
    return 0
end

local end_tick = tick + math.floor((-remaining + b.quantum - 1) / b.quantum)
local wait = b.start_time + end_tick * b.fill_interval - now
if wait > MAX_UNITS then
    wait = MAX_UNITS
end
if wait > max_wait then
    save(KEYS[1], b)
    return -1
end
if remaining < -MAX_UNITS then
    remaining = -MAX_UNITS
end
b.avail = remaining
save(KEYS[1], b)
return wait
"#;

const AVAILABLE: &str = r#"
local b = load_bucket(KEYS[1])
if not b then
    return false
end
adjust(b, current_tick(b, tonumber(ARGV[1])))
save(KEYS[1], b)
return b.avail
"#;
