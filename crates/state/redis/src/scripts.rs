/// Lua script for atomic check-and-set (set-if-not-exists).
///
/// KEYS\[1\] = the data key
/// ARGV\[1\] = value to set
/// ARGV\[2\] = TTL in milliseconds (0 means no expiry)
///
/// Returns 1 if the key was newly set, 0 if it already existed.
pub const CHECK_AND_SET: &str = r"
local existed = redis.call('EXISTS', KEYS[1])
if existed == 1 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
";

/// Lua script for an increment that also refreshes the TTL.
///
/// KEYS\[1\] = the counter key
/// ARGV\[1\] = delta
/// ARGV\[2\] = TTL in milliseconds (0 leaves the current expiry untouched)
///
/// Returns the counter value after the increment.
pub const INCREMENT: &str = r"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return value
";
