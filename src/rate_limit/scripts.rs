/// Lua script for fixed window rate limiting in Redis
///
/// Increment and expiry happen inside one script, so the counter can never be
/// left without a TTL and concurrent callers never read a stale count.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = cost to add
/// ARGV[2] = window duration (milliseconds)
///
/// Returns: [counter value after increment, milliseconds until reset]
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local cost = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

local current = redis.call('INCRBY', key, cost)

-- First increment in this window creates the expiry
if current == cost then
    redis.call('PEXPIRE', key, window)
end

local ttl = redis.call('PTTL', key)
if ttl < 0 then
    -- No expiry set, set it now
    redis.call('PEXPIRE', key, window)
    ttl = window
end

return {current, ttl}
"#;

/// Table backing the persistent token bucket
pub const TOKEN_BUCKET_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS gateway_rate_buckets (
    bucket_key     TEXT   PRIMARY KEY,
    tokens         BIGINT NOT NULL CHECK (tokens >= 0),
    last_refill_ms BIGINT NOT NULL
)"#;

/// PL/pgSQL function for token bucket rate limiting in PostgreSQL
///
/// The bucket row is locked with `FOR UPDATE` for the duration of the call,
/// so refill, take and write-back are one atomic step per key.
///
/// $1 = bucket key
/// $2 = capacity (tokens per interval)
/// $3 = cost
/// $4 = current time (epoch milliseconds)
/// $5 = refill interval (milliseconds)
///
/// Returns one row: (admitted, remaining tokens, last refill time)
pub const TOKEN_BUCKET_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION gateway_take_tokens(
    p_key TEXT,
    p_capacity BIGINT,
    p_cost BIGINT,
    p_now_ms BIGINT,
    p_interval_ms BIGINT
) RETURNS TABLE (admitted BOOLEAN, remaining BIGINT, refilled_at_ms BIGINT) AS $$
DECLARE
    v_tokens BIGINT;
    v_last BIGINT;
    v_refill BIGINT;
BEGIN
    INSERT INTO gateway_rate_buckets (bucket_key, tokens, last_refill_ms)
    VALUES (p_key, p_capacity, p_now_ms)
    ON CONFLICT (bucket_key) DO NOTHING;

    SELECT b.tokens, b.last_refill_ms INTO v_tokens, v_last
    FROM gateway_rate_buckets b
    WHERE b.bucket_key = p_key
    FOR UPDATE;

    -- Pruned between the insert and the lock: start from a full bucket
    IF NOT FOUND THEN
        INSERT INTO gateway_rate_buckets (bucket_key, tokens, last_refill_ms)
        VALUES (p_key, p_capacity, p_now_ms)
        ON CONFLICT (bucket_key) DO NOTHING;

        SELECT b.tokens, b.last_refill_ms INTO v_tokens, v_last
        FROM gateway_rate_buckets b
        WHERE b.bucket_key = p_key
        FOR UPDATE;
    END IF;

    v_refill := LEAST(GREATEST(p_now_ms - v_last, 0), p_interval_ms) * p_capacity / p_interval_ms;
    IF v_refill > 0 THEN
        v_tokens := LEAST(p_capacity, v_tokens + v_refill);
        v_last := p_now_ms;
    END IF;

    admitted := v_tokens >= p_cost AND p_cost <= p_capacity;
    IF admitted THEN
        v_tokens := v_tokens - p_cost;
    END IF;

    UPDATE gateway_rate_buckets b
    SET tokens = v_tokens, last_refill_ms = v_last
    WHERE b.bucket_key = p_key;

    remaining := v_tokens;
    refilled_at_ms := v_last;
    RETURN NEXT;
END;
$$ LANGUAGE plpgsql"#;

/// Single round trip per admission check
pub const TOKEN_BUCKET_CALL: &str =
    "SELECT admitted, remaining, refilled_at_ms FROM gateway_take_tokens($1, $2, $3, $4, $5)";

/// Remove buckets idle for at least one refill interval
///
/// Such a bucket would refill to capacity on its next check, so deleting it
/// does not change any decision. Rows are locked before deletion, so a
/// bucket being checked concurrently is re-evaluated and kept.
///
/// $1 = bucket key pattern (`LIKE`)
/// $2 = cutoff (epoch milliseconds)
pub const TOKEN_BUCKET_PRUNE: &str =
    "DELETE FROM gateway_rate_buckets WHERE bucket_key LIKE $1 AND last_refill_ms <= $2";
