//! Environment tuning knobs.
//!
//! These are read once per call; deployments set them in the pod spec, tests
//! set them per process. Each helper documents its default.

/// Own data-RPC endpoint from `POD_IP` and `BRPC_PORT` (default port 56039).
///
/// Returns `None` when `POD_IP` is unset.
pub fn pod_ip_port() -> Option<String> {
    let pod_ip = std::env::var("POD_IP").ok()?;
    let port = std::env::var("BRPC_PORT").unwrap_or_else(|_| "56039".to_string());
    Some(format!("{pod_ip}:{port}"))
}

/// The database connection user, from `USER`.
pub fn user_name() -> Option<String> {
    std::env::var("USER").ok()
}

/// Whether object-store code paths are enabled in tests (`TEST_OBS`).
pub fn test_obs() -> bool {
    std::env::var_os("TEST_OBS").is_some()
}

/// Background cache eviction ratio (`BG_EVIT_RATIO`, default 0.2).
pub fn background_evict_ratio() -> f32 {
    parse_env("BG_EVIT_RATIO", 0.2)
}

/// Cache storage usage threshold triggering eviction
/// (`STORAGE_THRESHOLD`, default 0.8).
pub fn storage_threshold() -> f32 {
    parse_env("STORAGE_THRESHOLD", 0.8)
}

/// Path-hash bucketing depth (`PARENT_PATH_LEVEL`, default -1 = whole path).
pub fn parent_path_level() -> i32 {
    parse_env("PARENT_PATH_LEVEL", -1)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or(default),
        Err(_) => default,
    }
}

/// The `ip` part of an `ip:port` endpoint.
pub fn split_ip(endpoint: &str) -> &str {
    endpoint.split(':').next().unwrap_or(endpoint)
}

#[cfg(test)]
mod test {
    use super::split_ip;

    #[test]
    fn split_ip_handles_bare_host() {
        assert_eq!(split_ip("10.1.2.3:56039"), "10.1.2.3");
        assert_eq!(split_ip("localhost"), "localhost");
    }
}
