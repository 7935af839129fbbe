//! Vote thresholds scaled by line population

/// Threshold used when at most one person is known to be on the line
pub const MIN_POPULATION_THRESHOLD: i32 = 15;

/// Votes required to declare a disturbance on a line with `users_on_line` riders
pub fn start_threshold(users_on_line: i64) -> i32 {
    if users_on_line <= 1 {
        return MIN_POPULATION_THRESHOLD;
    }
    (56.8206 * (users_on_line as f64).ln() - 18.9).round() as i32
}

/// Votes required to keep an already open crowd disturbance alive
pub fn keep_alive_threshold(users_on_line: i64) -> i32 {
    start_threshold(users_on_line) / 2
}
