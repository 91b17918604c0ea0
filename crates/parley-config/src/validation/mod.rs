//! Full configuration validation.
//!
//! Checks every numeric range and collects all problems into a single
//! `ConfigError` so one bad file reports everything at once.

mod helpers;


use crate::schema::ParleyConfig;
use parley_common::ConfigError;

use helpers::validate_range;

/// Largest accepted frame, 16 MiB.
pub const MAX_FRAME_BYTES_LIMIT: u32 = 16 * 1024 * 1024;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ParleyConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    if config.server.host.trim().is_empty() {
        errors.push("server.host must not be empty".into());
    }
    validate_range(&mut errors, "server.port", config.server.port, 1, 65535);

    validate_range(&mut errors, "queue.capacity", config.queue.capacity, 1, 65536);

    validate_range(
        &mut errors,
        "broadcast.max_frame_bytes",
        config.broadcast.max_frame_bytes,
        16,
        MAX_FRAME_BYTES_LIMIT,
    );

    validate_range(
        &mut errors,
        "connection.idle_timeout_secs",
        config.connection.idle_timeout_secs,
        0,
        86_400,
    );
    validate_range(
        &mut errors,
        "connection.shutdown_grace_ms",
        config.connection.shutdown_grace_ms,
        0,
        60_000,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
