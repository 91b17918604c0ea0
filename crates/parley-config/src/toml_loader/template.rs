//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Parley relay configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[server]
# host = "0.0.0.0"
# port = 4000                    # 1-65535

[queue]
# capacity = 256                 # 1-65536 frames per connection
# drop_policy = "drop_oldest"    # drop_oldest, drop_newest
# slow_consumer_max_drops = 1024 # 0 = never disconnect slow clients

[broadcast]
# echo_to_sender = false
# max_frame_bytes = 65536        # 16-16777216

[connection]
# idle_timeout_secs = 0          # 0 = never close idle connections
# shutdown_grace_ms = 5000       # 0-60000

[logging]
# filter = "parley_relay=info"   # overridden by RUST_LOG
# stats_interval_secs = 60       # 0 = disabled
"##
    .to_string()
}
