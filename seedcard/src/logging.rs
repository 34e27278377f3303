use env_logger::{Builder, Env, Target};

/// Logs to stderr. `RUST_LOG` wins; otherwise `info`, or `debug` with `-v`.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = Builder::from_env(Env::default().default_filter_or(default))
        .target(Target::Stderr)
        .format_timestamp(None)
        .try_init();
}
