//! Command lines for starting, killing and counting daemon processes

use crate::models::DaemonConfig;
use crate::runner::shell_quote;

/// Arguments passed to the daemon binary on startup
pub fn startup_args(config: &DaemonConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--daemon".into(),
        "--threads".into(),
        "--quiet".into(),
        "--port".into(),
        config.ports.active.to_string(),
        "--num_children".into(),
        config.children.to_string(),
    ];

    if let Some(model) = &config.model_path {
        args.push("-i".into());
        args.push(model.to_string_lossy().into_owned());
    }

    if config.test_mode {
        args.push("-t".into());
    }

    args.extend(config.extra_opts.split_whitespace().map(String::from));
    args
}

/// Pattern matching the full command line of every process of the daemon.
///
/// The port must not be followed by another digit, so port 2654 never
/// matches a daemon on 26542. A non-digit is enough for the `sh` wrapper of
/// [`count_script`], whose copy of the port is followed by `(`.
pub fn process_pattern(config: &DaemonConfig) -> String {
    format!(
        "{}.*--port {}([^0-9]|$)",
        config.binary_name(),
        config.ports.active
    )
}

/// Arguments for `pkill` that kill the daemon and all of its children
pub fn kill_args(pattern: &str) -> Vec<String> {
    vec!["-9".into(), "-f".into(), pattern.to_string()]
}

/// Shell pipeline printing the number of processes matching `pattern`.
///
/// The `sh` process running this script matches the pattern as well, so its
/// output is always one higher than the daemon's real process count.
pub fn count_script(pattern: &str) -> String {
    format!("pgrep -f {} | wc -l", shell_quote(pattern))
}
