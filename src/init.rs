use std::io::Write;

use chrono::Local;
use env_logger::Env;

/// Sets up the process-wide logger. `RUST_LOG` overrides the `info` default.
pub fn log_init() {
    let env = Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env)
        .format(|fmt, record| {
            writeln!(
                fmt,
                "[{} {}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                &record.args()
            )
        })
        .init();
}
