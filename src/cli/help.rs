/// Log filter for a `-v` count. `RUST_LOG` takes precedence when set.
pub fn get_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
