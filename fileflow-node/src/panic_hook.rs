use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::Path,
    thread,
};

use chrono::Local;

use crate::logging::current_log_file_name;

/// Installs a global panic hook that records panics in the day's log file and
/// logs them via `tracing`.
///
/// The record is written to the file directly because the non-blocking writer
/// may not flush before the process goes down.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = format_panic_record(panic_info);
            if let Err(e) = append_panic_record(&log_dir, &record) {
                eprintln!("failed to write panic record: {e}");
            }
            tracing::error!(
                target: "fileflow_node::panic",
                payload = %payload_message(panic_info),
                location = ?panic_info.location(),
                "Panic recorded"
            );
        }));

        previous_hook(panic_info);
    }));
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let path = log_dir.join(current_log_file_name());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = payload_message(panic_info);
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{}",
        Backtrace::force_capture()
    )
}

fn payload_message(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_info.payload();
    payload
        .downcast_ref::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| panic_info.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_panic_record() {
        let temp_dir = TempDir::new().unwrap();
        append_panic_record(temp_dir.path(), "PANIC payload=boom").unwrap();
        append_panic_record(temp_dir.path(), "PANIC payload=again").unwrap();

        let contents =
            std::fs::read_to_string(temp_dir.path().join(current_log_file_name())).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("payload=boom"));
    }

    #[test]
    fn test_installed_hook_writes_log_file() {
        let temp_dir = TempDir::new().unwrap();
        install(temp_dir.path());

        let result = thread::Builder::new()
            .name("panicking-worker".to_string())
            .spawn(|| panic!("hook test payload"))
            .unwrap()
            .join();
        let _ = take_hook();
        assert!(result.is_err());

        let contents =
            std::fs::read_to_string(temp_dir.path().join(current_log_file_name())).unwrap();
        assert!(contents.contains("PANIC thread=panicking-worker"));
        assert!(contents.contains("payload=hook test payload"));
    }
}
