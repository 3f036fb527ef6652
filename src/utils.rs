use chrono::{DateTime, Local};
use std::time::SystemTime;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Library and binary targets logged at info unless `RUST_LOG` says otherwise.
pub const DEFAULT_LOG_FILTER: &str = "relaycam=info,relaycam_worker=info,grab=info,grab_bgr=info";

/// Install the fmt subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();
}

/// Millisecond-precision local timestamp used in frame file names
pub fn file_timestamp(at: SystemTime) -> String {
    let local: DateTime<Local> = at.into();
    local.format("%Y-%m-%d_%H-%M-%S%.3f").to_string()
}

/// Resolve on Enter, end of stdin, or Ctrl-C, whichever comes first.
///
/// Stdin is read on a detached thread: a read left pending after Ctrl-C must
/// not hold up runtime shutdown the way a blocking-pool read would.
pub async fn wait_for_enter_or_interrupt() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let reader = std::thread::Builder::new()
        .name("stdin-enter".into())
        .spawn(move || {
            let mut line = String::new();
            if let Err(e) = std::io::stdin().read_line(&mut line) {
                warn!("Failed to read stdin: {}", e);
            }
            let _ = tx.send(());
        });
    if let Err(e) = reader {
        warn!("Cannot watch stdin, waiting for Ctrl-C only: {}", e);
        interrupted().await;
        return;
    }

    tokio::select! {
        _ = rx => {}
        _ = interrupted() => {}
    }
}

/// Resolve on Ctrl-C.
pub async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Print the `///`-framed banner each utility starts with.
pub fn print_preamble(title: &str) {
    println!("{}", preamble(title));
}

fn preamble(title: &str) -> String {
    let inner = format!("/// {} ///", title);
    let rule = "/".repeat(inner.len());
    format!("{rule}\n{inner}\n{rule}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn timestamp_has_millisecond_suffix() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let stamp = file_timestamp(at);
        // YYYY-MM-DD_HH-MM-SS.mmm
        assert_eq!(stamp.len(), 23);
        assert!(stamp.ends_with(".123"));
        assert_eq!(&stamp[10..11], "_");
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_filter_keeps_binary_targets() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(DEFAULT_LOG_FILTER))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "grab", "grab line");
            tracing::info!(target: "grab_bgr", "grab-bgr line");
            tracing::info!(target: "relaycam_worker", "worker line");
            tracing::info!(target: "relaycam::sink", "library line");
            tracing::info!(target: "noisy_dependency", "dependency line");
        });

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        for line in ["grab line", "grab-bgr line", "worker line", "library line"] {
            assert!(out.contains(line), "missing {:?} in {}", line, out);
        }
        assert!(!out.contains("dependency line"));
    }

    #[test]
    fn preamble_rules_match_title_width() {
        let text = preamble("Capture Frames & Save as files");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), lines[1].len());
        assert!(lines[0].chars().all(|c| c == '/'));
    }
}
