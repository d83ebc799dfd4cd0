use std::sync::Once;
use tracing_subscriber::FmtSubscriber;

static INIT: Once = Once::new();

/// Install the global fmt subscriber. 0 = warn, 1 = info, 2 = debug, more = trace.
/// Later calls are ignored.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_thread_ids(true)
            .finish();
        // another subscriber installed by the host application wins
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(1);
        init(3);
        tracing::info!("logging initialised twice without panicking");
    }
}
