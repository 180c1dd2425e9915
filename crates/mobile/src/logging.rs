use std::panic::PanicHookInfo;
use std::sync::Once;

use tracing_subscriber::{
    filter::FilterFn, fmt::format::Format, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the tracing subscriber and panic hook. Later calls do nothing.
#[uniffi::export]
pub fn setup_logging() {
    static LOGGING_SETUP: Once = Once::new();

    LOGGING_SETUP.call_once(|| {
        let filter =
            FilterFn::new(|en| en.module_path().unwrap_or_default().starts_with("rider_"));
        let format = Format::default().with_level(false).without_time();

        #[cfg(target_os = "android")]
        {
            use tracing_logcat::{LogcatMakeWriter, LogcatTag};

            let tag = LogcatTag::Fixed("Rider-Rust".to_owned());
            match LogcatMakeWriter::new(tag) {
                Ok(writer) => {
                    let layer = tracing_subscriber::fmt::layer()
                        .event_format(format)
                        .with_writer(writer)
                        .with_ansi(false);
                    let _ = tracing_subscriber::registry()
                        .with(layer)
                        .with(filter)
                        .try_init();
                }
                Err(error) => eprintln!("failed to initialize logcat writer: {error}"),
            }
        }

        #[cfg(not(target_os = "android"))]
        {
            let layer = tracing_subscriber::fmt::layer()
                .event_format(format.with_level(true))
                .with_writer(std::io::stdout)
                .with_ansi(false);
            let _ = tracing_subscriber::registry()
                .with(layer)
                .with(filter)
                .try_init();
        }

        std::panic::set_hook(Box::new(panic_hook));
    })
}

/// Panic hook only, for hosts that bring their own logging.
#[uniffi::export]
pub fn init_panic_handler() {
    std::panic::set_hook(Box::new(panic_hook));
}

fn panic_hook(info: &PanicHookInfo) {
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::error!("{info}\n{backtrace}");
}
