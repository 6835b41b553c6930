use std::panic::{PanicHookInfo, take_hook};
use std::thread;

/// Route panics through `tracing` before the previous hook runs.
///
/// Monitor panics are caught by the scheduler; this keeps them in the log file.
pub fn install() {
    let previous_hook = take_hook();
    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown>".to_string());
        let thread = thread::current().name().unwrap_or("<unnamed>").to_string();
        tracing::error!(
            target: "kick_archiver::panic",
            thread = %thread,
            location = %location,
            "panic: {}",
            payload(info)
        );
        previous_hook(info);
    }));
}

fn payload(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
