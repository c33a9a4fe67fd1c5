use std::ffi::CStr;

use super::*;

unsafe fn lossy<'a>(s: fmi2String) -> std::borrow::Cow<'a, str> {
    if s.is_null() {
        "NULL".into()
    } else {
        CStr::from_ptr(s).to_string_lossy()
    }
}

/// Maps a status reported through the logger callback onto a log level.
pub fn log_level(status: fmi2Status) -> log::Level {
    match status {
        fmi2Status_fmi2OK => log::Level::Info,
        fmi2Status_fmi2Warning => log::Level::Warn,
        fmi2Status_fmi2Discard => log::Level::Trace,
        fmi2Status_fmi2Error | fmi2Status_fmi2Fatal => log::Level::Error,
        fmi2Status_fmi2Pending => log::Level::Info,
        _ => log::Level::Error,
    }
}

/// This function gets called from logger.c once the message has been formatted.
#[no_mangle]
extern "C" fn callback_log(
    _component_environment: fmi2ComponentEnvironment,
    instance_name: fmi2String,
    status: fmi2Status,
    category: fmi2String,
    message: fmi2String,
) {
    let (instance_name, category, message) =
        unsafe { (lossy(instance_name), lossy(category), lossy(message)) };

    log::logger().log(
        &log::Record::builder()
            .args(format_args!("[{category}] {message}"))
            .level(log_level(status))
            .module_path(Some("logger"))
            .file(Some("logger.rs"))
            .line(Some(0))
            .target(&instance_name)
            .build(),
    );
}

#[link(name = "logger", kind = "static")]
extern "C" {
    /// This function is implemented in logger.c
    /// Note: This can be re-implemented in pure Rust once the `c_variadics` feature stabilizes.
    /// See: https://doc.rust-lang.org/beta/unstable-book/language-features/c-variadic.html
    pub fn callback_logger_handler(
        componentEnvironment: fmi2ComponentEnvironment,
        instanceName: fmi2String,
        status: fmi2Status,
        category: fmi2String,
        message: fmi2String,
        ...
    );
}
