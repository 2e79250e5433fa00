pub const LOGGER_THREAD_NAME: &str = "logger_receiver";
