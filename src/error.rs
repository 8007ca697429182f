/// Turns a `Result` into an `Option`, logging the error instead of propagating it.
pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;

    /// Like [`ok_log`](Self::ok_log) but at a chosen level, for errors that are expected.
    fn ok_log_at(self, level: log::Level) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        self.ok_log_at(log::Level::Error)
    }

    fn ok_log_at(self, level: log::Level) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::log!(level, "{err}");
                None
            }
        }
    }
}
