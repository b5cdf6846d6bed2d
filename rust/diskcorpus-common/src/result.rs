pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Fails the enclosing function with `InvalidArgument` unless `$expr` holds.
///
/// The argument name and the failed condition become the error message.
#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        if !$expr {
            return Err($crate::error::Error::invalid_arg(
                stringify!($name),
                stringify!($expr),
            ));
        }
    }};
}
