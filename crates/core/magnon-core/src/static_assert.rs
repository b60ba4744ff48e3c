//! Compile-time layout checks.

/// Asserts a condition at compile time.
///
/// The storage crates use this to pin on-media constants: header field
/// offsets, stride relationships, and buffer sizes that would corrupt
/// existing media if they silently drifted.
///
/// # Examples
///
/// ```ignore
/// use magnon_core::static_assert;
/// static_assert!(BLOCK_BYTES == 512);
/// static_assert!(MAGIC_OFFSET + 8 == FIRST_MESSAGE_OFFSET, "header fields moved");
/// ```
#[macro_export]
macro_rules! static_assert {
    ($cond:expr $(,)?) => {
        const _: () = assert!($cond);
    };
    ($cond:expr, $msg:expr $(,)?) => {
        const _: () = assert!($cond, $msg);
    };
}
