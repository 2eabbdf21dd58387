/// Rounds the given size up to the next multiple of a granule.
///
/// The granule must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rpool::align;
///
/// assert_eq!(align!(20, 16), 32);
/// assert_eq!(align!(32, 16), 32);
/// assert_eq!(align!(1, 16), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr, $granule:expr) => {
    ($value + $granule - 1) & !($granule - 1)
  };
}
