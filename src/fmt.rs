#![macro_use]
#![allow(unused_macros)]

// Logging macros route to `defmt` or `log` depending on the enabled
// feature; with neither enabled the arguments still get name-resolved so
// call sites do not rot.

cfg_if::cfg_if! {
    if #[cfg(feature = "defmt")] {
        macro_rules! trace {
            ($s:literal $(, $x:expr)* $(,)?) => { ::defmt::trace!($s $(, $x)*) };
        }
        macro_rules! debug {
            ($s:literal $(, $x:expr)* $(,)?) => { ::defmt::debug!($s $(, $x)*) };
        }
        macro_rules! info {
            ($s:literal $(, $x:expr)* $(,)?) => { ::defmt::info!($s $(, $x)*) };
        }
        macro_rules! warn {
            ($s:literal $(, $x:expr)* $(,)?) => { ::defmt::warn!($s $(, $x)*) };
        }
        macro_rules! error {
            ($s:literal $(, $x:expr)* $(,)?) => { ::defmt::error!($s $(, $x)*) };
        }
    } else if #[cfg(feature = "log")] {
        macro_rules! trace {
            ($s:literal $(, $x:expr)* $(,)?) => { ::log::trace!($s $(, $x)*) };
        }
        macro_rules! debug {
            ($s:literal $(, $x:expr)* $(,)?) => { ::log::debug!($s $(, $x)*) };
        }
        macro_rules! info {
            ($s:literal $(, $x:expr)* $(,)?) => { ::log::info!($s $(, $x)*) };
        }
        macro_rules! warn {
            ($s:literal $(, $x:expr)* $(,)?) => { ::log::warn!($s $(, $x)*) };
        }
        macro_rules! error {
            ($s:literal $(, $x:expr)* $(,)?) => { ::log::error!($s $(, $x)*) };
        }
    } else {
        macro_rules! trace {
            ($s:literal $(, $x:expr)* $(,)?) => { { let _ = ($( & $x ),*); } };
        }
        macro_rules! debug {
            ($s:literal $(, $x:expr)* $(,)?) => { { let _ = ($( & $x ),*); } };
        }
        macro_rules! info {
            ($s:literal $(, $x:expr)* $(,)?) => { { let _ = ($( & $x ),*); } };
        }
        macro_rules! warn {
            ($s:literal $(, $x:expr)* $(,)?) => { { let _ = ($( & $x ),*); } };
        }
        macro_rules! error {
            ($s:literal $(, $x:expr)* $(,)?) => { { let _ = ($( & $x ),*); } };
        }
    }
}
