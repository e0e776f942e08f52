//! Stream combinators for frame streams

pub mod after_cookie;

pub use after_cookie::{AfterCookie, SettingsAppliedExt};
