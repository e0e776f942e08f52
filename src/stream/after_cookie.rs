//! Skip frames acquired before a settings request took effect

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::types::Frame;

/// Extension trait for frame streams.
pub trait SettingsAppliedExt: Stream<Item = Frame> {
    /// Drop frames until one reports settings cookie `cookie` (or a later
    /// one) as applied, then pass every frame through.
    fn after_cookie(self, cookie: u32) -> AfterCookie<Self>
    where
        Self: Sized,
    {
        AfterCookie::new(self, cookie)
    }
}

impl<T: Stream<Item = Frame>> SettingsAppliedExt for T {}

pin_project! {
    /// Stream returned by [`SettingsAppliedExt::after_cookie`].
    pub struct AfterCookie<S> {
        #[pin]
        stream: S,
        cookie: u32,
        applied: bool,
        skipped: u64,
    }
}

impl<S> AfterCookie<S> {
    pub fn new(stream: S, cookie: u32) -> Self {
        Self { stream, cookie, applied: false, skipped: 0 }
    }

    /// Frames dropped while waiting for the cookie.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<S: Stream<Item = Frame>> Stream for AfterCookie<S> {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        let mut this = self.project();
        loop {
            let Some(frame) = ready!(this.stream.as_mut().poll_next(cx)) else {
                return Poll::Ready(None);
            };
            if *this.applied || frame.header().applied_settings >= *this.cookie {
                if !*this.applied {
                    tracing::debug!(
                        cookie = *this.cookie,
                        frame = frame.frame_index(),
                        skipped = *this.skipped,
                        "Settings applied"
                    );
                }
                *this.applied = true;
                return Poll::Ready(Some(frame));
            }
            *this.skipped += 1;
        }
    }
}
