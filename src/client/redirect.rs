//! Redirect policy for one logical request.

use url::Url;

use super::Error;
use crate::codec::ResponseHeader;
use crate::uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HopState {
    Initial,
    Redirecting,
    Completed,
    Rejected,
}

/// What to do with a completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Send the request again to this URL.
    Follow(Url),

    /// Report this response.
    Finish,
}

/// Tracks the hops of one request against its redirect budget.
///
/// A hop only counts as taken once a response for it arrives, so a hop that
/// fails to connect leaves [`RedirectController::followed`] unchanged.
#[derive(Debug, Clone)]
pub(crate) struct RedirectController {
    current: Url,
    effective: Url,
    remaining: u32,
    followed: u32,
    pending: bool,
    state: HopState,
}

impl RedirectController {
    pub(crate) fn new(url: Url, budget: u32) -> Self {
        Self {
            effective: url.clone(),
            current: url,
            remaining: budget,
            followed: 0,
            pending: false,
            state: HopState::Initial,
        }
    }

    /// URL the next (or current) hop is sent to.
    pub(crate) fn current(&self) -> &Url {
        &self.current
    }

    /// URL of the most recent response.
    pub(crate) fn effective(&self) -> &Url {
        &self.effective
    }

    /// Redirects taken so far.
    pub(crate) fn followed(&self) -> u32 {
        self.followed
    }

    /// Redirects that may still be followed.
    pub(crate) fn remaining_mut(&mut self) -> &mut u32 {
        &mut self.remaining
    }

    pub(crate) fn state(&self) -> HopState {
        self.state
    }

    /// A response head arrived for the current hop.
    pub(crate) fn on_response(&mut self) {
        if std::mem::take(&mut self.pending) {
            self.followed += 1;
        }
        self.effective = self.current.clone();
    }

    /// Decide whether a completed response is followed.
    ///
    /// Only redirect statuses carrying a `Location` are followed, and only
    /// while budget remains. The target is resolved against the URL that
    /// produced the response.
    pub(crate) fn decide(&mut self, header: &ResponseHeader) -> Result<Decision, Error> {
        if self.remaining == 0 || !header.is_redirect() {
            self.state = HopState::Completed;
            return Ok(Decision::Finish);
        }

        let location = header.location().unwrap_or_default();
        let target = match uri::resolve_location(&self.effective, location) {
            Ok(target) => target,
            Err(error) => {
                self.state = HopState::Rejected;
                return Err(error);
            }
        };

        tracing::debug!(
            status = header.status(),
            from = %self.effective,
            to = %target,
            "following redirect"
        );
        self.remaining -= 1;
        self.pending = true;
        self.current = target.clone();
        self.state = HopState::Redirecting;
        Ok(Decision::Follow(target))
    }

    /// The hop failed.
    pub(crate) fn reject(&mut self) {
        self.state = HopState::Rejected;
    }
}
