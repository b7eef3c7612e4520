//! Lazy channel management
//!
//! Channels are opened on the first send or receive opportunity, not at
//! connect time. Channel negotiation is unreliable in non-blocking mode
//! for some protocol implementations, so the open call temporarily
//! reverts the session to blocking mode through a scope guard.

use crate::engine::{
    AuthenticatedSession, BlockingGuard, ChannelRequest, SessionChannel, SessionEngine,
};
use crate::error::EngineError;

/// Opens a channel at most once and caches the handle.
pub struct ChannelManager<E: SessionEngine> {
    request: ChannelRequest,
    channel: Option<<E::Authenticated as AuthenticatedSession>::Channel>,
}

impl<E: SessionEngine> ChannelManager<E> {
    pub fn new(request: ChannelRequest) -> Self {
        Self {
            request,
            channel: None,
        }
    }

    /// Open the channel if it does not exist yet, and return it.
    ///
    /// Idempotent. A failed open is fatal to the connection and surfaces
    /// as [`EngineError::ChannelOpen`].
    pub fn ensure_open(
        &mut self,
        session: &E::Authenticated,
    ) -> Result<&mut <E::Authenticated as AuthenticatedSession>::Channel, EngineError> {
        match self.channel {
            Some(ref mut channel) => Ok(channel),
            None => {
                let channel = {
                    let _blocking = BlockingGuard::enter(session, true);
                    session.open_channel(&self.request)?
                };
                Ok(self.channel.insert(channel))
            }
        }
    }

    /// The cached channel, if one has been opened.
    pub fn channel_mut(
        &mut self,
    ) -> Option<&mut <E::Authenticated as AuthenticatedSession>::Channel> {
        self.channel.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Close and drop the channel. Must run while the session handle is
    /// still valid, i.e. from the before-close hook.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}
