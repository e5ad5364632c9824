//! Session orchestration: moving a completed key agreement into a
//! secure-messaging channel.

use tracing::debug;

use crate::bauth::BauthState;
use crate::sm::SmState;
use crate::traits::Suite;
use crate::Result;

/// Consume a completed [`BauthState`] and start secure messaging with
/// the agreed key.
///
/// The key never surfaces outside the two states: it is derived, moved
/// into the channel, and the protocol state (ephemeral scalars, seed,
/// long-term key copy) is zeroized as it drops. Each endpoint calls
/// this on its own state; the two channels share the key and advance
/// their counters in lockstep.
pub fn establish<'a>(state: BauthState<'_>, suite: Suite<'a>) -> Result<SmState<'a>> {
    let key = state.session_key()?;
    let role = state.role();
    debug!(?role, "secure-messaging session established");
    Ok(SmState::start(*key, role, suite))
}
