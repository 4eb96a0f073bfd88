//! Construction and parsing of the OAuth `state` parameter.
//!
//! The state is `<link-id>_<nonce>_<memo>`: the link ID says which
//! link the callback belongs to, the nonce binds it to a single
//! `/start` invocation, and the memo is an opaque caller-supplied
//! value carried through the round-trip (short and not secret, and
//! free to contain underscores itself).

use anyhow::{anyhow, Result};

use crate::id;

/// Builds the state parameter for a consent-page redirect. The memo
/// suffix is omitted when empty.
pub fn construct_state_param(link_id: &str, nonce: &str, memo: &str) -> String {
    let mut state = format!("{link_id}_{nonce}");
    if !memo.is_empty() {
        state.push('_');
        state.push_str(memo);
    }
    state
}

/// Splits a callback's state parameter into `(link ID, nonce, memo)`.
///
/// Only the first two underscores separate: any remainder is the memo.
/// The link ID must be well-formed; nonce equality against the stored
/// value is the caller's check.
pub fn parse_state_param(state: &str) -> Result<(String, String, String)> {
    let mut parts = state.splitn(3, '_');
    let link_id = parts.next().unwrap_or_default();
    let nonce = parts.next().unwrap_or_default();
    let memo = parts.next().unwrap_or_default();

    id::validate(link_id)?;
    if nonce.is_empty() {
        return Err(anyhow!("missing nonce in state parameter"));
    }

    Ok((link_id.to_string(), nonce.to_string(), memo.to_string()))
}
