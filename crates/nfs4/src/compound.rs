//! # Compound Validation
//!
//! A server runs a compound's operations in order and stops at the first
//! failure, so a well-formed reply is always an all-OK prefix of the request,
//! optionally ending in the one failing result.
//!
//! ## Rules
//!
//! - Result `i` carries the opcode of request `i`. A request opcode the
//!   protocol does not define is answered as `OP_ILLEGAL`; a defined one
//!   never is, in any position.
//! - OK: one result per request, every one OK.
//! - Not OK: no more results than requests, all but the last OK, the last
//!   one carrying the overall status. No results at all is accepted, which
//!   is what a minor version mismatch looks like.

use crate::error::InvalidCompoundResponse;
use crate::proto::CompoundRes;
use crate::proto::Opcode;

/// Checks `res` against the opcodes that were sent.
pub fn validate(requested: &[Opcode], res: &CompoundRes) -> Result<(), InvalidCompoundResponse> {
    let invalid = |reason: String| InvalidCompoundResponse { reason, status: res.status };
    let count = res.results.len();

    if count > requested.len() {
        return Err(invalid(format!("{} results for {} operations", count, requested.len())));
    }

    for (i, (result, sent)) in res.results.iter().zip(requested).enumerate() {
        let expected = sent.expected_echo();
        let last = i + 1 == count;
        if result.opcode != expected {
            return Err(invalid(format!("result {} is {}, expected {}", i, result.opcode, expected)));
        }
        if !last && !result.status.is_ok() {
            return Err(invalid(format!("{} at position {} failed with {} but was not last", result.opcode, i, result.status)));
        }
    }

    if res.status.is_ok() {
        if count != requested.len() {
            return Err(invalid(format!("status OK with {} results for {} operations", count, requested.len())));
        }
        if let Some(last) = res.results.last() {
            if !last.status.is_ok() {
                return Err(invalid(format!("status OK but {} returned {}", last.opcode, last.status)));
            }
        }
    } else if let Some(last) = res.results.last() {
        if last.status != res.status {
            return Err(invalid(format!("last result {} returned {}", last.opcode, last.status)));
        }
    }

    Ok(())
}
