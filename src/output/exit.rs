//! Exit-code mapping.
//!
//! 2 = criticals present or no result at all; 1 = warnings present;
//! 0 = clean or info-only. Errors before a result exists (construction,
//! submission) map to 2 at the call site.

use crate::types::ReviewResult;

/// Map a review result onto the process exit code.
pub fn exit_code(result: Option<&ReviewResult>) -> u8 {
    let Some(result) = result else {
        return 2;
    };
    if result.critical_count > 0 {
        return 2;
    }
    if result.warning_count > 0 {
        return 1;
    }
    0
}
