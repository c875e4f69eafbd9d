//! File-store arbiter
//!
//! Per transaction and direction, counts how many file-interested
//! signatures have concluded they cannot match. Once every file-interested
//! signature in the rule group has given up, file storage for that
//! transaction and direction is disabled; no rule can ask for it anymore.
//! The decision is terminal.

use tracing::debug;

use crate::core::Direction;
use crate::detect::state::DirStateFlags;
use crate::detect::RuleGroup;
use crate::protocols::AppLayerState;

/// Fold cannot-match conclusions into the transaction's counter and
/// disable storage when the rule group is exhausted
pub(crate) fn handle_files(
    rule_group: &RuleGroup,
    enabled: bool,
    alstate: &mut dyn AppLayerState,
    direction: Direction,
    tx_id: u64,
    file_no_match: u16,
) {
    if !enabled {
        return;
    }

    let disable = {
        let Some(state) = alstate.tx_detect_state_mut(tx_id) else {
            return;
        };
        let dir_state = state.dir_mut(direction);
        dir_state.filestore_cnt += file_no_match;
        if dir_state.filestore_cnt == rule_group.filestore_cnt
            && !dir_state.flags.contains(DirStateFlags::FILE_STORE_DISABLED)
        {
            dir_state.flags |= DirStateFlags::FILE_STORE_DISABLED;
            true
        } else {
            false
        }
    };

    if disable {
        debug!(tx_id, %direction, "no file-interested signature can match, disabling file storage");
        if let Some(files) = alstate.tx_files_mut(tx_id, direction) {
            files.disable_storing();
        }
    }
}
