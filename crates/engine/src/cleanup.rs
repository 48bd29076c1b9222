//! Repair pass for artifacts of earlier splices
//!
//! An older insertion routine rewrote the `in` line but left the previous
//! terminal reference on the line below it, producing a dangling reference
//! after the new one. This pass removes exactly that line and nothing else.

use crate::formula;

/// Remove an orphaned step reference directly after `reference_index`.
///
/// `reference_index` is the line holding the freshly written terminal
/// reference. The following line is dropped when it is a lone step
/// reference: anything starting with a quoted identifier, or a bare
/// identifier on its own. Returns true if a line was removed.
pub fn remove_orphaned_reference(lines: &mut Vec<String>, reference_index: usize) -> bool {
    let next = reference_index + 1;
    match lines.get(next) {
        Some(line) if is_orphaned_reference(line) => {
            log::debug!("Removing leftover reference after in clause: {}", line.trim());
            lines.remove(next);
            true
        }
        _ => false,
    }
}

fn is_orphaned_reference(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("#\"") || formula::parse_reference(trimmed).is_some()
}
