//! The seam towards high-level DIE-tree checks.
//!
//! The structural pass only verifies the wire form. Checks that reason
//! about a decoded DWARF tree (expected children per tag, range sanity
//! against the symbol table, ...) plug in behind [`HighLevelChecker`] and
//! run after the structural pass succeeded for the sections they need.

use crate::elf::ElfFile;
use crate::info::Cu;
use crate::messages::Diagnostics;

/// Result of running one per-DIE check.
///
/// The driver of a check suite filters its live set on these: an
/// unscheduled check is removed, a reported failure has already produced
/// its diagnostic, and any other failure yields a generic "check failed"
/// message while the check stays scheduled.
#[derive(Debug)]
pub enum DieCheckOutcome {
    Ok,
    /// Remove this check from the live set.
    Unschedule,
    /// The check failed and has already emitted its own diagnostic.
    Reported,
    /// The check failed for an unexpected reason.
    OtherFailure(String),
}

/// High-level checks invoked once the structural pass is done.
pub trait HighLevelChecker {
    /// Runs the DIE-tree shape checks. Called after `.debug_info` loaded
    /// cleanly.
    fn check_expected_trees(&self, file: &ElfFile<'_>, cus: &[Cu], diag: &Diagnostics);

    /// Compares address ranges between sections. Called after both the
    /// ranges and aranges passes came back sound.
    fn check_matching_ranges(&self, file: &ElfFile<'_>, cus: &[Cu], diag: &Diagnostics);
}
