//! Visit status resolution.
//!
//! Combines the flag store's answer, the on-disk modification time and
//! the protection hooks into a single per-chunk status. Pure apart
//! from the hook queries.

use crate::config::SweeperConfig;
use crate::flags::{DEFAULT_FLAG, ETERNAL_FLAG, GENERATED_FLAG};
use crate::protect::HookRegistry;

/// Per-chunk view derived from a region header for one check cycle.
/// Borrows the world name; must not outlive the cycle.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRecord<'a> {
    pub world: &'a str,
    pub chunk_x: i32,
    pub chunk_z: i32,
    /// Location-table entry is zero: the chunk is already absent.
    pub orphaned: bool,
    /// Timestamp-table entry in milliseconds since epoch.
    pub last_modified_ms: i64,
}

/// Outcome of a chunk check.
///
/// The first five variants are ordered: higher means more protected
/// from deletion. `Orphaned` and `Unknown` are orthogonal terminal
/// states; `Unknown` must never be treated as eligible for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VisitStatus {
    Unvisited,
    Generated,
    Visited,
    PermanentlyFlagged,
    Protected,
    Orphaned,
    Unknown,
}

impl VisitStatus {
    /// A chunk may be deleted only when its status sits strictly below
    /// `Visited`. Generated chunks additionally need the policy toggle.
    pub fn is_deletable(self, delete_fresh_chunks: bool) -> bool {
        match self {
            VisitStatus::Unvisited => true,
            VisitStatus::Generated => delete_fresh_chunks,
            _ => false,
        }
    }
}

/// Resolve the status of one chunk.
///
/// `flag_value` is the raw flag store answer ([`DEFAULT_FLAG`] when
/// never flagged). The `GENERATED_FLAG` sentinel is not a real
/// instant, so it bypasses both the in-future check and the
/// modification-time check and maps to `Generated` or `Unvisited`
/// according to policy once no hook objected.
///
/// A failed hook query (main-thread timeout included) yields
/// `Unknown`: the chunk is retried next cycle rather than ever being
/// reported safe to delete.
pub fn resolve(
    record: &ChunkRecord<'_>,
    flag_value: i64,
    now_ms: i64,
    config: &SweeperConfig,
    hooks: &HookRegistry,
) -> VisitStatus {
    if record.orphaned {
        return VisitStatus::Orphaned;
    }

    let generated = flag_value == GENERATED_FLAG;
    if !generated {
        if now_ms <= flag_value {
            return match flag_value {
                ETERNAL_FLAG => VisitStatus::PermanentlyFlagged,
                // A default value sitting in the future points at a
                // corrupt or mis-decoded record; never report it safe.
                DEFAULT_FLAG => VisitStatus::Unknown,
                _ => VisitStatus::Visited,
            };
        }

        // On-disk modification evidence is authoritative over a stale
        // flag: world generation and external tools write chunks
        // without going through the flag path.
        if now_ms - config.flag_duration_ms() <= record.last_modified_ms {
            return VisitStatus::Visited;
        }
    }

    match hooks.is_protected(record.world, record.chunk_x, record.chunk_z) {
        Ok(true) => return VisitStatus::Protected,
        Ok(false) => {}
        Err(e) => {
            log::warn!(
                "protection query failed for {}:{},{}: {}",
                record.world,
                record.chunk_x,
                record.chunk_z,
                e
            );
            return VisitStatus::Unknown;
        }
    }

    if generated && !config.delete_fresh_chunks {
        VisitStatus::Generated
    } else {
        VisitStatus::Unvisited
    }
}
