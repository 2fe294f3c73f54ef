//! Local port allocation for new managed entries.

use std::collections::HashSet;

/// First port handed out when nothing is in use.
pub const DEFAULT_BASE_PORT: u16 = 2222;

/// Textual ports claimed by managed entries during one pass.
pub type PortUsage = HashSet<String>;

/// Hands out the smallest free port at or above `base`.
///
/// Usage is compared as text, exactly as ports appear in the config file.
/// Every returned port is recorded, so repeated calls never collide.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    used: PortUsage,
    // Every candidate below `cursor` is known to be taken.
    cursor: u64,
}

impl PortAllocator {
    pub fn new(base: u16, used: PortUsage) -> Self {
        Self {
            used,
            cursor: u64::from(base),
        }
    }

    /// Claim and return the next free port.
    pub fn next_port(&mut self) -> String {
        loop {
            let candidate = self.cursor.to_string();
            self.cursor += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn usage(&self) -> &PortUsage {
        &self.used
    }
}
