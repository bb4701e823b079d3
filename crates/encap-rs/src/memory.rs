//! Process memory snapshot used for compile diagnostics.

use std::fs;

/// Virtual size and resident set of the current process, in kB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryProfile {
    pub vm_kb: u64,
    pub rss_kb: u64,
}

impl MemoryProfile {
    /// Reads `/proc/self/status`; zeros where the file or a field is unavailable.
    pub fn current() -> Self {
        match fs::read_to_string("/proc/self/status") {
            Ok(status) => Self::parse(&status),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(status: &str) -> Self {
        let mut profile = Self::default();
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmSize:") {
                profile.vm_kb = parse_kb(rest);
            } else if let Some(rest) = line.strip_prefix("VmRSS:") {
                profile.rss_kb = parse_kb(rest);
            }
        }
        profile
    }

    /// Growth from `earlier` to `self`, saturating at zero.
    pub fn delta_since(&self, earlier: &MemoryProfile) -> MemoryProfile {
        MemoryProfile {
            vm_kb: self.vm_kb.saturating_sub(earlier.vm_kb),
            rss_kb: self.rss_kb.saturating_sub(earlier.rss_kb),
        }
    }
}

fn parse_kb(field: &str) -> u64 {
    field
        .split_whitespace()
        .next()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
