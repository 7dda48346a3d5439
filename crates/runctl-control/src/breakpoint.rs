use std::fmt;

use indexmap::IndexMap;

use crate::primitive::LineTable;

/// ID of a breakpoint (1-based, in creation order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(pub u32);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolved location of a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// ID of the location within its breakpoint (1-based).
    pub id: u32,

    /// Address of the location.
    pub addr: u64,
}

/// Source-line breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    id: BreakpointId,
    file: String,
    line: u32,
    locations: Vec<Location>,
    enabled: bool,
    hit_count: u64,
}

impl Breakpoint {
    /// Returns the breakpoint's ID.
    pub const fn id(&self) -> BreakpointId {
        self.id
    }

    /// Returns the source file of the breakpoint.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Returns the source line of the breakpoint.
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// Returns the resolved locations of the breakpoint.
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Returns whether the breakpoint is enabled.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns how many times the breakpoint stopped a thread.
    pub const fn hit_count(&self) -> u64 {
        self.hit_count
    }

    fn resolve(&mut self, line_table: &(impl LineTable + ?Sized)) {
        self.locations = line_table
            .resolve_line(&self.file, self.line)
            .into_iter()
            .zip(1..)
            .map(|(addr, id)| Location { id, addr })
            .collect();
    }
}

/// Breakpoint resolved to an unexpected number of locations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Breakpoint {id} ({file}:{line}) has {actual} location(s), expected {expected}")]
pub struct LocationMismatch {
    /// ID of the breakpoint.
    pub id: BreakpointId,

    /// Source file of the breakpoint.
    pub file: String,

    /// Source line of the breakpoint.
    pub line: u32,

    /// Number of locations expected by the caller.
    pub expected: usize,

    /// Number of resolved locations.
    pub actual: usize,
}

/// Registry of the breakpoints of a target, in creation order.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    bps: IndexMap<BreakpointId, Breakpoint>,
    next_id: u32,
}

impl BreakpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a breakpoint on a source line, resolved with the given line
    /// table.
    ///
    /// A breakpoint without any location is still added.
    pub fn add(
        &mut self,
        file: impl Into<String>,
        line: u32,
        line_table: &(impl LineTable + ?Sized),
    ) -> &Breakpoint {
        self.next_id += 1;
        let id = BreakpointId(self.next_id);

        let mut bp = Breakpoint {
            id,
            file: file.into(),
            line,
            locations: Vec::new(),
            enabled: true,
            hit_count: 0,
        };

        bp.resolve(line_table);

        tracing::debug!(
            id = id.0,
            file = %bp.file,
            line,
            locations = bp.locations.len(),
            "breakpoint added"
        );

        self.bps.entry(id).or_insert(bp)
    }

    /// Removes a breakpoint.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.bps.shift_remove(&id)
    }

    /// Enables or disables a breakpoint.
    ///
    /// On success, returns whether the flag changed.
    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> Option<bool> {
        let bp = self.bps.get_mut(&id)?;
        let changed = bp.enabled != enabled;
        bp.enabled = enabled;
        Some(changed)
    }

    /// Returns a breakpoint.
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.bps.get(&id)
    }

    /// Returns the breakpoints, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.bps.values()
    }

    /// Returns the number of breakpoints.
    pub fn len(&self) -> usize {
        self.bps.len()
    }

    /// Returns whether the registry has no breakpoint.
    pub fn is_empty(&self) -> bool {
        self.bps.is_empty()
    }

    /// Checks that a breakpoint resolved to exactly `expected` locations.
    pub fn expect_locations(
        &self,
        id: BreakpointId,
        expected: usize,
    ) -> Option<Result<(), LocationMismatch>> {
        let bp = self.bps.get(&id)?;

        if bp.locations.len() == expected {
            return Some(Ok(()));
        }

        Some(Err(LocationMismatch {
            id,
            file: bp.file.clone(),
            line: bp.line,
            expected,
            actual: bp.locations.len(),
        }))
    }

    /// Resolves all breakpoints again, against a freshly loaded executable.
    pub fn resolve_all(&mut self, line_table: &(impl LineTable + ?Sized)) {
        for bp in self.bps.values_mut() {
            bp.resolve(line_table);
        }
    }

    /// Returns the addresses of all enabled locations.
    pub fn enabled_addrs(&self) -> impl Iterator<Item = u64> + '_ {
        self.bps
            .values()
            .filter(|bp| bp.enabled)
            .flat_map(|bp| bp.locations.iter().map(|loc| loc.addr))
    }

    /// Returns the enabled breakpoint location at the given address.
    pub fn find_by_addr(&self, addr: u64) -> Option<(BreakpointId, u32)> {
        self.bps
            .values()
            .filter(|bp| bp.enabled)
            .find_map(|bp| {
                bp.locations
                    .iter()
                    .find(|loc| loc.addr == addr)
                    .map(|loc| (bp.id, loc.id))
            })
    }

    /// Accounts for a thread stopped by the given breakpoint.
    pub(crate) fn register_hit(&mut self, id: BreakpointId) {
        if let Some(bp) = self.bps.get_mut(&id) {
            bp.hit_count += 1;
        }
    }

    /// Returns whether `addr` is still used by another enabled location
    /// than the ones of breakpoint `except`.
    pub(crate) fn is_addr_shared(&self, addr: u64, except: BreakpointId) -> bool {
        self.bps
            .values()
            .filter(|bp| bp.enabled && bp.id != except)
            .any(|bp| bp.locations.iter().any(|loc| loc.addr == addr))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{BreakpointId, BreakpointRegistry, LocationMismatch};
    use crate::primitive::{LineTable, SourceLine};

    struct FakeLineTable(HashMap<(&'static str, u32), Vec<u64>>);

    impl LineTable for FakeLineTable {
        fn resolve_line(&self, file: &str, line: u32) -> Vec<u64> {
            self.0
                .iter()
                .find(|((f, l), _)| *f == file && *l == line)
                .map(|(_, addrs)| addrs.clone())
                .unwrap_or_default()
        }

        fn source_line(&self, _addr: u64) -> Option<SourceLine> {
            None
        }
    }

    fn line_table() -> FakeLineTable {
        FakeLineTable(HashMap::from([
            (("main.c", 10), vec![0x1000]),
            (("main.c", 20), vec![0x1010]),
            (("inline.h", 3), vec![0x1020, 0x1120]),
        ]))
    }

    #[test]
    fn single_location_round_trip() {
        let mut registry = BreakpointRegistry::new();

        let bp = registry.add("main.c", 10, &line_table());
        assert_eq!(bp.id(), BreakpointId(1));
        assert_eq!(bp.locations().len(), 1);

        let listed = registry.iter().collect::<Vec<_>>();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file(), "main.c");
        assert_eq!(listed[0].line(), 10);
        assert_eq!(registry.expect_locations(BreakpointId(1), 1), Some(Ok(())));
    }

    #[test]
    fn insertion_order_and_ids() {
        let mut registry = BreakpointRegistry::new();
        let table = line_table();

        registry.add("main.c", 20, &table);
        registry.add("main.c", 10, &table);
        registry.add("inline.h", 3, &table);

        let lines = registry.iter().map(|bp| bp.line()).collect::<Vec<_>>();
        assert_eq!(lines, [20, 10, 3]);

        registry.remove(BreakpointId(2));
        let ids = registry.iter().map(|bp| bp.id().0).collect::<Vec<_>>();
        assert_eq!(ids, [1, 3]);

        // IDs are never reused
        assert_eq!(registry.add("main.c", 10, &table).id(), BreakpointId(4));
    }

    #[test]
    fn unresolved_breakpoint_is_flagged_on_expectation() {
        let mut registry = BreakpointRegistry::new();

        let bp = registry.add("main.c", 99, &line_table());
        assert!(bp.locations().is_empty());

        assert_eq!(
            registry.expect_locations(BreakpointId(1), 1),
            Some(Err(LocationMismatch {
                id: BreakpointId(1),
                file: "main.c".to_owned(),
                line: 99,
                expected: 1,
                actual: 0,
            }))
        );
        assert_eq!(registry.expect_locations(BreakpointId(7), 1), None);
    }

    #[test]
    fn multiple_locations() {
        let mut registry = BreakpointRegistry::new();

        registry.add("inline.h", 3, &line_table());

        assert_eq!(registry.find_by_addr(0x1120), Some((BreakpointId(1), 2)));
        assert!(registry.expect_locations(BreakpointId(1), 1).expect("known breakpoint").is_err());
    }

    #[test]
    fn disabled_breakpoint_is_not_hit() {
        let mut registry = BreakpointRegistry::new();

        registry.add("main.c", 10, &line_table());
        assert_eq!(registry.set_enabled(BreakpointId(1), false), Some(true));
        assert_eq!(registry.set_enabled(BreakpointId(1), false), Some(false));

        assert_eq!(registry.find_by_addr(0x1000), None);
        assert_eq!(registry.enabled_addrs().count(), 0);
    }
}
