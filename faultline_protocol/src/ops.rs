//! The operation registry: the fixed, ordered list of interceptable
//! runtime operations and the campaign bitmask selecting among them.

use std::fmt;

/// One interceptable runtime operation.
///
/// The discriminants are stable ids used in persisted records; id 0 is
/// reserved for call sites whose operation could not be determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Op {
    Unknown = 0,
    Malloc = 1,
    Realloc = 2,
    Calloc = 3,
    New = 4,
    Fopen = 5,
    Getline = 6,
    Fgets = 7,
    Fread = 8,
    Fwrite = 9,
}

impl Op {
    /// Every registered operation, in registry order, including the
    /// reserved `Unknown` slot.
    pub const ALL: [Op; 10] = [
        Op::Unknown,
        Op::Malloc,
        Op::Realloc,
        Op::Calloc,
        Op::New,
        Op::Fopen,
        Op::Getline,
        Op::Fgets,
        Op::Fread,
        Op::Fwrite,
    ];

    /// The memory-allocation operation group.
    pub const MEMORY: [Op; 4] = [Op::Malloc, Op::Realloc, Op::Calloc, Op::New];

    /// The file-I/O operation group.
    pub const FILE_IO: [Op; 5] = [Op::Fopen, Op::Getline, Op::Fgets, Op::Fread, Op::Fwrite];

    pub fn id(self) -> u32 {
        self as u32
    }

    /// Maps a persisted id back to its operation. Ids outside the
    /// registry collapse to `Unknown` rather than failing: a stale or
    /// foreign table entry still names *a* site, just not its kind.
    pub fn from_id(id: u64) -> Op {
        match id {
            1 => Op::Malloc,
            2 => Op::Realloc,
            3 => Op::Calloc,
            4 => Op::New,
            5 => Op::Fopen,
            6 => Op::Getline,
            7 => Op::Fgets,
            8 => Op::Fread,
            9 => Op::Fwrite,
            _ => Op::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Unknown => "(unknown)",
            Op::Malloc => "malloc",
            Op::Realloc => "realloc",
            Op::Calloc => "calloc",
            Op::New => "new",
            Op::Fopen => "fopen",
            Op::Getline => "getline",
            Op::Fgets => "fgets",
            Op::Fread => "fread",
            Op::Fwrite => "fwrite",
        }
    }

    /// Looks up an operation by its registry name. The reserved
    /// `(unknown)` slot is not addressable by name.
    pub fn from_name(name: &str) -> Option<Op> {
        Op::ALL
            .into_iter()
            .skip(1)
            .find(|op| op.name() == name)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of operations enabled for a campaign, persisted as a `u32`
/// bitmask inside the settings record (bit position = operation id).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpSet(u32);

impl OpSet {
    pub const EMPTY: OpSet = OpSet(0);

    /// The default campaign set: all memory-allocation operations.
    pub fn default_set() -> OpSet {
        let mut set = OpSet::EMPTY;
        set.enable_group(&Op::MEMORY);
        set
    }

    /// Every non-reserved operation.
    pub fn all() -> OpSet {
        let mut set = OpSet::EMPTY;
        set.enable_group(&Op::ALL[1..]);
        set
    }

    pub fn enable(&mut self, op: Op) {
        self.0 |= 1 << op.id();
    }

    pub fn disable(&mut self, op: Op) {
        self.0 &= !(1 << op.id());
    }

    pub fn enable_group(&mut self, ops: &[Op]) {
        for &op in ops {
            self.enable(op);
        }
    }

    pub fn disable_group(&mut self, ops: &[Op]) {
        for &op in ops {
            self.disable(op);
        }
    }

    pub fn contains(&self, op: Op) -> bool {
        self.0 & (1 << op.id()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Enabled operations in registry order.
    pub fn iter(&self) -> impl Iterator<Item = Op> + '_ {
        Op::ALL.into_iter().skip(1).filter(|op| self.contains(*op))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> OpSet {
        OpSet(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_zero_is_reserved() {
        for (index, op) in Op::ALL.into_iter().enumerate() {
            assert_eq!(op.id() as usize, index);
            assert_eq!(Op::from_id(op.id() as u64), op);
        }
        assert_eq!(Op::from_id(0), Op::Unknown);
        assert_eq!(Op::from_id(999), Op::Unknown);
    }

    #[test]
    fn names_round_trip_except_unknown() {
        for op in Op::ALL.into_iter().skip(1) {
            assert_eq!(Op::from_name(op.name()), Some(op));
        }
        assert_eq!(Op::from_name("(unknown)"), None);
        assert_eq!(Op::from_name("mmap"), None);
    }

    #[test]
    fn default_set_is_the_memory_group() {
        let set = OpSet::default_set();
        for op in Op::MEMORY {
            assert!(set.contains(op));
        }
        for op in Op::FILE_IO {
            assert!(!set.contains(op));
        }
    }

    #[test]
    fn group_toggles() {
        let mut set = OpSet::all();
        set.disable_group(&Op::MEMORY);
        assert_eq!(set.iter().collect::<Vec<_>>(), Op::FILE_IO.to_vec());

        set.disable_group(&Op::FILE_IO);
        assert!(set.is_empty());

        set.enable(Op::Fread);
        assert_eq!(set.bits(), 1 << Op::Fread.id());
        assert_eq!(OpSet::from_bits(set.bits()), set);
    }
}
