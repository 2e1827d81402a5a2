//! Symbolic memory interface.
//!
//! Three collaborator traits, grounded on the original `mem.h`'s
//! `InstrMemoryProxy` and `CombinedMemoryInterface`:
//!
//! - [`InstrMemory`]: instruction fetch, always concrete, DMI-eligible.
//! - [`DataMemory`]: concrete data access, DMI-eligible.
//! - [`SymbolicDataMemory`]: data access that may carry a symbolic
//!   value, never DMI-eligible (a symbolic store must go through the
//!   bus so its extension is observed; a fast-path write would silently
//!   drop the symbolic part).
//!
//! [`Mmu`] is the address-translation hook both memory sides call
//! through before touching a backing array or a DMI range.

use crate::error::{Error, Result};
use crate::solver::Solver;
use crate::value::ConcolicValue;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessType {
    Fetch,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    pub vaddr: u64,
    pub access: AccessType,
}

impl std::fmt::Display for PageFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page fault on {:?} at 0x{:x}", self.access, self.vaddr)
    }
}

impl std::error::Error for PageFault {}

/// A declared concrete address range eligible for the DMI fast path.
/// Symbolic accesses must never consult a `DmiRange`: its backing slice
/// carries no extension, so any symbolic payload would be lost.
#[derive(Clone, Copy, Debug)]
pub struct DmiRange {
    pub base: u64,
    pub size: u64,
}

impl DmiRange {
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.base && addr.saturating_add(len) <= self.base.saturating_add(self.size)
    }
}

/// Guest virtual -> physical address translation.
pub trait Mmu {
    fn translate(&self, vaddr: u64, access: AccessType) -> Result<u64, PageFault>;
}

/// Instruction fetch: always concrete, per spec.md's `[MEM]` module
/// ("symbolic instruction streams are out of scope").
pub trait InstrMemory {
    /// A DMI range for `addr`, if the implementation has one declared.
    fn dmi_hint(&self, addr: u64) -> Option<DmiRange>;
    fn load_instr(&self, paddr: u64) -> Result<u32>;
}

/// Concrete data access, eligible for the DMI fast path.
pub trait DataMemory {
    fn dmi_hint(&self, addr: u64) -> Option<DmiRange>;
    fn load(&self, paddr: u64, len: usize) -> Result<Vec<u8>>;
    fn store(&mut self, paddr: u64, bytes: &[u8]) -> Result<()>;
}

/// Data access that may carry a symbolic value. Never consults DMI: a
/// symbolic byte's expression has to be preserved past the access, and
/// a DMI pointer gives only a concrete backing slice.
pub trait SymbolicDataMemory {
    fn load_sym(&self, paddr: u64, len: usize, solver: &Solver) -> Result<ConcolicValue>;
    fn store_sym(&mut self, paddr: u64, value: &ConcolicValue) -> Result<()>;
}

/// Byte-addressed backing store used by the in-crate test harness and by
/// any [`SymbolicDataMemory`]/[`DataMemory`] implementation that does
/// not need a real MMU. Concrete bytes are stored densely; symbolic
/// cells are stored alongside as sparse overrides.
pub struct FlatMemory {
    bytes: Vec<u8>,
    symbolic: std::collections::HashMap<u64, ConcolicValue>,
    dmi: Option<DmiRange>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Self {
        FlatMemory { bytes: vec![0; size], symbolic: std::collections::HashMap::new(), dmi: None }
    }

    pub fn with_dmi(mut self, range: DmiRange) -> Self {
        self.dmi = Some(range);
        self
    }

    fn bounds_check(&self, paddr: u64, len: usize) -> Result<()> {
        if paddr.saturating_add(len as u64) as usize > self.bytes.len() {
            return Err(Error::TestCase(format!("access at 0x{paddr:x} (len {len}) out of bounds")));
        }
        Ok(())
    }
}

impl InstrMemory for FlatMemory {
    fn dmi_hint(&self, addr: u64) -> Option<DmiRange> {
        self.dmi.filter(|r| r.contains(addr, 4))
    }

    fn load_instr(&self, paddr: u64) -> Result<u32> {
        self.bounds_check(paddr, 4)?;
        let idx = paddr as usize;
        Ok(u32::from_le_bytes(self.bytes[idx..idx + 4].try_into().unwrap()))
    }
}

impl DataMemory for FlatMemory {
    fn dmi_hint(&self, addr: u64) -> Option<DmiRange> {
        self.dmi.filter(|r| r.contains(addr, 1))
    }

    fn load(&self, paddr: u64, len: usize) -> Result<Vec<u8>> {
        self.bounds_check(paddr, len)?;
        let idx = paddr as usize;
        Ok(self.bytes[idx..idx + len].to_vec())
    }

    fn store(&mut self, paddr: u64, bytes: &[u8]) -> Result<()> {
        self.bounds_check(paddr, bytes.len())?;
        let idx = paddr as usize;
        self.bytes[idx..idx + bytes.len()].copy_from_slice(bytes);
        for offset in 0..bytes.len() as u64 {
            self.symbolic.remove(&(paddr + offset));
        }
        Ok(())
    }
}

impl SymbolicDataMemory for FlatMemory {
    fn load_sym(&self, paddr: u64, len: usize, solver: &Solver) -> Result<ConcolicValue> {
        self.bounds_check(paddr, len)?;
        let mut acc: Option<ConcolicValue> = None;
        for offset in 0..len as u64 {
            let addr = paddr + offset;
            let byte = match self.symbolic.get(&addr) {
                Some(v) => v.clone(),
                None => solver.bvc(None, &[self.bytes[addr as usize]]),
            };
            acc = Some(match acc {
                None => byte,
                Some(prev) => prev.concat(&byte),
            });
        }
        Ok(acc.unwrap_or_else(|| ConcolicValue::from_const(0, 0)))
    }

    fn store_sym(&mut self, paddr: u64, value: &ConcolicValue) -> Result<()> {
        let len = (value.width as usize) / 8;
        self.bounds_check(paddr, len)?;
        for i in 0..len {
            let byte = value.extract((i * 8) as u32, 8);
            let concrete = byte.concrete as u8;
            self.bytes[paddr as usize + i] = concrete;
            if byte.is_concrete() {
                self.symbolic.remove(&(paddr + i as u64));
            } else {
                self.symbolic.insert(paddr + i as u64, byte);
            }
        }
        Ok(())
    }
}

/// Sign/zero-extending load on top of a [`SymbolicDataMemory`], matching
/// the `sext`/`zext` helpers on the original `CombinedMemoryInterface`.
pub fn load_extended(
    mem: &dyn SymbolicDataMemory,
    paddr: u64,
    len: usize,
    target_width: u32,
    signed: bool,
    solver: &Solver,
) -> Result<ConcolicValue> {
    let loaded = mem.load_sym(paddr, len, solver)?;
    if signed {
        Ok(loaded.sext(target_width))
    } else {
        Ok(loaded.zext(target_width))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn concrete_round_trip_through_flat_memory() {
        let mut mem = FlatMemory::new(16);
        DataMemory::store(&mut mem, 0, &[1, 2, 3, 4]).unwrap();
        let loaded = DataMemory::load(&mem, 0, 4).unwrap();
        assert_eq!(loaded, vec![1, 2, 3, 4]);
    }

    #[test]
    fn symbolic_store_then_load_preserves_the_expression() {
        let solver = Solver::new();
        let mut mem = FlatMemory::new(16);
        let sym = solver.get_symbolic_bytes("v", 2, &[0x34, 0x12]);
        mem.store_sym(4, &sym).unwrap();
        let loaded = mem.load_sym(4, 2, &solver).unwrap();
        assert_eq!(loaded.concrete, 0x1234);
        assert!(!loaded.is_concrete());
    }

    #[test]
    fn sign_extended_load_preserves_negative_byte() {
        let solver = Solver::new();
        let mut mem = FlatMemory::new(16);
        DataMemory::store(&mut mem, 0, &[0xff]).unwrap();
        let extended = load_extended(&mem, 0, 1, 32, true, &solver).unwrap();
        assert_eq!(extended.concrete, 0xffff_ffff);
    }

    #[test]
    fn dmi_range_rejects_out_of_bounds_access() {
        let range = DmiRange { base: 0x1000, size: 0x100 };
        assert!(range.contains(0x1000, 0x10));
        assert!(!range.contains(0x1090, 0x80));
    }
}
