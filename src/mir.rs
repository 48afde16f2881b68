//! The machine IR operated on by the analysis.
//!
//! This is a deliberately small model of a post-selection, SSA-form machine
//! IR. A [Func] owns a pool of virtual registers and a pool of instructions.
//! Instructions are generic records: an opcode, zero or more result
//! definitions, and an ordered operand list. This regularity is what lets
//! the analysis dispatch uniformly, including over opcodes it has never
//! heard of (see [Opcode::Target]).
//!
//! ## SSA properties
//!
//! The IR is strict SSA: pushing an instruction records it as the definition
//! of each register it defines, and redefining a register is an error.
//! Phi instructions interleave value and predecessor-block operands:
//! `phi %a, bb0, %b, bb1`.
//!
//! ## Registers and types
//!
//! A virtual register usually carries a [Ty]; a register constrained only by
//! a register class carries none, and consumers must treat it
//! pessimistically. Pointer widths are not part of [Ty]: they live in the
//! [DataLayout], per address space, alongside the index width used for
//! pointer arithmetic.
//!
//! ## Abbreviations
//!
//!  * `iidx`: an [InstIdx].
//!  * `vidx`: a [VRegIdx].
//!  * `fidx`: a [FrameIdx].
//!  * `f`: the name conventionally given to a shared [Func] instance.

use crate::{bitint::BitInt, known_bits::KnownBits};
use index_vec::IndexVec;
use smallvec::{SmallVec, smallvec};
use std::{collections::HashMap, fmt};
use thiserror::Error;

index_vec::define_index_type! {
    /// The index of a virtual register in a [Func].
    pub struct VRegIdx = u32;
}

index_vec::define_index_type! {
    /// The index of an instruction in a [Func].
    pub struct InstIdx = u32;
}

index_vec::define_index_type! {
    /// The index of a basic block. Blocks only appear as phi operands: the
    /// analysis has no use for their contents.
    pub struct BlockIdx = u16;
}

index_vec::define_index_type! {
    /// The index of a stack slot in a [FrameInfo].
    pub struct FrameIdx = u16;
}

/// An error building a [Func].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0:?} defined more than once")]
    Redefined(VRegIdx),
    #[error("definition of {0:?} uses a sub-field selector")]
    SubFieldDef(VRegIdx),
}

/// The type of a virtual register.
///
/// Signedness is not specified; interpretation of the bit pattern is
/// delegated to the operations upon the value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Ty {
    /// A fixed-width integer, 1..=64 bits.
    Int(u32),
    /// A pointer into the given address space. Its bit widths live in the
    /// [DataLayout].
    Ptr(u32),
    /// A vector of `elems` lanes, each `elem_bitw` bits wide.
    Vec { elem_bitw: u32, elems: u32 },
}

impl Ty {
    /// Is this a vector type?
    pub fn is_vector(&self) -> bool {
        matches!(self, Ty::Vec { .. })
    }

    /// Is this a pointer type?
    pub fn is_ptr(&self) -> bool {
        matches!(self, Ty::Ptr(_))
    }

    /// The address space of a pointer type.
    pub fn addr_space(&self) -> Option<u32> {
        match self {
            Ty::Ptr(aspace) => Some(*aspace),
            _ => None,
        }
    }

    /// How many lanes does a value of this type have?
    pub fn elems(&self) -> u32 {
        match self {
            Ty::Vec { elems, .. } => *elems,
            _ => 1,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int(bitw) => write!(f, "i{bitw}"),
            Ty::Ptr(0) => write!(f, "ptr"),
            Ty::Ptr(aspace) => write!(f, "ptr addrspace({aspace})"),
            Ty::Vec { elem_bitw, elems } => write!(f, "<{elems} x i{elem_bitw}>"),
        }
    }
}

/// The pointer layout of one address space.
#[derive(Clone, Copy, Debug)]
pub struct PtrSpec {
    /// How many bits a pointer value occupies.
    pub bitw: u32,
    /// How many of those bits take part in addressing arithmetic.
    pub index_bitw: u32,
    /// In a non-integral address space, pointer bits have no arithmetic
    /// meaning at all.
    pub non_integral: bool,
}

impl Default for PtrSpec {
    fn default() -> Self {
        Self {
            bitw: 64,
            index_bitw: 64,
            non_integral: false,
        }
    }
}

/// Per-address-space pointer layout.
#[derive(Clone, Debug, Default)]
pub struct DataLayout {
    specs: HashMap<u32, PtrSpec>,
}

impl DataLayout {
    /// Override the layout of `aspace`. Address spaces never set use the
    /// default [PtrSpec].
    pub fn set_ptr_spec(&mut self, aspace: u32, spec: PtrSpec) {
        self.specs.insert(aspace, spec);
    }

    fn spec(&self, aspace: u32) -> PtrSpec {
        self.specs.get(&aspace).copied().unwrap_or_default()
    }

    /// The width of a pointer value in `aspace`.
    pub fn ptr_bitw(&self, aspace: u32) -> u32 {
        self.spec(aspace).bitw
    }

    /// The width of the addressing-arithmetic portion of a pointer in
    /// `aspace`.
    pub fn index_bitw(&self, aspace: u32) -> u32 {
        self.spec(aspace).index_bitw
    }

    /// Does pointer arithmetic in `aspace` have no well-defined bit-level
    /// meaning?
    pub fn is_non_integral(&self, aspace: u32) -> bool {
        self.spec(aspace).non_integral
    }
}

/// A power-of-two byte alignment.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Align(u8);

impl Align {
    /// Byte alignment.
    pub const ONE: Align = Align(0);

    /// Create an [Align] from a byte count.
    ///
    /// # Panics
    ///
    /// If `bytes` is not a power of two.
    pub fn from_bytes(bytes: u64) -> Self {
        assert!(bytes.is_power_of_two(), "alignment {bytes} not a power of two");
        Align(bytes.trailing_zeros() as u8)
    }

    /// This alignment as a byte count.
    pub fn bytes(&self) -> u64 {
        1 << self.0
    }

    /// The base-2 logarithm of the byte count.
    pub fn log2(&self) -> u32 {
        u32::from(self.0)
    }
}

/// One stack slot.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    /// The slot's size in bytes.
    pub byte_size: u64,
    /// The slot's alignment.
    pub align: Align,
}

/// The stack frame of a [Func]: for the analysis, a table of slot
/// alignments.
#[derive(Debug, Default)]
pub struct FrameInfo {
    slots: IndexVec<FrameIdx, FrameSlot>,
}

impl FrameInfo {
    /// Allocate a stack slot and return its index.
    pub fn push_slot(&mut self, byte_size: u64, align: Align) -> FrameIdx {
        self.slots.push(FrameSlot { byte_size, align })
    }

    /// The alignment of slot `fidx`.
    ///
    /// # Panics
    ///
    /// If `fidx` is out of bounds.
    pub fn align(&self, fidx: FrameIdx) -> Align {
        self.slots[fidx].align
    }
}

/// Optional range metadata attached to a load: a list of `[lo, hi)`
/// constant-integer pairs the loaded value is promised to fall within.
#[derive(Clone, Debug)]
pub struct RangeMetadata {
    pairs: Vec<(BitInt, BitInt)>,
}

impl RangeMetadata {
    /// Create range metadata from `[lo, hi)` pairs.
    ///
    /// # Panics
    ///
    /// If a pair's bounds differ in width.
    pub fn new(pairs: Vec<(BitInt, BitInt)>) -> Self {
        for (lo, hi) in &pairs {
            assert_eq!(lo.bitw(), hi.bitw());
        }
        Self { pairs }
    }

    /// The bits common to every value permitted by the ranges: for each
    /// pair, the common leading prefix of `lo` and `hi - 1` is known;
    /// pairs are then intersected. Wrapped or empty pairs, and an empty
    /// list, contribute nothing.
    pub fn to_known_bits(&self, bitw: u32) -> KnownBits {
        let mut acc: Option<KnownBits> = None;
        for (lo, hi) in &self.pairs {
            debug_assert_eq!(lo.bitw(), bitw);
            let pair = if hi.to_zero_ext_u64() <= lo.to_zero_ext_u64() {
                KnownBits::unknown(bitw)
            } else {
                let max = hi.wrapping_sub(&BitInt::from_u64(bitw, 1));
                let prefix = lo.bitxor(&max).leading_zeros();
                let mask = BitInt::high_ones(bitw, prefix);
                KnownBits::new(lo.bitnot().bitand(&mask), lo.bitand(&mask))
            };
            acc = Some(match acc {
                None => pair,
                Some(x) => x.intersect(&pair),
            });
        }
        acc.unwrap_or_else(|| KnownBits::unknown(bitw))
    }
}

/// Everything the analysis needs to know about a load's memory access.
#[derive(Clone, Debug)]
pub struct MemAccess {
    /// The size of the access in bits. For extending loads this is smaller
    /// than the destination register.
    pub bitw: u32,
    /// Range metadata, if any was attached.
    pub ranges: Option<RangeMetadata>,
}

impl MemAccess {
    pub fn new(bitw: u32) -> Self {
        Self { bitw, ranges: None }
    }

    pub fn with_ranges(bitw: u32, ranges: RangeMetadata) -> Self {
        Self {
            bitw,
            ranges: Some(ranges),
        }
    }
}

/// An instruction opcode. [Opcode::Target] covers everything outside the
/// generic set: the analysis forwards such instructions to the target
/// oracle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    Copy,
    Phi,
    #[strum(serialize = "iconst")]
    IConst,
    ImplicitDef,
    FrameAddr,
    Add,
    Sub,
    PtrAdd,
    Mul,
    And,
    Or,
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "lshr")]
    LShr,
    #[strum(serialize = "ashr")]
    AShr,
    Select,
    #[strum(serialize = "smin")]
    SMin,
    #[strum(serialize = "smax")]
    SMax,
    #[strum(serialize = "umin")]
    UMin,
    #[strum(serialize = "umax")]
    UMax,
    #[strum(serialize = "icmp")]
    ICmp,
    #[strum(serialize = "fcmp")]
    FCmp,
    #[strum(serialize = "sext")]
    SExt,
    #[strum(serialize = "zext")]
    ZExt,
    #[strum(serialize = "anyext")]
    AnyExt,
    Trunc,
    #[strum(serialize = "inttoptr")]
    IntToPtr,
    #[strum(serialize = "ptrtoint")]
    PtrToInt,
    #[strum(serialize = "sext_inreg")]
    SExtInReg,
    Load,
    #[strum(serialize = "zextload")]
    ZExtLoad,
    #[strum(serialize = "sextload")]
    SExtLoad,
    Merge,
    Unmerge,
    #[strum(serialize = "bswap")]
    BSwap,
    #[strum(serialize = "bitreverse")]
    BitReverse,
    #[strum(to_string = "target.{0}")]
    Target(u16),
}

/// A result definition: the register an instruction writes. Definitions with
/// sub-field selectors never occur in the strict-SSA IR the analysis
/// accepts; the field exists so that such inputs are rejected, not silently
/// reinterpreted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Def {
    pub vreg: VRegIdx,
    pub sub: u32,
}

impl Def {
    pub fn whole(vreg: VRegIdx) -> Self {
        Self { vreg, sub: 0 }
    }
}

/// An instruction operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// A use of a virtual register. `sub != 0` selects a sub-field of the
    /// register; the analysis treats such uses pessimistically.
    Reg { vreg: VRegIdx, sub: u32 },
    /// An integer constant (the payload of [Opcode::IConst]).
    Const(BitInt),
    /// A plain immediate, e.g. the field width of [Opcode::SExtInReg].
    Imm(u64),
    /// A basic block reference (phi predecessors).
    Block(BlockIdx),
    /// A stack slot reference ([Opcode::FrameAddr]).
    Frame(FrameIdx),
}

impl Operand {
    /// A whole-register use.
    pub fn reg(vreg: VRegIdx) -> Self {
        Self::Reg { vreg, sub: 0 }
    }

    /// If this is a whole-register use, its register.
    pub fn as_plain_reg(&self) -> Option<VRegIdx> {
        match self {
            Self::Reg { vreg, sub: 0 } => Some(*vreg),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg { vreg, sub: 0 } => write!(f, "%{}", vreg.index()),
            Self::Reg { vreg, sub } => write!(f, "%{}.{sub}", vreg.index()),
            Self::Const(x) => write!(f, "{x}i{}", x.bitw()),
            Self::Imm(x) => write!(f, "{x}"),
            Self::Block(bidx) => write!(f, "bb{}", bidx.index()),
            Self::Frame(fidx) => write!(f, "slot{}", fidx.index()),
        }
    }
}

/// An instruction: an opcode, the registers it defines, and an ordered
/// operand list.
#[derive(Clone, Debug)]
pub struct Inst {
    opcode: Opcode,
    defs: SmallVec<[Def; 1]>,
    operands: SmallVec<[Operand; 2]>,
    mem: Option<MemAccess>,
}

impl Inst {
    pub fn new(opcode: Opcode, defs: SmallVec<[Def; 1]>, operands: SmallVec<[Operand; 2]>) -> Self {
        Self {
            opcode,
            defs,
            operands,
            mem: None,
        }
    }

    /// `%d = copy %s`
    pub fn copy(d: VRegIdx, s: VRegIdx) -> Self {
        Self::new(Opcode::Copy, smallvec![Def::whole(d)], smallvec![Operand::reg(s)])
    }

    /// `%d = iconst <val>`
    pub fn iconst(d: VRegIdx, val: BitInt) -> Self {
        Self::new(
            Opcode::IConst,
            smallvec![Def::whole(d)],
            smallvec![Operand::Const(val)],
        )
    }

    /// `%d = implicit_def`
    pub fn implicit_def(d: VRegIdx) -> Self {
        Self::new(Opcode::ImplicitDef, smallvec![Def::whole(d)], smallvec![])
    }

    /// `%d = frame_addr slot<fidx>`
    pub fn frame_addr(d: VRegIdx, fidx: FrameIdx) -> Self {
        Self::new(
            Opcode::FrameAddr,
            smallvec![Def::whole(d)],
            smallvec![Operand::Frame(fidx)],
        )
    }

    /// `%d = <op> %src` for single-operand opcodes (casts, bswap, ...).
    pub fn unary(opcode: Opcode, d: VRegIdx, src: VRegIdx) -> Self {
        Self::new(opcode, smallvec![Def::whole(d)], smallvec![Operand::reg(src)])
    }

    /// `%d = <op> %lhs, %rhs` for two-operand opcodes.
    pub fn binary(opcode: Opcode, d: VRegIdx, lhs: VRegIdx, rhs: VRegIdx) -> Self {
        Self::new(
            opcode,
            smallvec![Def::whole(d)],
            smallvec![Operand::reg(lhs), Operand::reg(rhs)],
        )
    }

    /// `%d = select %cond, %tval, %fval`
    pub fn select(d: VRegIdx, cond: VRegIdx, tval: VRegIdx, fval: VRegIdx) -> Self {
        Self::new(
            Opcode::Select,
            smallvec![Def::whole(d)],
            smallvec![Operand::reg(cond), Operand::reg(tval), Operand::reg(fval)],
        )
    }

    /// `%d = phi %v0, bb0, %v1, bb1, ...`
    pub fn phi(d: VRegIdx, incoming: &[(VRegIdx, BlockIdx)]) -> Self {
        let mut operands = SmallVec::new();
        for (vreg, bidx) in incoming {
            operands.push(Operand::reg(*vreg));
            operands.push(Operand::Block(*bidx));
        }
        Self::new(Opcode::Phi, smallvec![Def::whole(d)], operands)
    }

    /// `%d = sext_inreg %src, <bits>`
    pub fn sext_in_reg(d: VRegIdx, src: VRegIdx, bits: u32) -> Self {
        Self::new(
            Opcode::SExtInReg,
            smallvec![Def::whole(d)],
            smallvec![Operand::reg(src), Operand::Imm(u64::from(bits))],
        )
    }

    /// A load-family instruction: `%d = <op> %addr` with its memory-access
    /// info.
    pub fn load(opcode: Opcode, d: VRegIdx, addr: VRegIdx, mem: MemAccess) -> Self {
        debug_assert!(matches!(
            opcode,
            Opcode::Load | Opcode::ZExtLoad | Opcode::SExtLoad
        ));
        let mut inst = Self::new(opcode, smallvec![Def::whole(d)], smallvec![Operand::reg(addr)]);
        inst.mem = Some(mem);
        inst
    }

    /// `%d = merge %p0, %p1, ...`: concatenate equal-width parts, `%p0`
    /// lowest.
    pub fn merge(d: VRegIdx, parts: &[VRegIdx]) -> Self {
        Self::new(
            Opcode::Merge,
            smallvec![Def::whole(d)],
            parts.iter().map(|p| Operand::reg(*p)).collect(),
        )
    }

    /// `%d0, %d1, ... = unmerge %src`: split `%src` into equal-width parts,
    /// `%d0` lowest.
    pub fn unmerge(ds: &[VRegIdx], src: VRegIdx) -> Self {
        Self::new(
            Opcode::Unmerge,
            ds.iter().map(|d| Def::whole(*d)).collect(),
            smallvec![Operand::reg(src)],
        )
    }

    /// A target-specific instruction the generic analysis knows nothing
    /// about.
    pub fn target(opcode: u16, ds: &[VRegIdx], operands: SmallVec<[Operand; 2]>) -> Self {
        Self::new(
            Opcode::Target(opcode),
            ds.iter().map(|d| Def::whole(*d)).collect(),
            operands,
        )
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn defs(&self) -> &[Def] {
        &self.defs
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn mem(&self) -> Option<&MemAccess> {
        self.mem.as_ref()
    }

    /// The position of `vidx` among this instruction's defs.
    pub fn def_position(&self, vidx: VRegIdx) -> Option<usize> {
        self.defs.iter().position(|d| d.vreg == vidx)
    }

    /// The single register this instruction defines.
    ///
    /// # Panics
    ///
    /// If the instruction does not define exactly one register.
    pub fn single_def(&self) -> VRegIdx {
        assert_eq!(
            self.defs.len(),
            1,
            "expected single-result instruction, got {}",
            self.opcode
        );
        self.defs[0].vreg
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defs = self
            .defs
            .iter()
            .map(|d| format!("%{}", d.vreg.index()))
            .collect::<Vec<_>>()
            .join(", ");
        if !defs.is_empty() {
            write!(f, "{defs} = ")?;
        }
        write!(f, "{}", self.opcode)?;
        let operands = self
            .operands
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        if !operands.is_empty() {
            write!(f, " {operands}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct VRegInfo {
    ty: Option<Ty>,
    def: Option<InstIdx>,
}

/// A machine function: the SSA instruction graph the analysis walks.
#[derive(Debug)]
pub struct Func {
    name: String,
    dl: DataLayout,
    vregs: IndexVec<VRegIdx, VRegInfo>,
    insts: IndexVec<InstIdx, Inst>,
    frame: FrameInfo,
}

impl Func {
    pub fn new(name: impl Into<String>, dl: DataLayout) -> Self {
        Self {
            name: name.into(),
            dl,
            vregs: IndexVec::new(),
            insts: IndexVec::new(),
            frame: FrameInfo::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_layout(&self) -> &DataLayout {
        &self.dl
    }

    pub fn frame(&self) -> &FrameInfo {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameInfo {
        &mut self.frame
    }

    /// Create a fresh virtual register of type `ty`.
    pub fn new_vreg(&mut self, ty: Ty) -> VRegIdx {
        self.vregs.push(VRegInfo {
            ty: Some(ty),
            def: None,
        })
    }

    /// Create a fresh virtual register constrained only by a register class,
    /// i.e. without a type.
    pub fn new_untyped_vreg(&mut self) -> VRegIdx {
        self.vregs.push(VRegInfo { ty: None, def: None })
    }

    /// The type of `vidx`, or `None` for a register-class-only register.
    pub fn reg_ty(&self, vidx: VRegIdx) -> Option<Ty> {
        self.vregs[vidx].ty
    }

    /// The total width in bits of `vidx`: for vectors, the width of the
    /// whole value; for pointers, the pointer width of their address space.
    pub fn reg_bitw(&self, vidx: VRegIdx) -> Option<u32> {
        match self.reg_ty(vidx)? {
            Ty::Int(bitw) => Some(bitw),
            Ty::Ptr(aspace) => Some(self.dl.ptr_bitw(aspace)),
            Ty::Vec { elem_bitw, elems } => Some(elem_bitw * elems),
        }
    }

    /// The scalar width in bits of `vidx`: for vectors, the width of one
    /// lane.
    pub fn reg_scalar_bitw(&self, vidx: VRegIdx) -> Option<u32> {
        match self.reg_ty(vidx)? {
            Ty::Int(bitw) => Some(bitw),
            Ty::Ptr(aspace) => Some(self.dl.ptr_bitw(aspace)),
            Ty::Vec { elem_bitw, .. } => Some(elem_bitw),
        }
    }

    /// Append `inst`, recording it as the definition of each register it
    /// defines.
    pub fn push(&mut self, inst: Inst) -> Result<InstIdx, BuildError> {
        for def in inst.defs() {
            if def.sub != 0 {
                return Err(BuildError::SubFieldDef(def.vreg));
            }
            if self.vregs[def.vreg].def.is_some() {
                return Err(BuildError::Redefined(def.vreg));
            }
        }
        let iidx = self.insts.next_idx();
        for def in inst.defs() {
            self.vregs[def.vreg].def = Some(iidx);
        }
        Ok(self.insts.push(inst))
    }

    /// The instruction at `iidx`.
    ///
    /// # Panics
    ///
    /// If `iidx` is out of bounds.
    pub fn inst(&self, iidx: InstIdx) -> &Inst {
        &self.insts[iidx]
    }

    /// The instruction defining `vidx`.
    ///
    /// # Panics
    ///
    /// If `vidx` has no definition: the IR is not the strict SSA the
    /// analysis was promised.
    pub fn def_inst(&self, vidx: VRegIdx) -> &Inst {
        match self.vregs[vidx].def {
            Some(iidx) => &self.insts[iidx],
            None => panic!("{vidx:?} has no defining instruction"),
        }
    }

    /// Check basic structural rules and panic on a violation. This is a
    /// lightweight sanity check, not a semantic verifier.
    #[cfg(any(debug_assertions, test))]
    pub fn assert_well_formed(&self) {
        for (iidx, inst) in self.insts.iter_enumerated() {
            for operand in inst.operands() {
                if let Operand::Reg { vreg, .. } = operand {
                    assert!(
                        vreg.index() < self.vregs.len(),
                        "inst {iidx:?} references out-of-range {vreg:?}"
                    );
                }
            }
            match inst.opcode() {
                Opcode::Phi => {
                    assert!(
                        inst.operands().len() % 2 == 0 && !inst.operands().is_empty(),
                        "inst {iidx:?}: phi operands must be (value, block) pairs"
                    );
                    for (i, operand) in inst.operands().iter().enumerate() {
                        match (i % 2, operand) {
                            (0, Operand::Reg { .. }) | (1, Operand::Block(_)) => (),
                            _ => panic!("inst {iidx:?}: malformed phi operand {i}"),
                        }
                    }
                }
                Opcode::IConst => {
                    let Some(Operand::Const(val)) = inst.operands().first() else {
                        panic!("inst {iidx:?}: iconst without constant operand");
                    };
                    if let Some(bitw) = self.reg_bitw(inst.defs()[0].vreg) {
                        assert_eq!(
                            val.bitw(),
                            bitw,
                            "inst {iidx:?}: constant width does not match def"
                        );
                    }
                }
                Opcode::Merge => {
                    let part_bitws = inst
                        .operands()
                        .iter()
                        .map(|x| x.as_plain_reg().and_then(|p| self.reg_bitw(p)))
                        .collect::<Option<Vec<_>>>();
                    let dst_bitw = self.reg_bitw(inst.defs()[0].vreg);
                    if let (Some(parts), Some(dst_bitw)) = (part_bitws, dst_bitw) {
                        assert!(
                            parts.iter().all(|x| *x == parts[0]),
                            "inst {iidx:?}: merge parts differ in width"
                        );
                        assert_eq!(
                            parts[0] * u32::try_from(parts.len()).unwrap(),
                            dst_bitw,
                            "inst {iidx:?}: merge widths don't sum to the destination"
                        );
                    }
                }
                _ => (),
            }
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {} {{", self.name)?;
        for inst in &self.insts {
            let tys = inst
                .defs()
                .iter()
                .filter_map(|d| self.reg_ty(d.vreg))
                .map(|ty| ty.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if tys.is_empty() {
                writeln!(f, "  {inst}")?;
            } else {
                writeln!(f, "  {inst} : {tys}")?;
            }
        }
        write!(f, "}}")
    }
}
