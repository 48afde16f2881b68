//! The known-bits analysis over a [Func]'s SSA graph.
//!
//! [KnownBitsAnalysis] answers "which bits of this virtual register are
//! provably zero or one?" by walking the register's def-use graph backwards
//! from its defining instruction, combining operand knowledge with the
//! [KnownBits] algebra. Three things bound the walk:
//!
//!  * a recursion depth cap;
//!  * a per-query memoization cache;
//!  * provisional cache entries for phi-like merges, which cut cycles
//!    through loop phis: a phi reached again while being processed reads as
//!    fully-unknown.
//!
//! The cache lives only for the duration of one top-level query: entry
//! points assert it is empty on the way in and clear it on the way out.
//!
//! Opcodes outside the generic set, frame-index values and boolean-result
//! conventions are delegated to a [TargetLowering] oracle. A target callback
//! may recurse back into the analysis (via [KnownBitsAnalysis::compute_known_bits])
//! or even construct a nested analysis with a different depth cap; the depth
//! check uses `>=` rather than `==` so that an outer caller already past the
//! inner cap still terminates.

use crate::{
    bitint::BitInt,
    known_bits::KnownBits,
    mir::{Align, FrameIdx, Func, InstIdx, Opcode, Operand, VRegIdx},
};
use log::trace;
use std::collections::HashMap;

/// How deep the operand walk goes by default before giving up.
pub const DEFAULT_MAX_DEPTH: u32 = 6;

/// How a target materialises boolean results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BooleanContents {
    /// No convention: nothing can be assumed about the bits.
    Undefined,
    /// Booleans are 0 or 1: all bits above the lowest are zero.
    ZeroOrOne,
    /// Booleans are 0 or -1 (sign extended).
    ZeroOrNegativeOne,
}

/// The target-lowering oracle: everything the generic analysis cannot know
/// on its own. All methods default to the pessimistic answer, so a target
/// only implements what it can improve on.
pub trait TargetLowering {
    /// Refine `known` for a register defined by an instruction outside the
    /// generic opcode set.
    fn known_bits_for_target_instr(
        &self,
        _an: &mut KnownBitsAnalysis<'_>,
        _vidx: VRegIdx,
        _known: &mut KnownBits,
        _demanded_elts: &BitInt,
        _depth: u32,
    ) {
    }

    /// Refine `known` for the address of stack slot `fidx` (typically from
    /// the slot's alignment).
    fn known_bits_for_frame_index(&self, _fidx: FrameIdx, _known: &mut KnownBits, _f: &Func) {}

    /// A provable alignment for a register defined by an instruction outside
    /// the generic set.
    fn known_align_for_target_instr(
        &self,
        _an: &mut KnownBitsAnalysis<'_>,
        _vidx: VRegIdx,
        _depth: u32,
    ) -> Align {
        Align::ONE
    }

    /// A lower bound on the leading sign bits of a register defined by an
    /// instruction outside the generic set.
    fn num_sign_bits_for_target_instr(
        &self,
        _an: &mut KnownBitsAnalysis<'_>,
        _vidx: VRegIdx,
        _demanded_elts: &BitInt,
        _depth: u32,
    ) -> u32 {
        1
    }

    /// The target's boolean-result convention.
    fn boolean_contents(&self, _is_vector: bool, _is_float_cmp: bool) -> BooleanContents {
        BooleanContents::Undefined
    }
}

/// A target with no opinions: every oracle method gives the pessimistic
/// answer.
pub struct NoTarget;

impl TargetLowering for NoTarget {}

/// A known-bits analysis of one [Func].
///
/// Queries borrow the IR read-only; the only mutable state is the per-query
/// cache. Analyses are cheap to construct, but must never share a cache:
/// one instance per concurrent query.
pub struct KnownBitsAnalysis<'a> {
    f: &'a Func,
    tl: &'a dyn TargetLowering,
    max_depth: u32,
    cache: HashMap<VRegIdx, KnownBits>,
}

impl<'a> KnownBitsAnalysis<'a> {
    pub fn new(f: &'a Func, tl: &'a dyn TargetLowering) -> Self {
        Self::with_max_depth(f, tl, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(f: &'a Func, tl: &'a dyn TargetLowering, max_depth: u32) -> Self {
        Self {
            f,
            tl,
            max_depth,
            cache: HashMap::new(),
        }
    }

    /// The function under analysis.
    pub fn func(&self) -> &'a Func {
        self.f
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// The demanded-elements mask for a whole-register query: one bit per
    /// vector lane, a single set bit for scalars.
    fn demanded_for(&self, vidx: VRegIdx) -> BitInt {
        match self.f.reg_ty(vidx) {
            Some(ty) if ty.is_vector() => BitInt::all_ones(ty.elems()),
            _ => BitInt::from_u64(1, 1),
        }
    }

    /// What is known about the bits of `vidx`?
    ///
    /// For a register with no valid type the result is a 1-bit fully-unknown
    /// value.
    pub fn known_bits(&mut self, vidx: VRegIdx) -> KnownBits {
        let demanded_elts = self.demanded_for(vidx);
        self.known_bits_in(vidx, &demanded_elts, 0)
    }

    /// As [Self::known_bits], with a caller-supplied demanded-elements mask
    /// and starting depth.
    pub fn known_bits_in(&mut self, vidx: VRegIdx, demanded_elts: &BitInt, depth: u32) -> KnownBits {
        // The cache only persists for the duration of one query.
        assert!(self.cache.is_empty(), "cache should have been cleared");
        let known = self.compute_known_bits(vidx, demanded_elts, depth);
        self.cache.clear();
        known
    }

    /// What is known about the bits of the single register `iidx` defines?
    ///
    /// # Panics
    ///
    /// If the instruction does not define exactly one register.
    pub fn known_bits_for_inst(&mut self, iidx: InstIdx) -> KnownBits {
        self.known_bits(self.f.inst(iidx).single_def())
    }

    /// The mask of bits of `vidx` that are provably zero.
    pub fn known_zeros(&mut self, vidx: VRegIdx) -> BitInt {
        self.known_bits(vidx).zeros().clone()
    }

    /// The mask of bits of `vidx` that are provably one.
    pub fn known_ones(&mut self, vidx: VRegIdx) -> BitInt {
        self.known_bits(vidx).ones().clone()
    }

    /// Is every bit of `vidx` selected by `mask` provably zero?
    pub fn masked_value_is_zero(&mut self, vidx: VRegIdx, mask: &BitInt) -> bool {
        self.known_bits(vidx).zeros().bitand(mask) == *mask
    }

    /// Is the unsigned value of `vidx` provably below `1 << (bitw - 1)`,
    /// i.e. its sign bit provably zero?
    pub fn sign_bit_is_zero(&mut self, vidx: VRegIdx) -> bool {
        let Some(bitw) = self.f.reg_scalar_bitw(vidx) else {
            return false;
        };
        let sign_mask = BitInt::high_ones(bitw, 1);
        self.masked_value_is_zero(vidx, &sign_mask)
    }

    /// The recursive step of the known-bits walk. Target oracle callbacks
    /// use this to query operands of their own instructions; everyone else
    /// wants [Self::known_bits].
    pub fn compute_known_bits(
        &mut self,
        vidx: VRegIdx,
        demanded_elts: &BitInt,
        depth: u32,
    ) -> KnownBits {
        let f = self.f;

        // A register constrained only by a register class has no width we
        // could report bits for.
        let Some(ty) = f.reg_ty(vidx) else {
            return KnownBits::unknown(1);
        };
        let bitw = f.reg_bitw(vidx).unwrap();

        if ty.is_vector() {
            // Lane-wise propagation is not modelled.
            return KnownBits::unknown(bitw);
        }

        // `>=`, not `==`: a target oracle may hand us a depth that is
        // already past a *smaller* cap than the one it was called under.
        if depth >= self.max_depth {
            return KnownBits::unknown(bitw);
        }

        if demanded_elts.is_zero() {
            return KnownBits::unknown(bitw);
        }

        if let Some(known) = self.cache.get(&vidx) {
            trace!("[{depth}] cache hit for {vidx:?}");
            assert_eq!(known.bitw(), bitw, "cache entry size doesn't match");
            return known.clone();
        }

        let inst = f.def_inst(vidx);
        let opcode = inst.opcode();
        let mut known = KnownBits::unknown(bitw);

        match opcode {
            Opcode::Copy | Opcode::Phi => {
                // Insert a provisional entry *before* recursing: if a cycle
                // of phis leads back here, the lookup above terminates it
                // with "nothing known". Building up more information on loop
                // phis would need a fixpoint; cutting is cheap and sound.
                self.cache.insert(vidx, KnownBits::unknown(bitw));
                // Copies are free: they do no work worth a depth level.
                let depth_inc = u32::from(opcode != Opcode::Copy);
                // Phi operands interleave values and predecessor blocks;
                // only the values matter here. Copies have a single operand,
                // so the same stride-2 walk serves both.
                let mut acc: Option<KnownBits> = None;
                for operand in inst.operands().iter().step_by(2) {
                    // A sub-field use, or a source without a type, leaves us
                    // unable to even name the source's bits.
                    let src = match operand.as_plain_reg() {
                        Some(src) if f.reg_ty(src).is_some() => src,
                        _ => {
                            acc = None;
                            break;
                        }
                    };
                    let k = self.compute_known_bits(src, demanded_elts, depth + depth_inc);
                    let merged = match acc {
                        None => k,
                        Some(prev) => prev.intersect(&k),
                    };
                    // Nothing left to learn: stop walking operands.
                    let done = merged.is_unknown();
                    acc = Some(merged);
                    if done {
                        break;
                    }
                }
                if let Some(acc) = acc {
                    known = acc;
                }
            }
            Opcode::IConst => {
                let Operand::Const(val) = &inst.operands()[0] else {
                    panic!("malformed iconst");
                };
                debug_assert_eq!(val.bitw(), bitw);
                known = KnownBits::from_const(val);
            }
            Opcode::FrameAddr => {
                let Operand::Frame(fidx) = inst.operands()[0] else {
                    panic!("malformed frame_addr");
                };
                let tl = self.tl;
                tl.known_bits_for_frame_index(fidx, &mut known, f);
            }
            Opcode::Add | Opcode::Sub | Opcode::PtrAdd => {
                // Pointer arithmetic in a non-integral address space has no
                // bit-level meaning.
                let non_integral = opcode == Opcode::PtrAdd
                    && inst.operands()[0]
                        .as_plain_reg()
                        .and_then(|base| f.reg_ty(base))
                        .and_then(|ty| ty.addr_space())
                        .is_some_and(|aspace| f.data_layout().is_non_integral(aspace));
                if !non_integral {
                    let lhs = self.operand_reg(inst.operands(), 0);
                    let rhs = self.operand_reg(inst.operands(), 1);
                    let lhs_known = self.compute_known_bits(lhs, demanded_elts, depth + 1);
                    let rhs_known = self.compute_known_bits(rhs, demanded_elts, depth + 1);
                    known =
                        KnownBits::add_sub(opcode != Opcode::Sub, false, &lhs_known, &rhs_known);
                }
            }
            Opcode::And | Opcode::Or | Opcode::Xor => {
                // RHS first: canonicalisation favours simpler expressions on
                // the right, so what knowledge there is tends to be there.
                let lhs = self.operand_reg(inst.operands(), 0);
                let rhs = self.operand_reg(inst.operands(), 1);
                let rhs_known = self.compute_known_bits(rhs, demanded_elts, depth + 1);
                let lhs_known = self.compute_known_bits(lhs, demanded_elts, depth + 1);
                known = match opcode {
                    Opcode::And => lhs_known.and(&rhs_known),
                    Opcode::Or => lhs_known.or(&rhs_known),
                    Opcode::Xor => lhs_known.xor(&rhs_known),
                    _ => unreachable!(),
                };
            }
            Opcode::Mul => {
                let lhs = self.operand_reg(inst.operands(), 0);
                let rhs = self.operand_reg(inst.operands(), 1);
                let rhs_known = self.compute_known_bits(rhs, demanded_elts, depth + 1);
                let lhs_known = self.compute_known_bits(lhs, demanded_elts, depth + 1);
                known = KnownBits::mul(&lhs_known, &rhs_known);
            }
            Opcode::Select => {
                let tval = self.operand_reg(inst.operands(), 1);
                let fval = self.operand_reg(inst.operands(), 2);
                known = self.known_bits_min(tval, fval, demanded_elts, depth + 1);
            }
            Opcode::SMin | Opcode::SMax | Opcode::UMin | Opcode::UMax => {
                let lhs = self.operand_reg(inst.operands(), 0);
                let rhs = self.operand_reg(inst.operands(), 1);
                let lhs_known = self.compute_known_bits(lhs, demanded_elts, depth + 1);
                let rhs_known = self.compute_known_bits(rhs, demanded_elts, depth + 1);
                known = match opcode {
                    Opcode::SMin => KnownBits::smin(&lhs_known, &rhs_known),
                    Opcode::SMax => KnownBits::smax(&lhs_known, &rhs_known),
                    Opcode::UMin => KnownBits::umin(&lhs_known, &rhs_known),
                    Opcode::UMax => KnownBits::umax(&lhs_known, &rhs_known),
                    _ => unreachable!(),
                };
            }
            Opcode::ICmp | Opcode::FCmp => {
                let contents = self
                    .tl
                    .boolean_contents(ty.is_vector(), opcode == Opcode::FCmp);
                if contents == BooleanContents::ZeroOrOne && bitw > 1 {
                    known = known.with_known_zero_from(1);
                }
            }
            Opcode::SExt | Opcode::ZExt | Opcode::AnyExt => {
                let src = self.operand_reg(inst.operands(), 0);
                let src_known = self.compute_known_bits(src, demanded_elts, depth + 1);
                known = match opcode {
                    Opcode::SExt => src_known.sext(bitw),
                    Opcode::ZExt => src_known.zext(bitw),
                    Opcode::AnyExt => src_known.anyext(bitw),
                    _ => unreachable!(),
                };
            }
            Opcode::Trunc | Opcode::IntToPtr | Opcode::PtrToInt => {
                // For pointers the meaningful width is the address-space
                // index width, not the register width.
                let src = self.operand_reg(inst.operands(), 0);
                let src_ty = f.reg_ty(src).unwrap();
                let src_bitw = match src_ty.addr_space() {
                    Some(aspace) => f.data_layout().index_bitw(aspace),
                    None => f.reg_scalar_bitw(src).unwrap(),
                };
                assert!(src_bitw > 0, "source width can't be zero");
                let src_known = self.compute_known_bits(src, demanded_elts, depth + 1);
                known = src_known.zext_or_trunc(bitw);
                if bitw > src_bitw {
                    known = known.with_known_zero_from(src_bitw);
                }
            }
            Opcode::Load => {
                if let Some(mem) = inst.mem()
                    && let Some(ranges) = &mem.ranges
                {
                    known = ranges.to_known_bits(bitw);
                }
            }
            Opcode::ZExtLoad => {
                // Everything above the fetched bits is zero.
                if let Some(mem) = inst.mem() {
                    known = known.with_known_zero_from(mem.bitw);
                }
            }
            Opcode::Shl | Opcode::LShr | Opcode::AShr => {
                let val = self.operand_reg(inst.operands(), 0);
                let amt = self.operand_reg(inst.operands(), 1);
                let amt_known = self.compute_known_bits(amt, demanded_elts, depth + 1);
                if amt_known.is_constant() {
                    let shift = amt_known.to_const().to_zero_ext_u64();
                    // An oversized shift is undefined: claim nothing.
                    if shift < u64::from(f.reg_scalar_bitw(val).unwrap()) {
                        let shift = shift as u32;
                        let val_known = self.compute_known_bits(val, demanded_elts, depth + 1);
                        known = match opcode {
                            Opcode::Shl => val_known.shl_by(shift),
                            Opcode::LShr => val_known.lshr_by(shift),
                            Opcode::AShr => val_known.ashr_by(shift),
                            _ => unreachable!(),
                        };
                    } else {
                        trace!("[{depth}] oversized shift amount {shift}");
                    }
                } else {
                    trace!("[{depth}] shift amount not a known constant");
                }
            }
            Opcode::Merge => {
                let part_bitw = inst.operands()[0]
                    .as_plain_reg()
                    .and_then(|p| f.reg_bitw(p))
                    .unwrap();
                for (i, operand) in inst.operands().iter().enumerate() {
                    let part = operand.as_plain_reg().expect("malformed merge");
                    let part_known = self.compute_known_bits(part, demanded_elts, depth + 1);
                    known = known.insert_bits(&part_known, u32::try_from(i).unwrap() * part_bitw);
                }
            }
            Opcode::Unmerge => {
                let src = self.operand_reg(inst.operands(), 0);
                if !f.reg_ty(src).is_some_and(|ty| ty.is_vector()) {
                    let src_known = self.compute_known_bits(src, demanded_elts, depth + 1);
                    let pos = u32::try_from(inst.def_position(vidx).unwrap()).unwrap();
                    known = src_known.extract_bits(bitw, bitw * pos);
                }
            }
            Opcode::BSwap => {
                let src = self.operand_reg(inst.operands(), 0);
                known = self
                    .compute_known_bits(src, demanded_elts, depth + 1)
                    .byte_swap();
            }
            Opcode::BitReverse => {
                let src = self.operand_reg(inst.operands(), 0);
                known = self
                    .compute_known_bits(src, demanded_elts, depth + 1)
                    .reverse_bits();
            }
            _ => {
                let tl = self.tl;
                tl.known_bits_for_target_instr(self, vidx, &mut known, demanded_elts, depth);
            }
        }

        assert!(!known.has_conflict(), "bits known to be one AND zero?");
        trace!(
            "[{depth}] {inst}: zero={:x} one={:x}",
            known.zeros().to_zero_ext_u64(),
            known.ones().to_zero_ext_u64()
        );

        // Overwrites the provisional entry in the phi case.
        self.cache.insert(vidx, known.clone());
        known
    }

    /// Known bits common to `a` and `b` (used for the two arms of a select).
    fn known_bits_min(
        &mut self,
        a: VRegIdx,
        b: VRegIdx,
        demanded_elts: &BitInt,
        depth: u32,
    ) -> KnownBits {
        // Test b first, since canonicalisation puts simpler expressions on
        // the RHS.
        let b_known = self.compute_known_bits(b, demanded_elts, depth);
        if b_known.is_unknown() {
            return b_known;
        }
        let a_known = self.compute_known_bits(a, demanded_elts, depth);
        a_known.intersect(&b_known)
    }

    /// A lower bound (>= 1) on the number of identical leading bits of
    /// `vidx`.
    pub fn num_sign_bits(&mut self, vidx: VRegIdx) -> u32 {
        let demanded_elts = self.demanded_for(vidx);
        self.num_sign_bits_in(vidx, &demanded_elts, 0)
    }

    /// As [Self::num_sign_bits], with a caller-supplied demanded-elements
    /// mask and starting depth.
    pub fn num_sign_bits_in(&mut self, vidx: VRegIdx, demanded_elts: &BitInt, depth: u32) -> u32 {
        let f = self.f;
        let inst = f.def_inst(vidx);
        let opcode = inst.opcode();

        if opcode == Opcode::IConst {
            let Operand::Const(val) = &inst.operands()[0] else {
                panic!("malformed iconst");
            };
            return val.num_sign_bits();
        }

        if depth >= self.max_depth {
            return 1;
        }

        if demanded_elts.is_zero() {
            return 1;
        }

        let Some(ty) = f.reg_ty(vidx) else {
            return 1;
        };
        let ty_bits = f.reg_scalar_bitw(vidx).unwrap();

        let mut first_answer = 1;
        match opcode {
            Opcode::Copy => {
                // As in the known-bits walk: free, but only through plain,
                // typed registers.
                match inst.operands()[0].as_plain_reg() {
                    Some(src) if f.reg_ty(src).is_some() => {
                        return self.num_sign_bits_in(src, demanded_elts, depth);
                    }
                    _ => return 1,
                }
            }
            Opcode::SExt => {
                let src = self.operand_reg(inst.operands(), 0);
                let src_bits = f.reg_scalar_bitw(src).unwrap();
                return self.num_sign_bits_in(src, demanded_elts, depth + 1) + (ty_bits - src_bits);
            }
            Opcode::SExtInReg => {
                // Max of the input and what this extends.
                let src = self.operand_reg(inst.operands(), 0);
                let Operand::Imm(src_bits) = inst.operands()[1] else {
                    panic!("malformed sext_inreg");
                };
                let in_reg_bits = ty_bits - u32::try_from(src_bits).unwrap() + 1;
                return self
                    .num_sign_bits_in(src, demanded_elts, depth + 1)
                    .max(in_reg_bits);
            }
            Opcode::SExtLoad => {
                // e.g. an i16 extended into an i32 has 17 known sign bits.
                if !ty.is_vector()
                    && let Some(mem) = inst.mem()
                {
                    return ty_bits - mem.bitw + 1;
                }
                return 1;
            }
            Opcode::ZExtLoad => {
                // e.g. an i16 extended into an i32 has 16 known sign bits.
                if !ty.is_vector()
                    && let Some(mem) = inst.mem()
                {
                    return (ty_bits - mem.bitw).max(1);
                }
                return 1;
            }
            Opcode::Trunc => {
                // If the source's sign bits reach below the truncation
                // point, the survivors are still sign bits.
                let src = self.operand_reg(inst.operands(), 0);
                let src_bits = f.reg_scalar_bitw(src).unwrap();
                let src_sign_bits = self.num_sign_bits_in(src, demanded_elts, depth + 1);
                if src_sign_bits > src_bits - ty_bits {
                    return src_sign_bits - (src_bits - ty_bits);
                }
            }
            Opcode::Select => {
                let tval = self.operand_reg(inst.operands(), 1);
                let fval = self.operand_reg(inst.operands(), 2);
                return self.num_sign_bits_min(tval, fval, demanded_elts, depth + 1);
            }
            _ => {
                let tl = self.tl;
                let n = tl.num_sign_bits_for_target_instr(self, vidx, demanded_elts, depth);
                if n > 1 {
                    first_answer = first_answer.max(n);
                }
            }
        }

        // Whatever the opcode told us, a run of known top bits is a run of
        // sign bits.
        let known = self.known_bits_in(vidx, demanded_elts, depth);
        let mask = if known.is_non_negative() {
            known.zeros().clone()
        } else if known.is_negative() {
            known.ones().clone()
        } else {
            return first_answer;
        };
        // The known-bits width can exceed the scalar width (vectors); line
        // the top lane's sign bit up before counting.
        let mask = mask.checked_shl(mask.bitw() - ty_bits).unwrap();
        first_answer.max(mask.leading_ones())
    }

    /// The smaller of the two arms' sign-bit counts.
    fn num_sign_bits_min(
        &mut self,
        a: VRegIdx,
        b: VRegIdx,
        demanded_elts: &BitInt,
        depth: u32,
    ) -> u32 {
        // Test b first, since canonicalisation puts simpler expressions on
        // the RHS.
        let b_bits = self.num_sign_bits_in(b, demanded_elts, depth);
        if b_bits == 1 {
            return 1;
        }
        self.num_sign_bits_in(a, demanded_elts, depth).min(b_bits)
    }

    /// A provable alignment of the (pointer) value in `vidx`.
    pub fn known_alignment(&mut self, vidx: VRegIdx, depth: u32) -> Align {
        let inst = self.f.def_inst(vidx);
        match inst.opcode() {
            Opcode::Copy => match inst.operands()[0].as_plain_reg() {
                Some(src) => self.known_alignment(src, depth),
                None => Align::ONE,
            },
            Opcode::FrameAddr => {
                let Operand::Frame(fidx) = inst.operands()[0] else {
                    panic!("malformed frame_addr");
                };
                self.f.frame().align(fidx)
            }
            _ => {
                let tl = self.tl;
                tl.known_align_for_target_instr(self, vidx, depth + 1)
            }
        }
    }

    /// The plain register at operand position `pos`.
    ///
    /// # Panics
    ///
    /// If the operand is not a whole-register use: the generic opcodes only
    /// take those.
    fn operand_reg(&self, operands: &[Operand], pos: usize) -> VRegIdx {
        match operands[pos].as_plain_reg() {
            Some(vidx) => vidx,
            None => panic!("operand {pos} is not a plain register: {}", operands[pos]),
        }
    }
}
