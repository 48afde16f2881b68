//! Known-bits analysis for an SSA-form machine IR.
//!
//! For each virtual register in a [mir::Func], [analysis::KnownBitsAnalysis]
//! computes a [known_bits::KnownBits]: two equal-width masks recording which
//! bit positions of the value are provably zero and provably one. A
//! companion query bounds the number of leading sign bits, and a third
//! derives pointer alignments.
//!
//! The crate splits into two layers. [known_bits] is the pure algebra:
//! bitwise and arithmetic combinators over abstract values, with no notion
//! of an instruction. [analysis] walks the SSA graph of a [mir::Func],
//! dispatching per opcode and combining operand results with the algebra;
//! opcodes it does not know are referred to a target oracle
//! ([analysis::TargetLowering]). Both are carried by [bitint::BitInt], an
//! integer of dynamic bit width.
//!
//! ```
//! use mirbits::{
//!     analysis::{KnownBitsAnalysis, NoTarget},
//!     bitint::BitInt,
//!     mir::{DataLayout, Func, Inst, Opcode, Ty},
//! };
//!
//! let mut f = Func::new("example", DataLayout::default());
//! let x = f.new_vreg(Ty::Int(8));
//! f.push(Inst::implicit_def(x)).unwrap();
//! let c = f.new_vreg(Ty::Int(8));
//! f.push(Inst::iconst(c, BitInt::from_u64(8, 0b1100))).unwrap();
//! let d = f.new_vreg(Ty::Int(8));
//! f.push(Inst::binary(Opcode::And, d, x, c)).unwrap();
//!
//! let mut an = KnownBitsAnalysis::new(&f, &NoTarget);
//! // Whatever x is, the AND mask forces all but bits 2 and 3 to zero.
//! assert_eq!(an.known_zeros(d).to_zero_ext_u64(), 0b1111_0011);
//! ```

pub mod analysis;
pub mod bitint;
pub mod known_bits;
pub mod mir;

pub use analysis::{KnownBitsAnalysis, NoTarget, TargetLowering};
pub use bitint::BitInt;
pub use known_bits::KnownBits;
