//! The JIT boundary (§6, §9): a trait the interpreter could hand hot
//! translation units to, plus a reference implementation that declines
//! every offer and falls back to the interpreter. No code generation is
//! implemented here - this crate only fixes the shape of the interface a
//! real backend would have to satisfy.

#![forbid(unsafe_code)]

use rv_cpu_core::CpuCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation unit starting at {start_pc:#x} could not be completed: {reason}")]
    Incomplete { start_pc: u64, reason: String },
}

/// What a [`JitBackend`] did with one translation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationOutcome {
    /// The backend ran native code for one or more instructions and the
    /// hart's state (registers, PC, memory) already reflects the result.
    /// The interpreter should resume fetching at `end_pc`.
    Completed { end_pc: u64 },
    /// The backend declined this PC (cold, unsupported instruction,
    /// backend disabled); the interpreter should execute it itself.
    NotTranslated,
}

/// A translation-unit boundary begins at the current PC and ends at the
/// first control-transfer instruction (branch, jump, trap-capable
/// instruction, or a CSR write that could change dispatch) - see §9. A
/// backend gets a mutable reference to the live [`CpuCore`] (the "register
/// file pointer" of §6) so fallback callbacks for un-JITed instructions
/// (`ECALL`, `MRET`, CSR access, atomics, FP, compressed FP) can simply
/// call back into [`rv_cpu_core::execute::dispatch`] with the same state.
pub trait JitBackend {
    /// Offer the backend a chance to run native code starting at
    /// `cpu.pc`. Implementations that have no translation cached for this
    /// PC return `Ok(TranslationOutcome::NotTranslated)` without touching
    /// `cpu`.
    fn translate_unit(&mut self, cpu: &mut CpuCore) -> Result<TranslationOutcome, TranslationError>;

    /// Drop any cached translations whose code could now be stale (after
    /// a kernel image reload or `SFENCE.VMA`, for instance).
    fn invalidate(&mut self) {}
}

/// The reference backend: never translates. Exists so the interpreter's
/// tick loop can unconditionally hold a `Box<dyn JitBackend>` without a
/// special case for "no JIT configured".
#[derive(Debug, Default)]
pub struct NoOpJit;

impl JitBackend for NoOpJit {
    fn translate_unit(&mut self, _cpu: &mut CpuCore) -> Result<TranslationOutcome, TranslationError> {
        Ok(TranslationOutcome::NotTranslated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_backend_always_declines() {
        let mut cpu = CpuCore::new(0x1000, None);
        let mut jit = NoOpJit;
        let pc_before = cpu.pc;
        let outcome = jit.translate_unit(&mut cpu).unwrap();
        assert_eq!(outcome, TranslationOutcome::NotTranslated);
        assert_eq!(cpu.pc, pc_before);
    }
}
