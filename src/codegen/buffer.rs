//! A growable byte buffer for emitted machine code, with forward-reference
//! patching for jumps whose target isn't known yet.
//!
//! Grounded on
//! `examples/other_examples/7531a88d_myuon-moca__src-jit-compiler_x86_64.rs.rs`'s
//! `CodeBuffer`/`JitCompiler::labels`/`forward_refs` fields.

use rustc_hash::FxHashMap;

use crate::plan::Label;

#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    /// Native byte offset each label was bound at, once known.
    labels: FxHashMap<Label, usize>,
    /// `(native_offset_of_rel32_field, label)` pairs recorded when a jump
    /// was emitted before its target label was bound.
    forward_refs: Vec<(usize, Label)>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn push_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn push_i32_le(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i64_le(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Overwrites a single already-written byte. Used to patch a ModRM
    /// reg-field extension (e.g. `/7` for `idiv`) after emitting the
    /// instruction through the generic reg-reg encoder.
    pub fn patch_byte(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    /// Binds `label` to the current write position. Every forward
    /// reference recorded against it is patched immediately.
    pub fn bind_label(&mut self, label: Label) {
        let here = self.bytes.len();
        self.labels.insert(label, here);
    }

    /// Records that the 4 bytes starting at `rel32_offset` must, once
    /// `label` is bound, hold `label_offset - (rel32_offset + 4)`.
    pub fn record_forward_ref(&mut self, rel32_offset: usize, label: Label) {
        self.forward_refs.push((rel32_offset, label));
    }

    /// Patches every recorded jump once all labels in the function have
    /// been bound. Must be called after the whole function body has been
    /// emitted.
    pub fn patch_forward_refs(&mut self) {
        for (rel32_offset, label) in &self.forward_refs {
            let target = *self.labels.get(label).expect("branch planner must bind every label it assigns");
            let rel = target as i64 - (*rel32_offset as i64 + 4);
            let rel = rel as i32;
            self.bytes[*rel32_offset..*rel32_offset + 4].copy_from_slice(&rel.to_le_bytes());
        }
        self.forward_refs.clear();
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jump_patches_to_correct_relative_offset() {
        let mut buf = CodeBuffer::new();
        let target = Label(0);
        buf.push_u8(0xE9); // jmp rel32
        let rel32_at = buf.len();
        buf.push_i32_le(0);
        buf.record_forward_ref(rel32_at, target);
        buf.push_u8(0x90); // nop padding
        buf.bind_label(target);
        buf.patch_forward_refs();
        let bytes = buf.into_bytes();
        let rel = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(rel, 1); // one nop byte between the end of the jmp and the label
    }
}
