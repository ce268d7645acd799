//! Peephole optimization passes (§4.4, component D).
//!
//! The teacher has nothing analogous -- a tree-walking interpreter has no
//! compiled block to rewrite. These passes run over a freshly decoded
//! `BasicBlock` before it's handed to the emitter, scaled by `opt_level`
//! (0 disables everything, higher levels enable progressively more
//! aggressive rewrites per §4.4).
//!
//! Implements the self-loop/busy-wait family (generic spin, LY-wait,
//! STAT-mode-3-wait, joypad-poll) as one structural rule: a block whose last
//! node branches back to its own start, with no persistent writes in
//! between, classified by which I/O register it polls. This subsumes the
//! literal byte patterns for rules 2 and 3 (`LDH A,(n)` resolves to the same
//! polled address as the 3-byte `LD A,(nn)` form) without requiring an exact
//! instruction count or operand match. Two rules from the named family are
//! *not* implemented (see DESIGN.md): the block memcpy fuse, since this
//! emitter replays IR nodes directly rather than generating host code a copy
//! loop could be fused into; and the joypad double-poll collapse, which is
//! straight-line dead-code elimination rather than a loop shape and so has
//! no counterpart in a classifier keyed on backward branches.

use crate::ir::{BasicBlock, IrOpcode, Operand, SpinKind};
use crate::memory::map::{LY_ADDR, P1_JOYP_ADDR, STAT_ADDR};

pub fn optimize(mut block: BasicBlock, opt_level: u8) -> BasicBlock {
    if opt_level == 0 {
        return block;
    }
    block.spin = classify_spin(&block);
    block
}

/// A block is a busy-wait candidate if its last node branches back to its
/// own start and nothing in between performs a write the scheduler or
/// another thread could observe (§4.4 P4-adjacent invariant: never elide a
/// persistent write). Conservative by construction -- any node this can't
/// prove side-effect-free keeps the block as `SpinKind::None`.
fn classify_spin(block: &BasicBlock) -> SpinKind {
    let Some(last) = block.nodes.last() else {
        return SpinKind::None;
    };
    if !matches!(last.opcode, IrOpcode::Jr | IrOpcode::Jp) {
        return SpinKind::None;
    }
    let target = branch_target(last);
    if target != Some(block.start) {
        return SpinKind::None;
    }
    if block.nodes.iter().any(|n| n.flags.persistent_write) {
        return SpinKind::None;
    }

    // Covers both `LD A,(nn)` (MemImm16) and the `LDH A,(n)` short form
    // (MemImm8, implicitly `0xFF00 + n`) -- rules 2/3 are specified against
    // the LDH encoding (`F0 41 E6 03 20 FA`, `F0 44 FE ?? 20 FA`).
    let reads_addr = |addr: u16| {
        block.nodes.iter().any(|n| {
            matches!(n.op1, Operand::MemImm16(a) if a == addr)
                || matches!(n.op2, Operand::MemImm16(a) if a == addr)
                || matches!(n.op1, Operand::MemImm8(a) if 0xFF00 + a as u16 == addr)
                || matches!(n.op2, Operand::MemImm8(a) if 0xFF00 + a as u16 == addr)
        })
    };
    if reads_addr(LY_ADDR) {
        SpinKind::WaitLy
    } else if reads_addr(STAT_ADDR) {
        SpinKind::WaitStat3
    } else if reads_addr(P1_JOYP_ADDR)
        || block
            .nodes
            .iter()
            .any(|n| matches!(n.op1, Operand::MemC) || matches!(n.op2, Operand::MemC))
    {
        SpinKind::Joypad
    } else {
        SpinKind::Generic
    }
}

fn branch_target(node: &crate::ir::IrNode) -> Option<u16> {
    match node.opcode {
        IrOpcode::Jp => match (node.op1, node.op2) {
            (Operand::Imm16(addr), Operand::None) => Some(addr),
            (Operand::Cond(_), Operand::Imm16(addr)) => Some(addr),
            _ => None,
        },
        IrOpcode::Jr => {
            let (offset, from) = match (node.op1, node.op2) {
                (Operand::RelImm8(o), Operand::None) => (o, node.next_address()),
                (Operand::Cond(_), Operand::RelImm8(o)) => (o, node.next_address()),
                _ => return None,
            };
            Some(from.wrapping_add(offset as i16 as u16))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_block;

    #[test]
    fn detects_wait_for_ly_spin() {
        // LD A, (LY_ADDR=FF44) ; CP 0x90 ; JR NZ, -5 (back to start)
        let rom: Vec<u8> = vec![0xFA, 0x44, 0xFF, 0xFE, 0x90, 0x20, 0xF9];
        let read = |a: u16| rom.get(a as usize).copied().unwrap_or(0);
        let block = decode_block(&read, 0).unwrap();
        let block = optimize(block, 2);
        assert_eq!(block.spin, SpinKind::WaitLy);
    }

    #[test]
    fn non_looping_block_is_not_a_spin() {
        let rom: Vec<u8> = vec![0x00, 0x00, 0xC3, 0x10, 0x00];
        let read = |a: u16| rom.get(a as usize).copied().unwrap_or(0);
        let block = decode_block(&read, 0).unwrap();
        let block = optimize(block, 2);
        assert_eq!(block.spin, SpinKind::None);
    }

    #[test]
    fn opt_level_zero_never_classifies() {
        let rom: Vec<u8> = vec![0xFA, 0x44, 0xFF, 0xFE, 0x90, 0x20, 0xF9];
        let read = |a: u16| rom.get(a as usize).copied().unwrap_or(0);
        let block = decode_block(&read, 0).unwrap();
        let block = optimize(block, 0);
        assert_eq!(block.spin, SpinKind::None);
    }

    #[test]
    fn opt_level_one_also_classifies_spins() {
        // Rule 5 carries no "level >= 2" exception; level 1 must already
        // recognize the same wait-for-LY loop as level 2/3.
        let rom: Vec<u8> = vec![0xFA, 0x44, 0xFF, 0xFE, 0x90, 0x20, 0xF9];
        let read = |a: u16| rom.get(a as usize).copied().unwrap_or(0);
        let block = decode_block(&read, 0).unwrap();
        let block = optimize(block, 1);
        assert_eq!(block.spin, SpinKind::WaitLy);
    }

    #[test]
    fn detects_ldh_wait_for_ly_spin() {
        // LDH A,(0x44) ; CP ?? ; JR NZ,-6 -- the literal rule 3 pattern.
        let rom: Vec<u8> = vec![0xF0, 0x44, 0xFE, 0x90, 0x20, 0xFA];
        let read = |a: u16| rom.get(a as usize).copied().unwrap_or(0);
        let block = decode_block(&read, 0).unwrap();
        let block = optimize(block, 1);
        assert_eq!(block.spin, SpinKind::WaitLy);
    }

    #[test]
    fn detects_ldh_wait_for_stat3_spin() {
        // LDH A,(0x41) ; AND 3 ; JR NZ,-6 -- the literal rule 2 pattern.
        let rom: Vec<u8> = vec![0xF0, 0x41, 0xE6, 0x03, 0x20, 0xFA];
        let read = |a: u16| rom.get(a as usize).copied().unwrap_or(0);
        let block = decode_block(&read, 0).unwrap();
        let block = optimize(block, 1);
        assert_eq!(block.spin, SpinKind::WaitStat3);
    }
}
