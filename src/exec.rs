//! Per-IR-node execution (§4.4.1 reference emitter, component E).
//!
//! Grounded directly in the teacher's ALU/flag helpers (`cpu/mod.rs`:
//! `inc_u8`, `add_a`, `daa`, `rlc`/`rrc`/`rl`/`rr`/`sla`/`sra`/`swap`/`srl`,
//! `op_bit`) and its control-flow ops (`cpu/ops_control.rs`: conditional
//! JP/JR/CALL/RET, RST, DI/EI/HALT/STOP), ported from `Cpu`'s private `f`
//! byte onto `GuestState`'s `HostFlags` shadow and generalized from one
//! function per opcode to one function per `IrOpcode` tag operating on
//! decoded `Operand`s.

use crate::ir::{Condition, IrNode, IrOpcode, Operand, Reg16, Reg8};
use crate::memory::Bus;
use crate::state::GuestState;

fn read_reg8(r: Reg8, state: &GuestState, bus: &Bus) -> u8 {
    match r {
        Reg8::A => state.a,
        Reg8::B => state.b,
        Reg8::C => state.c,
        Reg8::D => state.d,
        Reg8::E => state.e,
        Reg8::H => state.h,
        Reg8::L => state.l,
        Reg8::MemHl => bus.read_byte(state.hl()),
    }
}

fn write_reg8(r: Reg8, value: u8, state: &mut GuestState, bus: &mut Bus) {
    match r {
        Reg8::A => state.a = value,
        Reg8::B => state.b = value,
        Reg8::C => state.c = value,
        Reg8::D => state.d = value,
        Reg8::E => state.e = value,
        Reg8::H => state.h = value,
        Reg8::L => state.l = value,
        Reg8::MemHl => bus.write_byte(state.hl(), value),
    }
}

fn read_reg16(r: Reg16, state: &GuestState) -> u16 {
    match r {
        Reg16::Bc => state.bc(),
        Reg16::De => state.de(),
        Reg16::Hl => state.hl(),
        Reg16::Sp => state.sp,
        Reg16::Af => state.af(),
    }
}

fn write_reg16(r: Reg16, value: u16, state: &mut GuestState) {
    match r {
        Reg16::Bc => state.set_bc(value),
        Reg16::De => state.set_de(value),
        Reg16::Hl => state.set_hl(value),
        Reg16::Sp => state.sp = value,
        Reg16::Af => state.set_af(value),
    }
}

fn read_operand(op: Operand, state: &GuestState, bus: &Bus) -> u8 {
    match op {
        Operand::Reg8(r) => read_reg8(r, state, bus),
        Operand::Imm8(v) => v,
        Operand::MemBc => bus.read_byte(state.bc()),
        Operand::MemDe => bus.read_byte(state.de()),
        Operand::MemHlInc => {
            let addr = state.hl();
            bus.read_byte(addr)
        }
        Operand::MemHlDec => {
            let addr = state.hl();
            bus.read_byte(addr)
        }
        Operand::MemImm16(addr) => bus.read_byte(addr),
        Operand::MemImm8(low) => bus.read_byte(0xFF00 | low as u16),
        Operand::MemC => bus.read_byte(0xFF00 | state.c as u16),
        _ => unreachable!("operand {:?} is not byte-readable", op),
    }
}

fn write_operand(op: Operand, value: u8, state: &mut GuestState, bus: &mut Bus) {
    match op {
        Operand::Reg8(r) => write_reg8(r, value, state, bus),
        Operand::MemBc => bus.write_byte(state.bc(), value),
        Operand::MemDe => bus.write_byte(state.de(), value),
        Operand::MemHlInc => {
            let addr = state.hl();
            bus.write_byte(addr, value);
        }
        Operand::MemHlDec => {
            let addr = state.hl();
            bus.write_byte(addr, value);
        }
        Operand::MemImm16(addr) => bus.write_byte(addr, value),
        Operand::MemImm8(low) => bus.write_byte(0xFF00 | low as u16, value),
        Operand::MemC => bus.write_byte(0xFF00 | state.c as u16, value),
        _ => unreachable!("operand {:?} is not byte-writable", op),
    }
}

/// Applies the `(HL+)`/`(HL-)` side effect after the byte transfer that used
/// it has already happened, matching the teacher's `op_ld_hli_a`-style split
/// between "read/write the byte" and "then bump HL".
fn apply_post_increment(op: Operand, state: &mut GuestState) {
    match op {
        Operand::MemHlInc => state.set_hl(state.hl().wrapping_add(1)),
        Operand::MemHlDec => state.set_hl(state.hl().wrapping_sub(1)),
        _ => {}
    }
}

fn push_word(value: u16, state: &mut GuestState, bus: &mut Bus) {
    state.sp = state.sp.wrapping_sub(1);
    bus.write_byte(state.sp, (value >> 8) as u8);
    state.sp = state.sp.wrapping_sub(1);
    bus.write_byte(state.sp, (value & 0xFF) as u8);
}

fn pop_word(state: &mut GuestState, bus: &mut Bus) -> u16 {
    let low = bus.read_byte(state.sp) as u16;
    state.sp = state.sp.wrapping_add(1);
    let high = bus.read_byte(state.sp) as u16;
    state.sp = state.sp.wrapping_add(1);
    (high << 8) | low
}

fn inc_u8(state: &mut GuestState, value: u8) -> u8 {
    let result = value.wrapping_add(1);
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = (value & 0x0F) == 0x0F;
    result
}

fn dec_u8(state: &mut GuestState, value: u8) -> u8 {
    let result = value.wrapping_sub(1);
    state.hflags.z = result == 0;
    state.f_subtract = true;
    state.hflags.h = (value & 0x0F) == 0x00;
    result
}

fn add_hl(state: &mut GuestState, value: u16) {
    let hl = state.hl();
    let (result, carry) = hl.overflowing_add(value);
    let half_carry = (hl & 0x0FFF) + (value & 0x0FFF) > 0x0FFF;
    state.set_hl(result);
    state.f_subtract = false;
    state.hflags.h = half_carry;
    state.hflags.c = carry;
}

fn add_sp_imm8(state: &GuestState, offset: i8) -> (u16, bool, bool) {
    let sp = state.sp;
    let value = offset as i16 as u16;
    let result = sp.wrapping_add(value);
    let half_carry = (sp & 0x000F) + (value & 0x000F) > 0x000F;
    let carry = (sp & 0x00FF) + (value & 0x00FF) > 0x00FF;
    (result, half_carry, carry)
}

fn add_a(state: &mut GuestState, value: u8, use_carry: bool) {
    let carry_in = if use_carry && state.hflags.c { 1 } else { 0 };
    let (res1, c1) = state.a.overflowing_add(value);
    let (result, c2) = res1.overflowing_add(carry_in);
    let half_carry = (state.a & 0x0F) + (value & 0x0F) + carry_in > 0x0F;
    state.a = result;
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = half_carry;
    state.hflags.c = c1 || c2;
}

fn sub_a(state: &mut GuestState, value: u8, use_carry: bool) {
    let carry_in = if use_carry && state.hflags.c { 1 } else { 0 };
    let (res1, b1) = state.a.overflowing_sub(value);
    let (result, b2) = res1.overflowing_sub(carry_in);
    let half_borrow = (state.a & 0x0F) < (value & 0x0F) + carry_in;
    state.a = result;
    state.hflags.z = result == 0;
    state.f_subtract = true;
    state.hflags.h = half_borrow;
    state.hflags.c = b1 || b2;
}

fn and_a(state: &mut GuestState, value: u8) {
    state.a &= value;
    state.hflags.z = state.a == 0;
    state.f_subtract = false;
    state.hflags.h = true;
    state.hflags.c = false;
}

fn xor_a(state: &mut GuestState, value: u8) {
    state.a ^= value;
    state.hflags.z = state.a == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = false;
}

fn or_a(state: &mut GuestState, value: u8) {
    state.a |= value;
    state.hflags.z = state.a == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = false;
}

fn cp_a(state: &mut GuestState, value: u8) {
    let saved = state.a;
    sub_a(state, value, false);
    state.a = saved;
}

fn rlc(state: &mut GuestState, value: u8) -> u8 {
    let carry = (value >> 7) & 1;
    let result = value.rotate_left(1);
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = carry != 0;
    result
}

fn rrc(state: &mut GuestState, value: u8) -> u8 {
    let carry = value & 1;
    let result = value.rotate_right(1);
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = carry != 0;
    result
}

fn rl(state: &mut GuestState, value: u8) -> u8 {
    let old_carry = state.hflags.c as u8;
    let new_carry = (value >> 7) & 1;
    let result = (value << 1) | old_carry;
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = new_carry != 0;
    result
}

fn rr(state: &mut GuestState, value: u8) -> u8 {
    let old_carry = state.hflags.c as u8;
    let new_carry = value & 1;
    let result = (value >> 1) | (old_carry << 7);
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = new_carry != 0;
    result
}

fn sla(state: &mut GuestState, value: u8) -> u8 {
    let carry = (value >> 7) & 1;
    let result = value << 1;
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = carry != 0;
    result
}

fn sra(state: &mut GuestState, value: u8) -> u8 {
    let carry = value & 1;
    let result = (value >> 1) | (value & 0x80);
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = carry != 0;
    result
}

fn swap(state: &mut GuestState, value: u8) -> u8 {
    let result = value.rotate_left(4);
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = false;
    result
}

fn srl(state: &mut GuestState, value: u8) -> u8 {
    let carry = value & 1;
    let result = value >> 1;
    state.hflags.z = result == 0;
    state.f_subtract = false;
    state.hflags.h = false;
    state.hflags.c = carry != 0;
    result
}

fn bit_test(state: &mut GuestState, bit: u8, value: u8) {
    state.hflags.z = (value >> bit) & 1 == 0;
    state.f_subtract = false;
    state.hflags.h = true;
}

fn daa(state: &mut GuestState) {
    let mut adjustment = 0u8;
    let mut set_carry = false;
    if !state.f_subtract {
        if state.hflags.c || state.a > 0x99 {
            adjustment |= 0x60;
            set_carry = true;
        }
        if state.hflags.h || (state.a & 0x0F) > 0x09 {
            adjustment |= 0x06;
        }
        state.a = state.a.wrapping_add(adjustment);
    } else {
        if state.hflags.c {
            adjustment |= 0x60;
            set_carry = true;
        }
        if state.hflags.h {
            adjustment |= 0x06;
        }
        state.a = state.a.wrapping_sub(adjustment);
    }
    state.hflags.z = state.a == 0;
    state.hflags.h = false;
    state.hflags.c = set_carry;
}

fn cond_holds(c: Condition, state: &GuestState) -> bool {
    c.holds(state.hflags.z, state.hflags.c)
}

/// Runs one already-decoded guest instruction against live state. Returns
/// the actual T-cycle cost (resolving taken/not-taken where the node has a
/// `cycles_branch`). Control-flow nodes set `state.pc` themselves; the
/// caller advances `state.pc` by `node.length` for everything else.
pub fn execute(node: &IrNode, state: &mut GuestState, bus: &mut Bus) -> u8 {
    use IrOpcode::*;
    match node.opcode {
        Nop => node.cycles,
        Stop => {
            state.pc = node.next_address();
            node.cycles
        }
        Halt => {
            state.halt = crate::state::HaltState::Halt;
            state.pc = node.next_address();
            node.cycles
        }
        Di => {
            state.ime = false;
            node.cycles
        }
        Ei => {
            // EI's enable takes effect after the *next* instruction on real
            // hardware; the dispatcher applies that one-instruction delay.
            state.halt_arg = 1;
            node.cycles
        }

        Ld8 => {
            let value = read_operand(node.op2, state, bus);
            write_operand(node.op1, value, state, bus);
            apply_post_increment(node.op1, state);
            apply_post_increment(node.op2, state);
            node.cycles
        }
        Ld16 => {
            let value = match node.op2 {
                Operand::Imm16(v) => v,
                Operand::Reg16(r) => read_reg16(r, state),
                other => unreachable!("Ld16 source {:?}", other),
            };
            if let Operand::Reg16(dst) = node.op1 {
                write_reg16(dst, value, state);
            }
            node.cycles
        }
        LdMemSp => {
            if let (Operand::MemImm16(addr), Operand::Reg16(Reg16::Sp)) = (node.op1, node.op2) {
                bus.write_byte(addr, (state.sp & 0xFF) as u8);
                bus.write_byte(addr.wrapping_add(1), (state.sp >> 8) as u8);
            }
            node.cycles
        }
        LdHlSpImm8 => {
            if let Operand::SpPlusImm8(offset) = node.op2 {
                let (result, h, c) = add_sp_imm8(state, offset);
                state.set_hl(result);
                state.hflags.z = false;
                state.f_subtract = false;
                state.hflags.h = h;
                state.hflags.c = c;
            }
            node.cycles
        }

        Inc8 => {
            if let Operand::Reg8(r) = node.op1 {
                let v = read_reg8(r, state, bus);
                let result = inc_u8(state, v);
                write_reg8(r, result, state, bus);
            }
            node.cycles
        }
        Dec8 => {
            if let Operand::Reg8(r) = node.op1 {
                let v = read_reg8(r, state, bus);
                let result = dec_u8(state, v);
                write_reg8(r, result, state, bus);
            }
            node.cycles
        }
        Inc16 => {
            if let Operand::Reg16(r) = node.op1 {
                write_reg16(r, read_reg16(r, state).wrapping_add(1), state);
            }
            node.cycles
        }
        Dec16 => {
            if let Operand::Reg16(r) = node.op1 {
                write_reg16(r, read_reg16(r, state).wrapping_sub(1), state);
            }
            node.cycles
        }
        AddHl16 => {
            if let Operand::Reg16(r) = node.op2 {
                add_hl(state, read_reg16(r, state));
            }
            node.cycles
        }
        AddSpImm8 => {
            if let Operand::RelImm8(offset) = node.op2 {
                let (result, h, c) = add_sp_imm8(state, offset);
                state.sp = result;
                state.hflags.z = false;
                state.f_subtract = false;
                state.hflags.h = h;
                state.hflags.c = c;
            }
            node.cycles
        }

        Add | Adc | Sub | Sbc | And | Xor | Or | Cp => {
            let value = read_operand(node.op2, state, bus);
            match node.opcode {
                Add => add_a(state, value, false),
                Adc => add_a(state, value, true),
                Sub => sub_a(state, value, false),
                Sbc => sub_a(state, value, true),
                And => and_a(state, value),
                Xor => xor_a(state, value),
                Or => or_a(state, value),
                Cp => cp_a(state, value),
                _ => unreachable!(),
            }
            node.cycles
        }

        Rlca => {
            state.a = rlc(state, state.a);
            state.hflags.z = false;
            node.cycles
        }
        Rrca => {
            state.a = rrc(state, state.a);
            state.hflags.z = false;
            node.cycles
        }
        Rla => {
            state.a = rl(state, state.a);
            state.hflags.z = false;
            node.cycles
        }
        Rra => {
            state.a = rr(state, state.a);
            state.hflags.z = false;
            node.cycles
        }
        Daa => {
            daa(state);
            node.cycles
        }
        Cpl => {
            state.a = !state.a;
            state.f_subtract = true;
            state.hflags.h = true;
            node.cycles
        }
        Scf => {
            state.f_subtract = false;
            state.hflags.h = false;
            state.hflags.c = true;
            node.cycles
        }
        Ccf => {
            state.f_subtract = false;
            state.hflags.h = false;
            state.hflags.c = !state.hflags.c;
            node.cycles
        }

        Jr => {
            let (cond, offset) = match (node.op1, node.op2) {
                (Operand::RelImm8(o), Operand::None) => (true, o),
                (Operand::Cond(c), Operand::RelImm8(o)) => (cond_holds(c, state), o),
                other => unreachable!("Jr operands {:?}", other),
            };
            let not_taken_pc = node.next_address();
            if cond {
                state.pc = not_taken_pc.wrapping_add(offset as i16 as u16);
                node.cycles_branch.unwrap_or(node.cycles)
            } else {
                state.pc = not_taken_pc;
                node.cycles
            }
        }
        Jp => {
            let (cond, target) = match (node.op1, node.op2) {
                (Operand::Imm16(addr), Operand::None) => (true, addr),
                (Operand::Cond(c), Operand::Imm16(addr)) => (cond_holds(c, state), addr),
                other => unreachable!("Jp operands {:?}", other),
            };
            if cond {
                state.pc = target;
                node.cycles_branch.unwrap_or(node.cycles)
            } else {
                state.pc = node.next_address();
                node.cycles
            }
        }
        JpHl => {
            state.pc = state.hl();
            node.cycles
        }
        Call => {
            let (cond, target) = match (node.op1, node.op2) {
                (Operand::Imm16(addr), Operand::None) => (true, addr),
                (Operand::Cond(c), Operand::Imm16(addr)) => (cond_holds(c, state), addr),
                other => unreachable!("Call operands {:?}", other),
            };
            let return_pc = node.next_address();
            if cond {
                push_word(return_pc, state, bus);
                state.pc = target;
                state.trap_reason = crate::state::trap_reason::CALL;
                node.cycles_branch.unwrap_or(node.cycles)
            } else {
                state.pc = return_pc;
                node.cycles
            }
        }
        Ret => {
            let cond = match node.op1 {
                Operand::None => true,
                Operand::Cond(c) => cond_holds(c, state),
                other => unreachable!("Ret operand {:?}", other),
            };
            if cond {
                state.pc = pop_word(state, bus);
                state.trap_reason = crate::state::trap_reason::RET;
                node.cycles_branch.unwrap_or(node.cycles)
            } else {
                state.pc = node.next_address();
                node.cycles
            }
        }
        Reti => {
            state.pc = pop_word(state, bus);
            state.ime = true;
            state.trap_reason = crate::state::trap_reason::RET;
            node.cycles
        }
        RstOp => {
            if let Operand::RstVec(vector) = node.op1 {
                push_word(node.next_address(), state, bus);
                state.pc = vector as u16;
                state.trap_reason = crate::state::trap_reason::RST;
            }
            node.cycles
        }

        Push => {
            if let Operand::Reg16(r) = node.op1 {
                push_word(read_reg16(r, state), state, bus);
            }
            node.cycles
        }
        Pop => {
            if let Operand::Reg16(r) = node.op1 {
                let value = pop_word(state, bus);
                write_reg16(r, value, state);
            }
            node.cycles
        }

        Rlc | Rrc | Rl | Rr | Sla | Sra | Swap | Srl => {
            if let Operand::Reg8(r) = node.op1 {
                let v = read_reg8(r, state, bus);
                let result = match node.opcode {
                    Rlc => rlc(state, v),
                    Rrc => rrc(state, v),
                    Rl => rl(state, v),
                    Rr => rr(state, v),
                    Sla => sla(state, v),
                    Sra => sra(state, v),
                    Swap => swap(state, v),
                    Srl => srl(state, v),
                    _ => unreachable!(),
                };
                write_reg8(r, result, state, bus);
            }
            node.cycles
        }
        BitOp => {
            if let (Operand::Bit(bit), Operand::Reg8(r)) = (node.op1, node.op2) {
                let v = read_reg8(r, state, bus);
                bit_test(state, bit, v);
            }
            node.cycles
        }
        ResOp => {
            if let (Operand::Bit(bit), Operand::Reg8(r)) = (node.op1, node.op2) {
                let v = read_reg8(r, state, bus);
                write_reg8(r, v & !(1 << bit), state, bus);
            }
            node.cycles
        }
        SetOp => {
            if let (Operand::Bit(bit), Operand::Reg8(r)) = (node.op1, node.op2) {
                let v = read_reg8(r, state, bus);
                write_reg8(r, v | (1 << bit), state, bus);
            }
            node.cycles
        }

        Invalid => unreachable!("Invalid nodes never reach execute"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrNode, IrOpcode, Operand, Reg8};

    fn fresh() -> (GuestState, Bus) {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00;
        (GuestState::new_at_boot_rom(), Bus::new(rom).unwrap())
    }

    #[test]
    fn daa_after_bcd_add_corrects_to_decimal() {
        let (mut state, mut bus) = fresh();
        state.a = 0x45;
        let node = IrNode::new(IrOpcode::Add, 0, 1, 4).with_ops(Operand::Reg8(Reg8::A), Operand::Reg8(Reg8::B));
        state.b = 0x38;
        execute(&node, &mut state, &mut bus);
        let daa_node = IrNode::new(IrOpcode::Daa, 1, 1, 4);
        execute(&daa_node, &mut state, &mut bus);
        assert_eq!(state.a, 0x83);
    }

    #[test]
    fn conditional_jr_not_taken_advances_sequentially() {
        let (mut state, mut bus) = fresh();
        state.hflags.z = false;
        let node = IrNode::new(IrOpcode::Jr, 0x100, 2, 8)
            .with_ops(Operand::Cond(Condition::Z), Operand::RelImm8(-5))
            .with_branch_cycles(12);
        let cycles = execute(&node, &mut state, &mut bus);
        assert_eq!(cycles, 8);
        assert_eq!(state.pc, 0x102);
    }

    #[test]
    fn call_then_ret_round_trips_pc() {
        let (mut state, mut bus) = fresh();
        state.pc = 0x0200;
        state.sp = 0xFFFE;
        let call = IrNode::new(IrOpcode::Call, 0x0200, 3, 24).with_ops(Operand::Imm16(0x0400), Operand::None);
        execute(&call, &mut state, &mut bus);
        assert_eq!(state.pc, 0x0400);
        let ret = IrNode::new(IrOpcode::Ret, 0x0400, 1, 16);
        execute(&ret, &mut state, &mut bus);
        assert_eq!(state.pc, 0x0203);
    }

    #[test]
    fn bit_test_sets_zero_without_touching_register() {
        let (mut state, mut bus) = fresh();
        state.h = 0x00;
        let node = IrNode::new(IrOpcode::BitOp, 0, 2, 8).with_ops(Operand::Bit(7), Operand::Reg8(Reg8::H));
        execute(&node, &mut state, &mut bus);
        assert!(state.hflags.z);
        assert_eq!(state.h, 0x00);
    }
}
