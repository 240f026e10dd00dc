use super::table::Builder;
use super::{Isa, IsaKind, OpcodeFlags as F, OpcodeTable, Operands as O, ScriptLayout, SwitchForm};
use once_cell::sync::Lazy;

/// `CALL_0` to `CALL_F` each reach one 64 KiB bank of code.
const CALL_BANKS: u8 = 16;

pub struct Rdr2 {
    table: OpcodeTable,
}

static STORAGE: Lazy<Rdr2> = Lazy::new(Rdr2::new);

impl Rdr2 {
    pub fn get() -> &'static Rdr2 {
        &STORAGE
    }

    fn new() -> Self {
        let mut builder = Builder::new();
        gen_alu(&mut builder);
        gen_stack(&mut builder);
        gen_mem(&mut builder);
        gen_ctl(&mut builder);
        gen_text(&mut builder);
        gen_unknown(&mut builder);
        Rdr2 {
            table: builder.build(),
        }
    }
}

impl Isa for Rdr2 {
    fn kind(&self) -> IsaKind {
        IsaKind::Rdr2
    }

    fn table(&self) -> &OpcodeTable {
        &self.table
    }

    fn layout(&self) -> ScriptLayout {
        ScriptLayout {
            paged_code: true,
            string_table: false,
            native_table: true,
            rotated_natives: false,
        }
    }
}

fn gen_alu(b: &mut Builder) {
    const PLAIN: [&str; 36] = [
        "IADD", "ISUB", "IMUL", "IDIV", "IMOD", "INOT", "INEG", "IEQ", "INE", "IGT", "IGE", "ILT",
        "ILE", "FADD", "FSUB", "FMUL", "FDIV", "FMOD", "FNEG", "FEQ", "FNE", "FGT", "FGE", "FLT",
        "FLE", "VADD", "VSUB", "VMUL", "VDIV", "VNEG", "IAND", "IOR", "IXOR", "I2F", "F2I", "F2V",
    ];

    b.register(0x00, "NOP", O::None, F::NOP);
    for (i, &mnemonic) in PLAIN.iter().enumerate() {
        b.register(0x01 + i as u8, mnemonic, O::None, F::empty());
    }

    b.register(0x3D, "IADD_U8", O::U8, F::empty())
        .register(0x40, "IMUL_U8", O::U8, F::empty())
        .register(0x42, "IADD_S16", O::S16, F::empty())
        .register(0x45, "IMUL_S16", O::S16, F::empty());
}

fn gen_stack(b: &mut Builder) {
    const SMALL_INTS: [&str; 9] = [
        "PUSH_CONST_M1", "PUSH_CONST_0", "PUSH_CONST_1", "PUSH_CONST_2", "PUSH_CONST_3",
        "PUSH_CONST_4", "PUSH_CONST_5", "PUSH_CONST_6", "PUSH_CONST_7",
    ];
    const SMALL_FLOATS: [&str; 9] = [
        "PUSH_CONST_FM1", "PUSH_CONST_F0", "PUSH_CONST_F1", "PUSH_CONST_F2", "PUSH_CONST_F3",
        "PUSH_CONST_F4", "PUSH_CONST_F5", "PUSH_CONST_F6", "PUSH_CONST_F7",
    ];

    b.register(0x25, "PUSH_CONST_U8", O::U8, F::PUSH_CONST)
        .register(0x26, "PUSH_CONST_U8_U8", O::U8x2, F::empty())
        .register(0x27, "PUSH_CONST_U8_U8_U8", O::U8x3, F::empty())
        .register(0x28, "PUSH_CONST_U32", O::U32, F::PUSH_CONST)
        .register(0x29, "PUSH_CONST_F", O::F32, F::empty())
        .register(0x2A, "DUP", O::None, F::empty())
        .register(0x2B, "DROP", O::None, F::empty())
        .register(0x41, "PUSH_CONST_S16", O::S16, F::PUSH_CONST)
        .register(0x6D, "PUSH_CONST_U24", O::U24, F::PUSH_CONST)
        .register(0x71, "NULL", O::None, F::empty());

    for (i, &mnemonic) in SMALL_INTS.iter().enumerate() {
        b.register(0x8A + i as u8, mnemonic, O::None, F::empty());
    }
    for (i, &mnemonic) in SMALL_FLOATS.iter().enumerate() {
        b.register(0x93 + i as u8, mnemonic, O::None, F::empty());
    }
}

fn gen_mem(b: &mut Builder) {
    b.register(0x2F, "LOAD", O::None, F::empty())
        .register(0x30, "STORE", O::None, F::empty())
        .register(0x31, "STORE_REV", O::None, F::empty())
        .register(0x32, "LOAD_N", O::None, F::empty())
        .register(0x33, "STORE_N", O::None, F::empty())
        .register(0x3E, "IOFFSET_U8_LOAD", O::U8, F::empty())
        .register(0x3F, "IOFFSET_U8_STORE", O::U8, F::empty())
        .register(0x43, "IOFFSET_S16_LOAD", O::S16, F::empty())
        .register(0x44, "IOFFSET_S16_STORE", O::S16, F::empty());

    let modes: [(u8, &[&'static str; 3], O, F); 8] = [
        (0x34, &["ARRAY_U8", "ARRAY_U8_LOAD", "ARRAY_U8_STORE"], O::U8, F::empty()),
        (0x37, &["LOCAL_U8", "LOCAL_U8_LOAD", "LOCAL_U8_STORE"], O::U8, F::empty()),
        (0x3A, &["STATIC_U8", "STATIC_U8_LOAD", "STATIC_U8_STORE"], O::U8, F::STATIC),
        (0x46, &["ARRAY_U16", "ARRAY_U16_LOAD", "ARRAY_U16_STORE"], O::U16, F::empty()),
        (0x49, &["LOCAL_U16", "LOCAL_U16_LOAD", "LOCAL_U16_STORE"], O::U16, F::empty()),
        (0x4C, &["STATIC_U16", "STATIC_U16_LOAD", "STATIC_U16_STORE"], O::U16, F::STATIC),
        (0x4F, &["GLOBAL_U16", "GLOBAL_U16_LOAD", "GLOBAL_U16_STORE"], O::U16, F::GLOBAL),
        (0x6A, &["GLOBAL_U24", "GLOBAL_U24_LOAD", "GLOBAL_U24_STORE"], O::U24, F::GLOBAL),
    ];
    for &(base, mnemonics, operands, flags) in modes.iter() {
        for (i, &mnemonic) in mnemonics.iter().enumerate() {
            b.register(base + i as u8, mnemonic, operands, flags);
        }
    }
}

fn gen_ctl(b: &mut Builder) {
    const JUMPS: [&str; 8] = [
        "J", "JZ", "IEQ_JZ", "INE_JZ", "IGT_JZ", "IGE_JZ", "ILT_JZ", "ILE_JZ",
    ];

    b.register(0x2C, "NATIVE", O::NativePacked, F::empty())
        .register(0x2D, "ENTER", O::Enter { named: true }, F::ENTER)
        .register(0x2E, "LEAVE", O::U8x2, F::LEAVE | F::CONTROL_FLOW);

    for bank in 0..CALL_BANKS {
        let mnemonic = format!("CALL_{:X}", bank);
        b.register(
            0x52 + bank,
            Box::leak(mnemonic.into_boxed_str()),
            O::CallBank(bank),
            F::CALL | F::CONTROL_FLOW,
        );
    }
    for (i, &mnemonic) in JUMPS.iter().enumerate() {
        b.register(0x62 + i as u8, mnemonic, O::Rel16, F::JUMP | F::CONTROL_FLOW);
    }

    b.register(
        0x6E,
        "SWITCH",
        O::Switch(SwitchForm::Relative16),
        F::SWITCH | F::CONTROL_FLOW,
    )
    .register(0x77, "CATCH", O::None, F::empty())
    .register(0x78, "THROW", O::None, F::CONTROL_FLOW)
    .register(
        0x79,
        "CALLINDIRECT",
        O::None,
        F::CALL_INDIRECT | F::CONTROL_FLOW,
    );

    // LEAVE_<params>_<returns>
    for params in 0..4u8 {
        for returns in 0..4u8 {
            let mnemonic = format!("LEAVE_{}_{}", params, returns);
            b.register(
                0x7A + params * 4 + returns,
                Box::leak(mnemonic.into_boxed_str()),
                O::None,
                F::LEAVE | F::CONTROL_FLOW,
            );
        }
    }
}

fn gen_text(b: &mut Builder) {
    b.register(0x6F, "STRING", O::InlineString, F::empty())
        .register(0x70, "STRING_U32", O::InlineStringU32, F::empty())
        .register(0x72, "TEXT_LABEL_ASSIGN_STRING", O::U8, F::empty())
        .register(0x73, "TEXT_LABEL_ASSIGN_INT", O::U8, F::empty())
        .register(0x74, "TEXT_LABEL_APPEND_STRING", O::U8, F::empty())
        .register(0x75, "TEXT_LABEL_APPEND_INT", O::U8, F::empty())
        .register(0x76, "TEXT_LABEL_COPY", O::None, F::empty());
}

/// Single-byte opcodes the VM accepts but whose meaning is unknown.
fn gen_unknown(b: &mut Builder) {
    for opcode in 0x9C..=0xAEu8 {
        let mnemonic = format!("__UNK_{:02X}", opcode);
        b.register(opcode, Box::leak(mnemonic.into_boxed_str()), O::None, F::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Operand;

    const SIZES: &str = "\
        1111111111111111111111111111111111111\
        234551130311111\
        222222222222233333\
        333333333333333333333333333333333333\
        4444000122221111\
        11111111111111111111111111111111111111111111111111111";

    #[test]
    fn every_opcode_has_the_expected_size() {
        let isa = Rdr2::get();
        for (opcode, size) in SIZES.bytes().enumerate() {
            assert_eq!(
                isa.constant_byte_size(opcode as u8),
                Some(usize::from(size - b'0')),
                "opcode 0x{:02X}",
                opcode
            );
        }
        assert_eq!(SIZES.len(), 0xAF);
        assert_eq!(isa.constant_byte_size(0xAF), None);
    }

    #[test]
    fn lookup_matches_mnemonics() {
        let isa = Rdr2::get();
        for def in isa.table().defs() {
            assert_eq!(isa.lookup(def.mnemonic), Some(def.opcode));
        }
        assert_eq!(isa.lookup("CALL_0"), Some(0x52));
        assert_eq!(isa.lookup("call_f"), Some(0x61));
        assert_eq!(isa.lookup("LEAVE_2_3"), Some(0x85));
        assert_eq!(isa.lookup("PUSH_CONST_F7"), Some(0x9B));
        assert_eq!(isa.lookup("__UNK_AE"), Some(0xAE));
        assert_eq!(isa.lookup("CALL"), None);
    }

    #[test]
    fn variable_sizes() {
        let isa = Rdr2::get();
        assert_eq!(isa.byte_size(&[0x6E, 1, 0, 0, 0, 0, 0, 0]), Ok(2 + 6));
        assert_eq!(isa.byte_size(&[0x6F, 3, b'h', b'i', 0]), Ok(5));
        assert_eq!(isa.byte_size(&[0x70, 3, 0, 0, 0, b'h', b'i', 0]), Ok(8));
        assert_eq!(isa.byte_size(&[0x2D, 0, 2, 0, 2, b'f', 0]), Ok(7));
    }

    #[test]
    fn decodes_banked_calls_and_packed_natives() {
        let isa = Rdr2::get();
        let call = isa.def(0x5C).unwrap();
        assert_eq!(call.mnemonic, "CALL_A");
        assert_eq!(
            call.operands.decode(0, &[0x5C, 0x10, 0x00]),
            Ok(vec![Operand::Target(0xA_0010)])
        );
        let native = isa.def(0x2C).unwrap();
        assert_eq!(
            native.operands.decode(0, &[0x2C, 0x40 | 2 << 1 | 1, 0x05]),
            Ok(vec![Operand::Native {
                argc: 2,
                retc: 1,
                index: 0x105
            }])
        );
    }

    #[test]
    fn control_flow_flags() {
        let isa = Rdr2::get();
        for op in &["J", "ILE_JZ", "LEAVE", "LEAVE_3_3", "CALL_7", "SWITCH", "THROW"] {
            let opcode = isa.lookup(op).unwrap();
            assert!(isa.flags(opcode).contains(F::CONTROL_FLOW), "{}", op);
        }
        assert!(isa.flags(0x7A).contains(F::LEAVE));
        assert!(!isa.flags(0x2D).contains(F::CONTROL_FLOW));
    }
}
