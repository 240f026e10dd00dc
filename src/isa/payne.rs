use super::table::Builder;
use super::{Isa, IsaKind, OpcodeFlags as F, OpcodeTable, Operands as O, ScriptLayout, SwitchForm};
use once_cell::sync::Lazy;

/// `PUSH_CONST_M16`, the first of the small constants.
const SMALL_CONST_BASE: u8 = 0x50;
const SMALL_CONST_MIN: i32 = -16;

pub struct Payne {
    table: OpcodeTable,
}

static STORAGE: Lazy<Payne> = Lazy::new(Payne::new);

impl Payne {
    pub fn get() -> &'static Payne {
        &STORAGE
    }

    fn new() -> Self {
        let mut builder = Builder::new();
        gen_alu(&mut builder);
        gen_mem(&mut builder);
        gen_ctl(&mut builder);
        gen_consts(&mut builder);
        Payne {
            table: builder.build(),
        }
    }
}

impl Isa for Payne {
    fn kind(&self) -> IsaKind {
        IsaKind::Payne
    }

    fn table(&self) -> &OpcodeTable {
        &self.table
    }

    fn layout(&self) -> ScriptLayout {
        ScriptLayout {
            paged_code: false,
            string_table: false,
            native_table: false,
            rotated_natives: false,
        }
    }
}

fn gen_alu(b: &mut Builder) {
    const PLAIN: [&str; 33] = [
        "IADD", "ISUB", "IMUL", "IDIV", "IMOD", "INOT", "INEG", "IEQ", "INE", "IGT", "IGE", "ILT",
        "ILE", "FADD", "FSUB", "FMUL", "FDIV", "FMOD", "FNEG", "FEQ", "FNE", "FGT", "FGE", "FLT",
        "FLE", "VADD", "VSUB", "VMUL", "VDIV", "VNEG", "IAND", "IOR", "IXOR",
    ];

    b.register(0x00, "NOP", O::None, F::NOP);
    for (i, &mnemonic) in PLAIN.iter().enumerate() {
        b.register(0x01 + i as u8, mnemonic, O::None, F::empty());
    }
    b.register(0x25, "I2F", O::None, F::empty())
        .register(0x26, "F2I", O::None, F::empty())
        .register(0x27, "F2V", O::None, F::empty());
}

fn gen_mem(b: &mut Builder) {
    const LOCALS: [&str; 8] = [
        "LOCAL_0", "LOCAL_1", "LOCAL_2", "LOCAL_3", "LOCAL_4", "LOCAL_5", "LOCAL_6", "LOCAL_7",
    ];

    b.register(0x2B, "DUP", O::None, F::empty())
        .register(0x2C, "DROP", O::None, F::empty())
        .register(0x31, "LOAD", O::None, F::empty())
        .register(0x32, "STORE", O::None, F::empty())
        .register(0x33, "STORE_REV", O::None, F::empty())
        .register(0x34, "LOAD_N", O::None, F::empty())
        .register(0x35, "STORE_N", O::None, F::empty());
    for (i, &mnemonic) in LOCALS.iter().enumerate() {
        b.register(0x36 + i as u8, mnemonic, O::None, F::empty());
    }
    b.register(0x3E, "LOCAL", O::None, F::empty())
        .register(0x3F, "STATIC", O::None, F::empty())
        .register(0x40, "GLOBAL", O::None, F::empty())
        .register(0x41, "ARRAY", O::None, F::empty())
        .register(0x43, "STRING", O::InlineStringVar, F::empty())
        .register(0x44, "NULL", O::None, F::empty())
        .register(0x45, "TEXT_LABEL_ASSIGN_STRING", O::U8, F::empty())
        .register(0x46, "TEXT_LABEL_ASSIGN_INT", O::U8, F::empty())
        .register(0x47, "TEXT_LABEL_APPEND_STRING", O::U8, F::empty())
        .register(0x48, "TEXT_LABEL_APPEND_INT", O::U8, F::empty())
        .register(0x4B, "TEXT_LABEL_COPY", O::None, F::empty());
}

fn gen_ctl(b: &mut Builder) {
    b.register(0x22, "J", O::Abs32, F::JUMP | F::CONTROL_FLOW)
        .register(0x23, "JZ", O::Abs32, F::JUMP | F::CONTROL_FLOW)
        .register(0x24, "JNZ", O::Abs32, F::JUMP | F::CONTROL_FLOW)
        .register(0x2D, "NATIVE", O::NativeHash, F::empty())
        .register(0x2E, "CALL", O::Abs32, F::CALL | F::CONTROL_FLOW)
        .register(0x2F, "ENTER", O::Enter { named: true }, F::ENTER)
        .register(0x30, "LEAVE", O::U8x2, F::LEAVE | F::CONTROL_FLOW)
        .register(
            0x42,
            "SWITCH",
            O::Switch(SwitchForm::Absolute32),
            F::SWITCH | F::CONTROL_FLOW,
        )
        .register(0x49, "CATCH", O::None, F::empty())
        .register(0x4A, "THROW", O::None, F::CONTROL_FLOW)
        .register(
            0x4C,
            "CALLINDIRECT",
            O::None,
            F::CALL_INDIRECT | F::CONTROL_FLOW,
        );
}

fn gen_consts(b: &mut Builder) {
    b.register(0x28, "PUSH_CONST_U16", O::U16, F::PUSH_CONST)
        .register(0x29, "PUSH_CONST_U32", O::U32, F::PUSH_CONST)
        .register(0x2A, "PUSH_CONST_F", O::F32, F::empty());

    for opcode in SMALL_CONST_BASE..=0xFF {
        let value = i32::from(opcode - SMALL_CONST_BASE) + SMALL_CONST_MIN;
        let name = if value < 0 {
            format!("PUSH_CONST_M{}", -value)
        } else {
            format!("PUSH_CONST_{}", value)
        };
        b.register(opcode, Box::leak(name.into_boxed_str()), O::None, F::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::DecodeError;

    #[test]
    fn sizes() {
        let isa = Payne::get();
        let size = |m: &str| isa.constant_byte_size(isa.lookup(m).unwrap());
        assert_eq!(size("NOP"), Some(1));
        assert_eq!(size("J"), Some(5));
        assert_eq!(size("NATIVE"), Some(7));
        assert_eq!(size("ENTER"), Some(0));
        assert_eq!(size("CALLINDIRECT"), Some(1));
        assert_eq!(size("STRING"), Some(0));
        for opcode in 0x4D..=0x4F {
            assert_eq!(isa.constant_byte_size(opcode), None);
        }

        assert_eq!(isa.byte_size(&[0x2F, 1, 2, 0, 2, b'f', 0]), Ok(7));
        assert_eq!(isa.byte_size(&[0x43, 3, b'h', b'i', 0]), Ok(5));
        // a zero short length is followed by the u16 one
        assert_eq!(
            isa.byte_size(&[0x43, 0, 0x00, 0x01]),
            Err(DecodeError::Truncated {
                needed: 0x104,
                available: 4
            })
        );
    }

    #[test]
    fn small_constants() {
        let isa = Payne::get();
        assert_eq!(isa.lookup("PUSH_CONST_M16"), Some(0x50));
        assert_eq!(isa.lookup("push_const_159"), Some(0xFF));
        assert_eq!(isa.mnemonic(0x60), Some("PUSH_CONST_0"));
    }
}
