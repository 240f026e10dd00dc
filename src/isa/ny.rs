use super::table::Builder;
use super::{Isa, IsaKind, OpcodeFlags as F, OpcodeTable, Operands as O, ScriptLayout, SwitchForm};
use once_cell::sync::Lazy;

/// The first opcode which pushes a small constant, namely `PUSH_CONST_M16`.
const SMALL_CONST_BASE: u8 = 0x50;
/// The constant pushed by `SMALL_CONST_BASE`.
const SMALL_CONST_MIN: i32 = -16;

pub struct Ny {
    table: OpcodeTable,
}

static STORAGE: Lazy<Ny> = Lazy::new(Ny::new);

impl Ny {
    pub fn get() -> &'static Ny {
        &STORAGE
    }

    fn new() -> Self {
        let mut builder = Builder::new();
        gen_alu(&mut builder);
        gen_mem(&mut builder);
        gen_ctl(&mut builder);
        gen_consts(&mut builder);
        Ny {
            table: builder.build(),
        }
    }
}

impl Isa for Ny {
    fn kind(&self) -> IsaKind {
        IsaKind::Ny
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
        .register(0x43, "STRING", O::InlineString, F::empty())
        .register(0x44, "NULL", O::None, F::empty())
        .register(0x45, "TEXT_LABEL_ASSIGN_STRING", O::U8, F::empty())
        .register(0x46, "TEXT_LABEL_ASSIGN_INT", O::U8, F::empty())
        .register(0x47, "TEXT_LABEL_APPEND_STRING", O::U8, F::empty())
        .register(0x48, "TEXT_LABEL_APPEND_INT", O::U8, F::empty())
        .register(0x4B, "TEXT_LABEL_COPY", O::None, F::empty())
        .register(0x4C, "_XPROTECT_LOAD", O::None, F::empty())
        .register(0x4D, "_XPROTECT_STORE", O::None, F::empty())
        .register(0x4E, "_XPROTECT_REF", O::None, F::empty());
}

fn gen_ctl(b: &mut Builder) {
    b.register(0x22, "J", O::Abs32, F::JUMP | F::CONTROL_FLOW)
        .register(0x23, "JZ", O::Abs32, F::JUMP | F::CONTROL_FLOW)
        .register(0x24, "JNZ", O::Abs32, F::JUMP | F::CONTROL_FLOW)
        .register(0x2D, "NATIVE", O::NativeHash, F::empty())
        .register(0x2E, "CALL", O::Abs32, F::CALL | F::CONTROL_FLOW)
        .register(0x2F, "ENTER", O::Enter { named: false }, F::ENTER)
        .register(0x30, "LEAVE", O::U8x2, F::LEAVE | F::CONTROL_FLOW)
        .register(
            0x42,
            "SWITCH",
            O::Switch(SwitchForm::Absolute32),
            F::SWITCH | F::CONTROL_FLOW,
        )
        .register(0x49, "CATCH", O::None, F::empty())
        .register(0x4A, "THROW", O::None, F::CONTROL_FLOW);
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
        // leaked once, the table is never dropped
        b.register(opcode, Box::leak(name.into_boxed_str()), O::None, F::empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        let isa = Ny::get();
        let size = |m: &str| isa.constant_byte_size(isa.lookup(m).unwrap());
        assert_eq!(size("IADD"), Some(1));
        assert_eq!(size("J"), Some(5));
        assert_eq!(size("CALL"), Some(5));
        assert_eq!(size("NATIVE"), Some(7));
        assert_eq!(size("ENTER"), Some(4));
        assert_eq!(size("LEAVE"), Some(3));
        assert_eq!(size("PUSH_CONST_U16"), Some(3));
        assert_eq!(size("SWITCH"), Some(0));
        assert_eq!(size("STRING"), Some(0));
        assert_eq!(isa.constant_byte_size(0x00), None);
        assert_eq!(isa.constant_byte_size(0x4F), None);

        let switch = [0x42, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(isa.byte_size(&switch), Ok(2 + 8));
        assert_eq!(isa.byte_size(&[0x43, 3, b'h', b'i', 0]), Ok(5));
    }

    #[test]
    fn small_constants() {
        let isa = Ny::get();
        assert_eq!(isa.lookup("PUSH_CONST_M16"), Some(0x50));
        assert_eq!(isa.lookup("PUSH_CONST_0"), Some(0x60));
        assert_eq!(isa.lookup("push_const_159"), Some(0xFF));
        assert_eq!(isa.mnemonic(0x5F), Some("PUSH_CONST_M1"));
        assert_eq!(isa.mnemonic(0x4F), None);
    }
}
