use super::table::Builder;
use super::{Isa, IsaKind, OpcodeFlags as F, OpcodeTable, Operands as O, ScriptLayout, SwitchForm};
use once_cell::sync::Lazy;

pub struct Five {
    table: OpcodeTable,
}

static STORAGE: Lazy<Five> = Lazy::new(Five::new);

impl Five {
    pub fn get() -> &'static Five {
        &STORAGE
    }

    fn new() -> Self {
        let mut builder = Builder::new();
        gen_alu(&mut builder);
        gen_stack(&mut builder);
        gen_mem(&mut builder);
        gen_ctl(&mut builder);
        gen_text(&mut builder);
        Five {
            table: builder.build(),
        }
    }
}

impl Isa for Five {
    fn kind(&self) -> IsaKind {
        IsaKind::Five
    }

    fn table(&self) -> &OpcodeTable {
        &self.table
    }

    fn layout(&self) -> ScriptLayout {
        ScriptLayout {
            paged_code: true,
            string_table: true,
            native_table: true,
            rotated_natives: true,
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
        .register(0x3E, "IMUL_U8", O::U8, F::empty())
        .register(0x44, "IADD_S16", O::S16, F::empty())
        .register(0x45, "IMUL_S16", O::S16, F::empty());
}

fn gen_stack(b: &mut Builder) {
    const SMALL_INTS: [&str; 9] = [
        "PUSH_CONST_M1",
        "PUSH_CONST_0",
        "PUSH_CONST_1",
        "PUSH_CONST_2",
        "PUSH_CONST_3",
        "PUSH_CONST_4",
        "PUSH_CONST_5",
        "PUSH_CONST_6",
        "PUSH_CONST_7",
    ];
    const SMALL_FLOATS: [&str; 9] = [
        "PUSH_CONST_FM1",
        "PUSH_CONST_F0",
        "PUSH_CONST_F1",
        "PUSH_CONST_F2",
        "PUSH_CONST_F3",
        "PUSH_CONST_F4",
        "PUSH_CONST_F5",
        "PUSH_CONST_F6",
        "PUSH_CONST_F7",
    ];

    b.register(0x25, "PUSH_CONST_U8", O::U8, F::PUSH_CONST)
        .register(0x26, "PUSH_CONST_U8_U8", O::U8x2, F::empty())
        .register(0x27, "PUSH_CONST_U8_U8_U8", O::U8x3, F::empty())
        .register(0x28, "PUSH_CONST_U32", O::U32, F::PUSH_CONST)
        .register(0x29, "PUSH_CONST_F", O::F32, F::empty())
        .register(0x2A, "DUP", O::None, F::empty())
        .register(0x2B, "DROP", O::None, F::empty())
        .register(0x43, "PUSH_CONST_S16", O::S16, F::PUSH_CONST)
        .register(0x61, "PUSH_CONST_U24", O::U24, F::PUSH_CONST);

    for (i, &mnemonic) in SMALL_INTS.iter().enumerate() {
        b.register(0x6D + i as u8, mnemonic, O::None, F::empty());
    }
    for (i, &mnemonic) in SMALL_FLOATS.iter().enumerate() {
        b.register(0x76 + i as u8, mnemonic, O::None, F::empty());
    }
}

fn gen_mem(b: &mut Builder) {
    b.register(0x2F, "LOAD", O::None, F::empty())
        .register(0x30, "STORE", O::None, F::empty())
        .register(0x31, "STORE_REV", O::None, F::empty())
        .register(0x32, "LOAD_N", O::None, F::empty())
        .register(0x33, "STORE_N", O::None, F::empty());

    // The same three flavours (address, load, store) exist for every addressing mode.
    let modes: [(u8, &[&'static str; 3], O, F); 11] = [
        (0x34, &["ARRAY_U8", "ARRAY_U8_LOAD", "ARRAY_U8_STORE"], O::U8, F::empty()),
        (0x37, &["LOCAL_U8", "LOCAL_U8_LOAD", "LOCAL_U8_STORE"], O::U8, F::empty()),
        (0x3A, &["STATIC_U8", "STATIC_U8_LOAD", "STATIC_U8_STORE"], O::U8, F::STATIC),
        (0x40, &["IOFFSET_U8", "IOFFSET_U8_LOAD", "IOFFSET_U8_STORE"], O::U8, F::empty()),
        (0x46, &["IOFFSET_S16", "IOFFSET_S16_LOAD", "IOFFSET_S16_STORE"], O::S16, F::empty()),
        (0x49, &["ARRAY_U16", "ARRAY_U16_LOAD", "ARRAY_U16_STORE"], O::U16, F::empty()),
        (0x4C, &["LOCAL_U16", "LOCAL_U16_LOAD", "LOCAL_U16_STORE"], O::U16, F::empty()),
        (0x4F, &["STATIC_U16", "STATIC_U16_LOAD", "STATIC_U16_STORE"], O::U16, F::STATIC),
        (0x52, &["GLOBAL_U16", "GLOBAL_U16_LOAD", "GLOBAL_U16_STORE"], O::U16, F::GLOBAL),
        (0x5E, &["GLOBAL_U24", "GLOBAL_U24_LOAD", "GLOBAL_U24_STORE"], O::U24, F::GLOBAL),
        (0x3F, &["IOFFSET", "", ""], O::None, F::empty()),
    ];
    for &(base, mnemonics, operands, flags) in modes.iter() {
        for (i, &mnemonic) in mnemonics.iter().enumerate().filter(|(_, m)| !m.is_empty()) {
            b.register(base + i as u8, mnemonic, operands, flags);
        }
    }
}

fn gen_ctl(b: &mut Builder) {
    const JUMPS: [&str; 8] = [
        "J", "JZ", "IEQ_JZ", "INE_JZ", "IGT_JZ", "IGE_JZ", "ILT_JZ", "ILE_JZ",
    ];

    b.register(0x2C, "NATIVE", O::Native, F::empty())
        .register(0x2D, "ENTER", O::Enter { named: true }, F::ENTER)
        .register(0x2E, "LEAVE", O::U8x2, F::LEAVE | F::CONTROL_FLOW);

    for (i, &mnemonic) in JUMPS.iter().enumerate() {
        b.register(0x55 + i as u8, mnemonic, O::Rel16, F::JUMP | F::CONTROL_FLOW);
    }

    b.register(0x5D, "CALL", O::Abs24, F::CALL | F::CONTROL_FLOW)
        .register(
            0x62,
            "SWITCH",
            O::Switch(SwitchForm::Relative16),
            F::SWITCH | F::CONTROL_FLOW,
        )
        .register(0x6A, "CATCH", O::None, F::empty())
        .register(0x6B, "THROW", O::None, F::CONTROL_FLOW)
        .register(
            0x6C,
            "CALLINDIRECT",
            O::None,
            F::CALL_INDIRECT | F::CONTROL_FLOW,
        );
}

fn gen_text(b: &mut Builder) {
    b.register(0x63, "STRING", O::None, F::STRING)
        .register(0x64, "STRINGHASH", O::None, F::empty())
        .register(0x65, "TEXT_LABEL_ASSIGN_STRING", O::U8, F::empty())
        .register(0x66, "TEXT_LABEL_ASSIGN_INT", O::U8, F::empty())
        .register(0x67, "TEXT_LABEL_APPEND_STRING", O::U8, F::empty())
        .register(0x68, "TEXT_LABEL_APPEND_INT", O::U8, F::empty())
        .register(0x69, "TEXT_LABEL_COPY", O::None, F::empty());
}
