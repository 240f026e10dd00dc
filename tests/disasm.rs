mod common;

use sctools::assembler::{disasm, Disassembly, DisassemblerOptions};
use sctools::isa::IsaKind;
use sctools::script::{NativeDb, NativeMap, Script, PAGE_LENGTH};

#[test]
fn small_function() {
    let script = common::assemble(
        IsaKind::Five,
        ".code\nmain:\nPUSH_CONST_1\nPUSH_CONST_2\nIADD\nLEAVE 0,0",
    );
    assert_eq!(
        common::disassemble(IsaKind::Five, &script),
        "\n.code\nmain:\n    PUSH_CONST_1\n    PUSH_CONST_2\n    IADD\n    LEAVE 0, 0\n"
    );
}

#[test]
fn listing() {
    let src = "
        .string
            .str \"Hello\"
        .include
            .native 0x8000
        .code
        main:
            ENTER 0, 2
            PUSH_CONST_U8 0
            STRING
            NATIVE 1, 0, 0
            JZ @done
            CALL @helper
        done:
            LEAVE 0, 0
        helper:
            ENTER 1, 3
            LEAVE 1, 0
    ";
    let script = common::assemble(IsaKind::Five, src);
    assert_eq!(script.code_length(), 42);

    let expected = "
.string
str_hello:
    .str \"Hello\"

.include
_0x0000000000008000:
    .native 0x0000000000008000

.code
main:
    ENTER 0, 2
    PUSH_CONST_U8 str_hello
    STRING
    NATIVE 1, 0, _0x0000000000008000
    JZ @lbl_000024
    CALL @helper
lbl_000024:
    LEAVE 0, 0

helper:
    ENTER 1, 3
    LEAVE 1, 0
";
    assert_eq!(common::disassemble(IsaKind::Five, &script), expected);
}

#[test]
fn addresses_and_native_names() {
    let script = common::assemble(
        IsaKind::Five,
        ".include\n.native 0x8000\n.code\nNATIVE 0, 0, 0\nLEAVE 0, 0",
    );
    let mut db = NativeMap::new();
    db.insert(0x8000, "WAIT");
    let text = sctools::assembler::disassemble(
        &script,
        IsaKind::Five,
        &DisassemblerOptions {
            native_db: Some(&db as &dyn NativeDb),
            addresses: true,
        },
    )
    .unwrap();
    assert!(text.contains("WAIT:\n    .native 0x0000000000008000\n"));
    assert!(text.contains("    NATIVE 0, 0, WAIT ; 0x000000\n"));
    assert!(text.contains("    LEAVE 0, 0 ; 0x000004\n"));
}

#[test]
fn data_dumps_fold_runs() {
    let src = "
        .script_name demo
        .global_block 2
        .global
            .int 4 dup (0)
            .int64 -1
        .static
            .int 3 dup (5), 6
        .arg
            .int 1
        .code
            STATIC_U8_LOAD 4
            GLOBAL_U24_LOAD 0x80004
    ";
    let script = common::assemble(IsaKind::Five, src);
    let expected = "\
.script_name demo
.global_block 2

.global
    .int 4 dup (0)
global_4:
    .int64 0xFFFFFFFFFFFFFFFF

.static
    .int 3 dup (5)
    .int 6

.arg
arg_0:
    .int 1

.code
main:
    STATIC_U8_LOAD arg_0
    GLOBAL_U24_LOAD global_4
";
    assert_eq!(common::disassemble(IsaKind::Five, &script), expected);
}

#[test]
fn unknown_opcode_is_fatal() {
    let script = Script::from_code(&[0x6F, 0x7F, 0x00], true);
    assert_eq!(
        Disassembly::new(&script, IsaKind::Five, &DisassemblerOptions::default()).err(),
        Some(disasm::Error::UnknownOpcode {
            offset: 1,
            opcode: 0x7F,
        })
    );
}

#[test]
fn truncated_code_is_fatal() {
    let script = Script::from_code(&[0x6F, 0x28, 0x01], true);
    assert_eq!(
        Disassembly::new(&script, IsaKind::Five, &DisassemblerOptions::default()).err(),
        Some(disasm::Error::Truncated {
            offset: 1,
            needed: 5,
            available: 2,
        })
    );
}

#[test]
fn jumps_into_an_instruction_are_fatal() {
    // J +1 lands inside the PUSH_CONST_U8
    let script = Script::from_code(&[0x55, 0x01, 0x00, 0x25, 0x07], true);
    assert_eq!(
        Disassembly::new(&script, IsaKind::Five, &DisassemblerOptions::default()).err(),
        Some(disasm::Error::MisalignedTarget {
            offset: 0,
            target: 4,
        })
    );
}

#[test]
fn jump_offsets_decode_to_their_label() {
    let src = "
            J @end
            PUSH_CONST_U8 1
            PUSH_CONST_U8 2
            PUSH_CONST_1
        end:
            LEAVE 0, 0
    ";
    let script = common::assemble(IsaKind::Five, src);
    let dis = Disassembly::new(&script, IsaKind::Five, &DisassemblerOptions::default()).unwrap();
    assert_eq!(dis.instructions()[0].targets(), vec![8]);
    assert_eq!(dis.label_at(8), Some("lbl_000008"));
}

#[test]
fn roundtrip_five() {
    let src = "
        .script_name \"round trip\"
        .script_hash 0x12345678
        .globals_signature 0xCAFE
        .global_block 1
        .global
        total:  .int 0
                .int 8 dup (3)
                .float 1.5
        .static
        count:  .int 10
                .int 2 dup (0)
        .arg
        param:  .int64 0x123456789A
        .string
        hello:  .str \"Hello, world\"
                .str \"\"
        bye:    .str \"Bye\"
        .include
        wait:   .native 0x4EDE34FBADD967A6
        rand:   .native 0xD3A58A12C77D9D4B
        .code
        main:
            ENTER 0, 4
            PUSH_CONST_U8 hello
            STRING
            PUSH_CONST_U8 bye
            STRING
            STATIC_U8_LOAD count
            STATIC_U8_STORE param
            GLOBAL_U24_LOAD total
            PUSH_CONST_F -0.25
            PUSH_CONST_S16 -300
            PUSH_CONST_U32 0xFFFFFFFF
            NATIVE 1, 0, wait
            NATIVE 0, 1, rand
            PUSH_CONST_U24 @helper
            CALLINDIRECT
            CALL @helper
            SWITCH 1:@one, 2:@two
            J @done
        one:
            PUSH_CONST_1
            J @done
        two:
            PUSH_CONST_2
        done:
            LEAVE 0, 0
        helper:
            ENTER 2, 5
            LOCAL_U8_LOAD 0
            IEQ_JZ @skip
            PUSH_CONST_M1
        skip:
            LEAVE 2, 1
        ENTER 0, 2, \"not an identifier\"
            LEAVE 0, 0
    ";
    let script = common::roundtrip(IsaKind::Five, src);
    assert_eq!(script.name, "round trip");
    assert_eq!(script.natives_count(), 2);
}

#[test]
fn roundtrip_across_pages() {
    let mut src = String::from(".code\nmain:\nENTER 0, 2\n");
    for i in 0..PAGE_LENGTH / 2 {
        src.push_str(&format!("PUSH_CONST_U8 {}\nDROP\n", i % 256));
    }
    src.push_str("CALL @far\nLEAVE 0, 0\nfar:\nENTER 0, 2\nLEAVE 0, 0\n");

    let script = common::roundtrip(IsaKind::Five, &src);
    assert_eq!(script.code.pages().len(), 2);
}

#[test]
fn function_pushed_to_the_next_page() {
    // main ends 8 bytes before the page boundary, too little for the ENTER of helper
    let src = format!(
        "main:\nENTER 0, 2\nCALL @helper\n{}LEAVE 0, 0\nhelper:\nENTER 0, 2\nLEAVE 0, 0\n",
        "NOP\n".repeat(PAGE_LENGTH - 8 - 17)
    );
    let script = common::roundtrip(IsaKind::Five, &src);
    let dis = Disassembly::new(&script, IsaKind::Five, &DisassemblerOptions::default()).unwrap();
    let helper = PAGE_LENGTH as u32 - 8;
    assert_eq!(dis.functions().collect::<Vec<_>>(), vec![(0, "main"), (helper, "helper")]);
    assert_eq!(dis.label_at(PAGE_LENGTH as u32), Some("lbl_016384"));

    let text = dis.to_string();
    assert!(text.contains("helper:\n    J @lbl_016384\n"));
    assert!(text.contains("lbl_016384:\n    ENTER 0, 2, \"helper\"\n"));
}

#[test]
fn roundtrip_ny() {
    let src = "
        .static
        x:  .int 4
        .code
        main:
            ENTER 0, 2
            STRING \"inline\"
            PUSH_CONST_U16 1000
            PUSH_CONST_M16
            PUSH_CONST_159
            NATIVE 2, 1, WAIT
            CALL @helper
            SWITCH 1:@helper, 3:@out
        out:
            LEAVE 0, 0
        helper:
            ENTER 1, 1
            JNZ @helper
            LEAVE 1, 0
    ";
    common::roundtrip(IsaKind::Ny, src);
}

#[test]
fn floats_without_a_decimal_form_roundtrip() {
    let src = "
        main:
            PUSH_CONST_F 0f7FC00001
            PUSH_CONST_F 0f7F800000
            PUSH_CONST_F -0f7F800000
            PUSH_CONST_F -0.0
            PUSH_CONST_F 1e-45
            LEAVE 0, 0
    ";
    let script = common::roundtrip(IsaKind::Five, src);
    let text = common::disassemble(IsaKind::Five, &script);
    assert!(text.contains("PUSH_CONST_F 0f7FC00001\n"));
    assert!(text.contains("PUSH_CONST_F 0fFF800000\n"));
    assert!(text.contains("PUSH_CONST_F -0.0\n"));
}

#[test]
fn raw_string_bytes_roundtrip() {
    let src = "
        .string
        odd: .str \"a\\xFF\"
        .code
        main:
            ENTER 0, 2, \"f\\xC3\"
            PUSH_CONST_U8 odd
            STRING
            LEAVE 0, 0
    ";
    let script = common::roundtrip(IsaKind::Five, src);
    assert_eq!(&script.strings.flatten()[..3], &[97, 255, 0]);
    let text = common::disassemble(IsaKind::Five, &script);
    assert!(text.contains(".str \"a\\xFF\"\n"));
    assert!(text.contains("ENTER 0, 2, \"f\\xC3\"\n"));

    let script = common::roundtrip(IsaKind::Ny, "STRING \"\\x80z\"\nLEAVE 0, 0");
    assert_eq!(&script.code.flatten()[..5], &[0x43, 0x03, 0x80, b'z', 0x00]);
}

#[test]
fn roundtrip_rdr2() {
    let src = "
        .include
        wait: .native 0x1234
        .static
        x:  .int 4
        .code
        main:
            ENTER 0, 2
            STATIC_U8_LOAD x
            PUSH_CONST_U24 70000
            PUSH_CONST_FM1
            STRING \"inline\"
            STRING_U32 \"long\"
            NATIVE 2, 1, wait
            CALL_0 @helper
            SWITCH 1:@helper, 3:@out
            __UNK_9C
        out:
            LEAVE_0_0
        helper:
            ENTER 1, 1
            IEQ_JZ @helper
            LEAVE 1, 0
    ";
    let script = common::roundtrip(IsaKind::Rdr2, src);
    let text = common::disassemble(IsaKind::Rdr2, &script);
    assert!(text.contains("    NATIVE 2, 1, _0x0000000000001234\n"), "{}", text);
    assert!(text.contains("    CALL_0 @helper\n"), "{}", text);
    assert!(text.contains("    STRING_U32 \"long\"\n"), "{}", text);
}

#[test]
fn roundtrip_payne() {
    let src = format!(
        "
        main:
            ENTER 0, 2
            STRING \"{}\"
            NATIVE 2, 1, WAIT
            CALL @helper
            SWITCH 1:@helper
            CALLINDIRECT
            LEAVE 0, 0
        helper:
            ENTER 1, 1, \"renamed\"
            JNZ @helper
            LEAVE 1, 0
    ",
        "b".repeat(300)
    );
    let script = common::roundtrip(IsaKind::Payne, &src);
    assert_eq!(&script.code.flatten()[10..14], &[0x43, 0x00, 0x2D, 0x01]);
}
